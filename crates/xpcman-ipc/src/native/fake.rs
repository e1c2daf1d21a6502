//! In-memory native layer for tests.
//!
//! Endpoints are registered with a responder closure that decides how each
//! reply-expecting send is answered. Unregistered endpoints fail resolution.
//! Every send is recorded so tests can assert whether, and what, reached the
//! native boundary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    Endpoint, EventSink, NativeChannel, NativeEvent, NativeFault, NativeLayer, NativeObject,
    ReplySink,
};

/// How the fake answers a reply-expecting send.
#[derive(Debug, Clone, PartialEq)]
pub enum FakeReply {
    /// Deliver this reply.
    Reply(NativeObject),
    /// Fail the send with this fault.
    Fault(NativeFault),
    /// Never answer.
    Stall,
}

type Responder = Arc<dyn Fn(&NativeObject) -> FakeReply + Send + Sync>;

/// A message that reached the native boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct FakeCall {
    /// Destination endpoint.
    pub endpoint: Endpoint,
    /// Encoded message.
    pub message: NativeObject,
    /// Whether the send expected a reply.
    pub expects_reply: bool,
}

#[derive(Default)]
struct FakeState {
    services: HashMap<Endpoint, Responder>,
    calls: Vec<FakeCall>,
    open_channels: Vec<(usize, Endpoint, EventSink)>,
    stalled: Vec<ReplySink>,
}

/// Cloneable handle onto a shared in-memory native layer.
#[derive(Clone, Default)]
pub struct FakeNativeLayer {
    state: Arc<Mutex<FakeState>>,
    next_channel: Arc<AtomicUsize>,
}

impl FakeNativeLayer {
    /// Creates a fake with no registered endpoints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    /// Registers an endpoint answered by `responder`.
    pub fn register<F>(&self, endpoint: Endpoint, responder: F)
    where
        F: Fn(&NativeObject) -> FakeReply + Send + Sync + 'static,
    {
        self.lock().services.insert(endpoint, Arc::new(responder));
    }

    /// Registers an endpoint that answers every request with `reply`.
    pub fn register_reply(&self, endpoint: Endpoint, reply: NativeObject) {
        self.register(endpoint, move |_| FakeReply::Reply(reply.clone()));
    }

    /// Every message sent so far.
    #[must_use]
    pub fn calls(&self) -> Vec<FakeCall> {
        self.lock().calls.clone()
    }

    /// Number of messages sent so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Number of channels that are open and not cancelled.
    #[must_use]
    pub fn open_channel_count(&self) -> usize {
        self.lock().open_channels.len()
    }

    /// Posts `event` to every open channel for `endpoint`, returning how many
    /// channels received it.
    pub fn inject(&self, endpoint: &Endpoint, event: &NativeEvent) -> usize {
        self.lock()
            .open_channels
            .iter()
            .filter(|(_, open, _)| open == endpoint)
            .filter(|(_, _, sink)| sink.post(event.clone()))
            .count()
    }
}

impl NativeLayer for FakeNativeLayer {
    fn open(&self, endpoint: &Endpoint, events: EventSink) -> Box<dyn NativeChannel> {
        let id = self.next_channel.fetch_add(1, Ordering::Relaxed);
        let responder = {
            let mut state = self.lock();
            state
                .open_channels
                .push((id, endpoint.clone(), events.clone()));
            state.services.get(endpoint).cloned()
        };
        let opened = match responder {
            Some(_) => NativeEvent::Ready,
            None => NativeEvent::Fault(not_found()),
        };
        events.post(opened);
        Box::new(FakeChannel {
            id,
            endpoint: endpoint.clone(),
            responder,
            events,
            layer: self.clone(),
            cancelled: false,
        })
    }
}

fn not_found() -> NativeFault {
    NativeFault::Resolution {
        reason: String::from("no such service"),
    }
}

struct FakeChannel {
    id: usize,
    endpoint: Endpoint,
    responder: Option<Responder>,
    events: EventSink,
    layer: FakeNativeLayer,
    cancelled: bool,
}

impl FakeChannel {
    fn record(&self, message: &NativeObject, expects_reply: bool) {
        self.layer.lock().calls.push(FakeCall {
            endpoint: self.endpoint.clone(),
            message: message.clone(),
            expects_reply,
        });
    }
}

impl NativeChannel for FakeChannel {
    fn send(&mut self, message: NativeObject) {
        self.record(&message, false);
    }

    fn send_with_reply(&mut self, message: NativeObject, reply: ReplySink) {
        self.record(&message, true);
        if self.cancelled {
            reply.deliver(Err(NativeFault::Invalidated));
            return;
        }
        let Some(responder) = self.responder.as_ref() else {
            reply.deliver(Err(not_found()));
            return;
        };
        match responder(&message) {
            FakeReply::Reply(object) => {
                reply.deliver(Ok(object));
            }
            FakeReply::Fault(fault) => {
                reply.deliver(Err(fault));
            }
            FakeReply::Stall => self.layer.lock().stalled.push(reply),
        }
    }

    fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.layer
            .lock()
            .open_channels
            .retain(|(id, _, _)| *id != self.id);
        self.events.post(NativeEvent::Fault(NativeFault::Invalidated));
    }
}
