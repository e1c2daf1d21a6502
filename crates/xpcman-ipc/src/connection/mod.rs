//! Named-endpoint connections with serialised event delivery.
//!
//! A [`Connection`] owns one native channel. Asynchronous traffic is queued by
//! the native layer and drained by a single delivery thread per connection,
//! so a bound [`EventHandler`] observes events in native order and is never
//! invoked concurrently for the same connection.

mod delivery;
mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};
use xpcman_config::TransportErrorPolicy;

pub use self::state::ConnectionState;
use crate::codec;
use crate::emitter::EventHandler;
use crate::error::{IpcError, TransportErrorKind};
use crate::native::{Endpoint, EventSink, NativeChannel, NativeLayer, ReplySink};
use crate::value::Dictionary;

pub(crate) const CONNECTION_TARGET: &str = concat!(env!("CARGO_CRATE_NAME"), "::connection");

/// Per-connection behaviour knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Reaction to transport interruptions.
    pub transport_errors: TransportErrorPolicy,
}

impl ConnectionOptions {
    /// Options with the given interruption policy.
    #[must_use]
    pub const fn with_transport_errors(transport_errors: TransportErrorPolicy) -> Self {
        Self { transport_errors }
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

pub(crate) struct Shared {
    endpoint: Endpoint,
    options: ConnectionOptions,
    state: Mutex<ConnectionState>,
    channel: Mutex<Box<dyn NativeChannel>>,
    events: EventSink,
    closed_locally: AtomicBool,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn cancel_native(&self) {
        lock(&self.channel).cancel();
    }
}

/// A connection to a named endpoint.
///
/// Dropping the connection closes it and waits for in-flight event delivery
/// to finish.
pub struct Connection {
    shared: Arc<Shared>,
    bound: AtomicBool,
    delivery: Option<JoinHandle<()>>,
}

impl Connection {
    /// Opens a connection without an event handler.
    ///
    /// Lifecycle events are absorbed from the start, so a resolution failure
    /// invalidates the connection even while unbound. Handler dispatches are
    /// queued until [`bind`](Self::bind) is called.
    pub fn open(layer: &dyn NativeLayer, endpoint: Endpoint, options: ConnectionOptions) -> Self {
        let (events, receiver) = EventSink::channel();
        let channel = layer.open(&endpoint, events.clone());
        info!(
            target: CONNECTION_TARGET,
            endpoint = %endpoint,
            transport_errors = %options.transport_errors,
            "opened connection"
        );
        let shared = Arc::new(Shared {
            endpoint,
            options,
            state: Mutex::new(ConnectionState::Connecting),
            channel: Mutex::new(channel),
            events,
            closed_locally: AtomicBool::new(false),
        });
        let worker = Arc::clone(&shared);
        let delivery = thread::spawn(move || delivery::run(&worker, &receiver));
        Self {
            shared,
            bound: AtomicBool::new(false),
            delivery: Some(delivery),
        }
    }

    /// Opens a connection with `handler` bound from the start.
    pub fn connect(
        layer: &dyn NativeLayer,
        endpoint: Endpoint,
        handler: Arc<dyn EventHandler>,
        options: ConnectionOptions,
    ) -> Self {
        let connection = Self::open(layer, endpoint, options);
        connection.bound.store(true, Ordering::Release);
        connection.shared.events.bind(handler);
        connection
    }

    /// Binds the event handler.
    ///
    /// Events queued while unbound are delivered first, in native order.
    ///
    /// # Errors
    ///
    /// Returns [`IpcError::HandlerAlreadyBound`] when a handler is already
    /// bound, leaving that handler in place, and [`IpcError::ConnectionClosed`]
    /// after [`close`](Self::close).
    pub fn bind(&self, handler: Arc<dyn EventHandler>) -> Result<(), IpcError> {
        if self.shared.closed_locally.load(Ordering::Acquire) {
            return Err(self.closed_error());
        }
        if self.bound.swap(true, Ordering::AcqRel) {
            return Err(IpcError::HandlerAlreadyBound {
                service: self.service().to_owned(),
            });
        }
        self.shared.events.bind(handler);
        Ok(())
    }

    /// Sends a payload without awaiting a reply.
    ///
    /// # Errors
    ///
    /// Returns [`IpcError::ConnectionClosed`] once the connection is invalid
    /// and [`IpcError::InvalidArgument`] when a key or string contains a NUL
    /// byte; nothing reaches the native layer in either case.
    pub fn send(&self, payload: Dictionary) -> Result<(), IpcError> {
        codec::check_encodable(&payload)?;
        let mut channel = self.open_channel()?;
        debug!(
            target: CONNECTION_TARGET,
            endpoint = %self.shared.endpoint,
            keys = payload.len(),
            "sending message"
        );
        channel.send(codec::encode(payload));
        Ok(())
    }

    /// Sends a payload and blocks until the reply arrives.
    ///
    /// `None` waits indefinitely.
    ///
    /// # Errors
    ///
    /// Returns [`IpcError::ConnectionClosed`] once the connection is invalid,
    /// [`IpcError::InvalidArgument`] for payloads that cannot be encoded,
    /// [`IpcError::Timeout`] when `timeout` elapses, transport or resolution
    /// errors reported for the reply, and [`IpcError::Decode`] when the reply
    /// contains unsupported values.
    pub fn send_with_reply(
        &self,
        payload: Dictionary,
        timeout: Option<Duration>,
    ) -> Result<Dictionary, IpcError> {
        codec::check_encodable(&payload)?;
        let (sink, replies) = ReplySink::channel();
        {
            let mut channel = self.open_channel()?;
            debug!(
                target: CONNECTION_TARGET,
                endpoint = %self.shared.endpoint,
                keys = payload.len(),
                "sending message expecting a reply"
            );
            channel.send_with_reply(codec::encode(payload), sink);
        }

        let received = match timeout {
            Some(limit) => replies.recv_timeout(limit).map_err(|error| match error {
                RecvTimeoutError::Timeout => IpcError::Timeout {
                    service: self.service().to_owned(),
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                },
                RecvTimeoutError::Disconnected => self.abandoned_error(),
            })?,
            None => replies.recv().map_err(|_| self.abandoned_error())?,
        };
        let reply = received.map_err(|fault| fault.into_error(&self.shared.endpoint))?;
        codec::decode(reply).map_err(IpcError::Decode)
    }

    /// Closes the connection. Later calls have no effect.
    ///
    /// The bound handler receives events queued before the close; the
    /// invalidation caused by the close itself is not reported to it.
    pub fn close(&self) {
        if self.shared.closed_locally.swap(true, Ordering::AcqRel) {
            return;
        }
        *lock(&self.shared.state) = ConnectionState::Invalid;
        self.shared.cancel_native();
        self.shared.events.close();
        info!(
            target: CONNECTION_TARGET,
            endpoint = %self.shared.endpoint,
            "closed connection"
        );
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Endpoint this connection targets.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    fn service(&self) -> &str {
        self.shared.endpoint.name()
    }

    fn open_channel(&self) -> Result<MutexGuard<'_, Box<dyn NativeChannel>>, IpcError> {
        if self.state().is_terminal() {
            return Err(self.closed_error());
        }
        Ok(lock(&self.shared.channel))
    }

    fn closed_error(&self) -> IpcError {
        IpcError::ConnectionClosed {
            service: self.service().to_owned(),
        }
    }

    fn abandoned_error(&self) -> IpcError {
        IpcError::Transport {
            service: self.service().to_owned(),
            kind: TransportErrorKind::Invalidated,
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Connection")
            .field("endpoint", &self.shared.endpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
        if let Some(handle) = self.delivery.take()
            && handle.thread().id() != thread::current().id()
            && handle.join().is_err()
        {
            warn!(
                target: CONNECTION_TARGET,
                endpoint = %self.shared.endpoint,
                "event handler panicked"
            );
        }
    }
}
