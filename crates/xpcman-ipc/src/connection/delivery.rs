//! Delivery loop that drains native events into the bound handler.
//!
//! State changes apply as soon as an event is drained, whether or not a
//! handler is bound. Dispatches made before binding wait in a backlog that
//! the bind marker flushes in order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::mpsc::Receiver;

use tracing::{debug, info};

use super::{CONNECTION_TARGET, ConnectionState, Shared, lock};
use crate::codec;
use crate::emitter::EventHandler;
use crate::error::IpcError;
use crate::native::{Delivery, NativeEvent, NativeFault};
use crate::value::Dictionary;

type Dispatch = (Option<Dictionary>, Option<IpcError>);

struct Absorbed {
    stop: bool,
    dispatch: Option<Dispatch>,
    cancel_native: bool,
}

pub(super) fn run(shared: &Shared, receiver: &Receiver<Delivery>) {
    let mut handler: Option<Arc<dyn EventHandler>> = None;
    let mut backlog: VecDeque<Dispatch> = VecDeque::new();
    while let Ok(delivery) = receiver.recv() {
        match delivery {
            Delivery::Native(event) => {
                let absorbed = absorb(shared, event);
                if absorbed.cancel_native {
                    shared.cancel_native();
                }
                if let Some(dispatch) = absorbed.dispatch {
                    match handler.as_deref() {
                        Some(bound) => deliver(bound, dispatch),
                        None => backlog.push_back(dispatch),
                    }
                }
                // Without a handler the loop waits for a bind or a close so
                // the backlog still reaches a late handler.
                if absorbed.stop && handler.is_some() {
                    break;
                }
            }
            Delivery::Bind(bound) => {
                for dispatch in backlog.drain(..) {
                    deliver(bound.as_ref(), dispatch);
                }
                handler = Some(bound);
                if shared.state().is_terminal() && !shared.closed_locally.load(Ordering::Acquire)
                {
                    break;
                }
            }
            Delivery::Closed => break,
        }
    }
    if !backlog.is_empty() {
        debug!(
            target: CONNECTION_TARGET,
            endpoint = %shared.endpoint,
            discarded = backlog.len(),
            "discarded events queued before any handler was bound"
        );
    }
    debug!(
        target: CONNECTION_TARGET,
        endpoint = %shared.endpoint,
        "event delivery stopped"
    );
}

fn deliver(handler: &dyn EventHandler, (payload, error): Dispatch) {
    handler.handle_event(payload, error);
}

fn absorb(shared: &Shared, event: NativeEvent) -> Absorbed {
    let mut state = lock(&shared.state);
    let previous = *state;
    let mut cancel_native = false;
    let dispatch = match event {
        NativeEvent::Ready => {
            *state = previous.on_ready();
            None
        }
        NativeEvent::Message(object) => {
            *state = previous.on_message();
            Some(match codec::decode(object) {
                Ok(payload) => (Some(payload), None),
                Err(partial) => (Some(partial.partial.clone()), Some(IpcError::Decode(partial))),
            })
        }
        NativeEvent::Fault(NativeFault::Interrupted) => {
            *state = previous.on_interrupted(shared.options.transport_errors);
            cancel_native = state.is_terminal() && !previous.is_terminal();
            Some((None, Some(NativeFault::Interrupted.into_error(&shared.endpoint))))
        }
        NativeEvent::Fault(fault) => {
            *state = ConnectionState::Invalid;
            let echoed_close = fault == NativeFault::Invalidated
                && shared.closed_locally.load(Ordering::Acquire);
            (!echoed_close).then(|| (None, Some(fault.into_error(&shared.endpoint))))
        }
    };

    if *state != previous {
        info!(
            target: CONNECTION_TARGET,
            endpoint = %shared.endpoint,
            from = %previous,
            to = %*state,
            "connection state changed"
        );
    }
    // A local close lets queued events drain until the close marker.
    Absorbed {
        stop: state.is_terminal() && !shared.closed_locally.load(Ordering::Acquire),
        dispatch,
        cancel_native,
    }
}
