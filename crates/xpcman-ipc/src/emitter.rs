//! Asynchronous event delivery contract.

use tracing::{info, warn};

use crate::error::IpcError;
use crate::value::Dictionary;

pub(crate) const EMITTER_TARGET: &str = concat!(env!("CARGO_CRATE_NAME"), "::emitter");

/// Receives asynchronous traffic for a connection.
///
/// Each invocation carries a payload, an error, or both: a payload that only
/// partially decoded arrives together with [`IpcError::Decode`]. Invocations
/// for one connection are serialised and arrive in native order; the handler
/// is never re-entered for the same connection.
#[cfg_attr(test, mockall::automock)]
pub trait EventHandler: Send + Sync {
    /// Handles one event.
    fn handle_event(&self, event: Option<Dictionary>, error: Option<IpcError>);
}

impl<F> EventHandler for F
where
    F: Fn(Option<Dictionary>, Option<IpcError>) + Send + Sync,
{
    fn handle_event(&self, event: Option<Dictionary>, error: Option<IpcError>) {
        self(event, error);
    }
}

/// Default handler that logs errors and payloads.
#[derive(Debug, Clone)]
pub struct LoggingHandler {
    service: String,
}

impl LoggingHandler {
    /// Creates a handler that tags records with `service`.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl EventHandler for LoggingHandler {
    fn handle_event(&self, event: Option<Dictionary>, error: Option<IpcError>) {
        if let Some(error) = error {
            warn!(
                target: EMITTER_TARGET,
                service = %self.service,
                error = %error,
                "connection event reported an error"
            );
        }
        let Some(event) = event else {
            return;
        };
        match serde_json::to_string(&event) {
            Ok(payload) => info!(
                target: EMITTER_TARGET,
                service = %self.service,
                payload = %payload,
                "received event"
            ),
            Err(error) => warn!(
                target: EMITTER_TARGET,
                service = %self.service,
                error = %error,
                "failed to render event payload"
            ),
        }
    }
}
