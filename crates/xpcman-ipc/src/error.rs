//! Error taxonomy shared by connections, the emitter, and the request
//! catalogue.

use std::fmt;

use thiserror::Error;

use crate::codec::PartialDecode;
use crate::native::LookupNamespace;

/// Transport-level failure reported by the native layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The peer went away; the native layer may reconnect.
    Interrupted,
    /// The connection can no longer be used.
    Invalidated,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Interrupted => "interrupted",
            Self::Invalidated => "invalidated",
        })
    }
}

/// Errors surfaced by the IPC layer.
#[derive(Debug, Error)]
pub enum IpcError {
    /// The endpoint could not be located.
    #[error("failed to resolve `{service}` in the {namespace} namespace: {reason}")]
    Resolution {
        /// Endpoint name.
        service: String,
        /// Namespace the lookup ran in.
        namespace: LookupNamespace,
        /// Native diagnostic.
        reason: String,
    },
    /// The native channel reported a transport failure.
    #[error("connection to `{service}` was {kind}")]
    Transport {
        /// Endpoint name.
        service: String,
        /// Failure kind.
        kind: TransportErrorKind,
    },
    /// A received payload contained values outside the value universe.
    #[error("failed to decode payload: {0}")]
    Decode(PartialDecode),
    /// The service manager does not know the requested target.
    #[error("`{target}` was not found")]
    NotFound {
        /// Service name, path, or pid that was looked up.
        target: String,
    },
    /// A request argument was rejected.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Description of the rejected argument.
        reason: String,
    },
    /// The connection has been closed or invalidated.
    #[error("connection to `{service}` is closed")]
    ConnectionClosed {
        /// Endpoint name.
        service: String,
    },
    /// No reply arrived within the configured timeout.
    #[error("no reply from `{service}` within {timeout_ms} ms")]
    Timeout {
        /// Endpoint name.
        service: String,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },
    /// The connection already has an event handler.
    #[error("an event handler is already bound to the connection for `{service}`")]
    HandlerAlreadyBound {
        /// Endpoint name.
        service: String,
    },
    /// The service manager returned a non-zero error code.
    #[error("service manager rejected `{operation}` with error {code}")]
    ServiceError {
        /// Operation name.
        operation: &'static str,
        /// Native error code.
        code: i64,
    },
    /// A reply did not have the expected shape.
    #[error("malformed `{operation}` reply: {reason}")]
    Malformed {
        /// Operation name.
        operation: &'static str,
        /// What was wrong with the reply.
        reason: String,
    },
}

impl IpcError {
    /// Builds an [`IpcError::InvalidArgument`].
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Returns `true` for transport failures of the given kind.
    #[must_use]
    pub fn is_transport(&self, expected: TransportErrorKind) -> bool {
        matches!(self, Self::Transport { kind, .. } if *kind == expected)
    }
}

impl From<PartialDecode> for IpcError {
    fn from(value: PartialDecode) -> Self {
        Self::Decode(value)
    }
}
