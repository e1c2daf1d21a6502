use std::fmt;

use xpcman_config::TransportErrorPolicy;

/// Lifecycle state of a [`Connection`](super::Connection).
///
/// `Invalid` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Opened; the native layer has not confirmed the channel yet.
    Connecting,
    /// Traffic is flowing.
    Active,
    /// The peer went away; the native layer may reconnect.
    Interrupted,
    /// Closed or invalidated.
    Invalid,
}

impl ConnectionState {
    /// Returns `true` once no further traffic is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Invalid)
    }

    pub(crate) const fn on_ready(self) -> Self {
        match self {
            Self::Connecting => Self::Active,
            other => other,
        }
    }

    pub(crate) const fn on_message(self) -> Self {
        match self {
            Self::Connecting | Self::Interrupted => Self::Active,
            other => other,
        }
    }

    pub(crate) const fn on_interrupted(self, policy: TransportErrorPolicy) -> Self {
        match (self, policy) {
            (Self::Invalid, _) | (_, TransportErrorPolicy::Close) => Self::Invalid,
            (_, TransportErrorPolicy::Retain) => Self::Interrupted,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Interrupted => "interrupted",
            Self::Invalid => "invalid",
        })
    }
}
