//! Shared configuration for the `xpcman` command-line tool.
//!
//! Configuration is layered by `ortho_config`: built-in defaults, then an
//! optional TOML file (`--config-path` or `XPCMAN_CONFIG_PATH`), then
//! `XPCMAN_*` environment variables, then command-line flags. The resulting
//! [`Config`] controls logging, reply timeouts, and how connections react to
//! transport interruptions.

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};

mod defaults;
mod logging;
mod policy;

pub use defaults::{
    DEFAULT_EVENT_LINGER_MS, DEFAULT_LOG_FILTER, DEFAULT_REPLY_TIMEOUT_MS,
    DEFAULT_SERVICE_MANAGER_ENDPOINT, default_log_filter, default_log_filter_string,
    default_log_format, default_service_manager_endpoint, default_transport_errors,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use policy::{TransportErrorPolicy, TransportErrorPolicyParseError};

/// Runtime configuration resolved from every configuration layer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "XPCMAN")]
pub struct Config {
    /// `tracing` filter expression, for example `info` or `xpcman_ipc=debug`.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format of the log subscriber.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Reply timeout for reply-expecting sends, in milliseconds. Zero waits
    /// indefinitely.
    #[ortho_config(default = DEFAULT_REPLY_TIMEOUT_MS)]
    pub reply_timeout_ms: u64,
    /// Time a fire-and-forget send keeps the connection open so asynchronous
    /// events can be logged, in milliseconds.
    #[ortho_config(default = DEFAULT_EVENT_LINGER_MS)]
    pub event_linger_ms: u64,
    /// Reaction to transport interruptions.
    #[ortho_config(default = default_transport_errors())]
    pub transport_errors: TransportErrorPolicy,
    /// Endpoint name of the service manager.
    #[ortho_config(default = default_service_manager_endpoint())]
    pub service_manager_endpoint: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            reply_timeout_ms: DEFAULT_REPLY_TIMEOUT_MS,
            event_linger_ms: DEFAULT_EVENT_LINGER_MS,
            transport_errors: default_transport_errors(),
            service_manager_endpoint: default_service_manager_endpoint(),
        }
    }
}

impl Config {
    /// Loads configuration from the given argument iterator, the process
    /// environment, and any discovered configuration file.
    ///
    /// The first argument is treated as the binary name.
    pub fn load_from_iter<I>(args: I) -> Result<Self, Arc<OrthoError>>
    where
        I: IntoIterator<Item = OsString>,
    {
        <Self as OrthoConfig>::load_from_iter(args)
    }

    /// Returns the log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Returns the log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Returns the reply timeout, or `None` when replies are awaited
    /// indefinitely.
    #[must_use]
    pub const fn reply_timeout(&self) -> Option<Duration> {
        if self.reply_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.reply_timeout_ms))
        }
    }

    /// Returns how long fire-and-forget sends linger for events.
    #[must_use]
    pub const fn event_linger(&self) -> Duration {
        Duration::from_millis(self.event_linger_ms)
    }

    /// Returns the transport interruption policy.
    #[must_use]
    pub const fn transport_errors(&self) -> TransportErrorPolicy {
        self.transport_errors
    }

    /// Returns the service-manager endpoint name.
    #[must_use]
    pub fn service_manager_endpoint(&self) -> &str {
        self.service_manager_endpoint.as_str()
    }
}
