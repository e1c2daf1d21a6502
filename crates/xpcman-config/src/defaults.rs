use crate::logging::LogFormat;
use crate::policy::TransportErrorPolicy;

/// Default log filter expression used by the binary.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default reply timeout in milliseconds for reply-expecting sends.
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 30_000;

/// Default time in milliseconds a fire-and-forget send waits for
/// asynchronous events before the connection is closed.
pub const DEFAULT_EVENT_LINGER_MS: u64 = 500;

/// Reserved endpoint name of the system service manager.
pub const DEFAULT_SERVICE_MANAGER_ENDPOINT: &str = "com.apple.xpc.launchd.domain.system";

/// Default log filter expression used by the binary.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binary.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

/// Default reaction to transport interruptions.
#[must_use]
pub const fn default_transport_errors() -> TransportErrorPolicy {
    TransportErrorPolicy::Retain
}

/// Owned service-manager endpoint name.
#[must_use]
pub fn default_service_manager_endpoint() -> String {
    DEFAULT_SERVICE_MANAGER_ENDPOINT.to_owned()
}
