//! CLI argument definitions for `xpcman`.

use clap::{Parser, ValueEnum};

/// Command selected with `--command`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum CommandName {
    /// List all available services.
    List,
    /// Start a service.
    Start,
    /// Stop a service.
    Stop,
    /// Load a property-list file with the service manager.
    Load,
    /// Unload a property-list file.
    Unload,
    /// Obtain status information about a service.
    Status,
    /// Obtain process information for a pid.
    Procinfo,
    /// Send a dictionary to a service.
    Send,
    /// Submit a job to the service manager.
    Submit,
    /// Create a service and listen for connections (not implemented).
    Listen,
}

/// Command-line interface for the XPC and service-manager control tool.
#[derive(Parser, Debug, Default)]
#[command(name = "xpcman", about = "Inspect and control services over XPC")]
pub(crate) struct Cli {
    /// Command to execute.
    #[arg(long, value_enum)]
    pub(crate) command: Option<CommandName>,
    /// Service label or bundle id. `submit` uses it as the job label.
    #[arg(long)]
    pub(crate) service: Option<String>,
    /// Program to execute for `submit`.
    #[arg(long)]
    pub(crate) program: Option<String>,
    /// Keep the submitted program alive.
    #[arg(long)]
    pub(crate) keepalive: bool,
    /// Property-list path for `load` and `unload`.
    #[arg(long)]
    pub(crate) file: Option<String>,
    /// Target process id for `procinfo`.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub(crate) pid: i64,
    /// Base64-encoded JSON object to send with `send`.
    #[arg(long)]
    pub(crate) data: Option<String>,
    /// Look the service up in the privileged namespace.
    #[arg(long)]
    pub(crate) privileged: bool,
    /// Wait for and print the reply to `send`.
    #[arg(long)]
    pub(crate) expect_reply: bool,
}
