//! Pure builders for service-manager request dictionaries.

use std::fmt;

use crate::error::IpcError;
use crate::value::Dictionary;

/// Start or stop a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlAction {
    /// Start the service.
    Start,
    /// Stop the service.
    Stop,
}

impl ControlAction {
    /// Action name carried in the `action` key.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Restart behaviour of a submitted job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RestartPolicy {
    /// Run once.
    #[default]
    Never,
    /// Restart whenever the program exits.
    KeepAlive,
}

impl RestartPolicy {
    /// Maps the `--keepalive` flag to a policy.
    #[must_use]
    pub const fn from_keep_alive(keep_alive: bool) -> Self {
        if keep_alive {
            Self::KeepAlive
        } else {
            Self::Never
        }
    }

    const fn keep_alive(self) -> bool {
        matches!(self, Self::KeepAlive)
    }
}

/// One entry of the service-manager request catalogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceRequest {
    /// List services, optionally filtered by label.
    List {
        /// Label filter.
        name: Option<String>,
    },
    /// Start or stop a service.
    Control {
        /// Service label.
        name: String,
        /// Requested action.
        action: ControlAction,
    },
    /// Load a property-list job definition.
    Load {
        /// Property-list path.
        path: String,
    },
    /// Unload a property-list job definition.
    Unload {
        /// Property-list path.
        path: String,
    },
    /// Query one service.
    Status {
        /// Service label.
        name: String,
    },
    /// Describe a running process.
    ProcInfo {
        /// Process id.
        pid: i64,
    },
    /// Submit a minimal job.
    Submit {
        /// Job label.
        label: String,
        /// Executable path.
        program: String,
        /// Restart behaviour.
        restart: RestartPolicy,
    },
}

impl ServiceRequest {
    /// Operation name carried in the `type` key.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::List { .. } => "list",
            Self::Control { .. } => "control",
            Self::Load { .. } => "load",
            Self::Unload { .. } => "unload",
            Self::Status { .. } => "status",
            Self::ProcInfo { .. } => "procinfo",
            Self::Submit { .. } => "submit",
        }
    }

    /// The label, path, or pid the request is about.
    #[must_use]
    pub fn target(&self) -> String {
        match self {
            Self::List { name } => name.clone().unwrap_or_else(|| String::from("services")),
            Self::Control { name, .. } | Self::Status { name } => name.clone(),
            Self::Load { path } | Self::Unload { path } => path.clone(),
            Self::ProcInfo { pid } => format!("pid {pid}"),
            Self::Submit { label, .. } => label.clone(),
        }
    }

    /// Validates the request and builds its dictionary.
    ///
    /// # Errors
    ///
    /// Returns [`IpcError::InvalidArgument`] when a precondition fails.
    pub fn to_dictionary(&self) -> Result<Dictionary, IpcError> {
        match self {
            Self::List { name } => Ok(list(name.as_deref())),
            Self::Control { name, action } => control(name, *action),
            Self::Load { path } => load(path),
            Self::Unload { path } => unload(path),
            Self::Status { name } => status(name),
            Self::ProcInfo { pid } => procinfo(*pid),
            Self::Submit {
                label,
                program,
                restart,
            } => submit(label, program, *restart),
        }
    }
}

fn request(operation: &str) -> Dictionary {
    Dictionary::new().with("type", operation)
}

fn require<'a>(field: &str, operation: &str, value: &'a str) -> Result<&'a str, IpcError> {
    if value.trim().is_empty() {
        Err(IpcError::invalid_argument(format!(
            "{operation} requires a non-empty {field}"
        )))
    } else {
        Ok(value)
    }
}

/// `{type: "list", name?}`. An empty name lists every service.
#[must_use]
pub fn list(name: Option<&str>) -> Dictionary {
    let dictionary = request("list");
    match name.filter(|name| !name.trim().is_empty()) {
        Some(name) => dictionary.with("name", name),
        None => dictionary,
    }
}

/// `{type: "control", name, action}`.
///
/// # Errors
///
/// Rejects an empty name.
pub fn control(name: &str, action: ControlAction) -> Result<Dictionary, IpcError> {
    let name = require("name", "control", name)?;
    Ok(request("control")
        .with("name", name)
        .with("action", action.as_str()))
}

/// `{type: "load", path}`.
///
/// # Errors
///
/// Rejects an empty path.
pub fn load(path: &str) -> Result<Dictionary, IpcError> {
    let path = require("path", "load", path)?;
    Ok(request("load").with("path", path))
}

/// `{type: "unload", path}`.
///
/// # Errors
///
/// Rejects an empty path.
pub fn unload(path: &str) -> Result<Dictionary, IpcError> {
    let path = require("path", "unload", path)?;
    Ok(request("unload").with("path", path))
}

/// `{type: "status", name}`.
///
/// # Errors
///
/// Rejects an empty name.
pub fn status(name: &str) -> Result<Dictionary, IpcError> {
    let name = require("name", "status", name)?;
    Ok(request("status").with("name", name))
}

/// `{type: "procinfo", pid}`.
///
/// # Errors
///
/// Rejects pids that cannot name a process.
pub fn procinfo(pid: i64) -> Result<Dictionary, IpcError> {
    if pid <= 0 {
        return Err(IpcError::invalid_argument(format!(
            "procinfo requires a positive pid, got {pid}"
        )));
    }
    Ok(request("procinfo").with("pid", pid))
}

/// `{type: "submit", label, program, keepAlive}`.
///
/// # Errors
///
/// Rejects an empty label or program.
pub fn submit(label: &str, program: &str, restart: RestartPolicy) -> Result<Dictionary, IpcError> {
    let label = require("label", "submit", label)?;
    let program = require("program", "submit", program)?;
    Ok(request("submit")
        .with("label", label)
        .with("program", program)
        .with("keepAlive", restart.keep_alive()))
}
