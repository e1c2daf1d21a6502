//! Error types for the CLI runtime.

use std::io;
use std::sync::Arc;

use thiserror::Error;
use xpcman_ipc::IpcError;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to initialise logging: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("missing command")]
    MissingCommand,
    #[error("missing service name")]
    MissingService,
    #[error("missing file argument")]
    MissingFile,
    #[error("missing target pid")]
    MissingPid,
    #[error("missing program")]
    MissingProgram,
    #[error("missing data or service name to send")]
    MissingSendArguments,
    #[error("cannot read property list {path}: {source}")]
    UnreadableFile { path: String, source: io::Error },
    #[error("failed to decode --data as base64: {0}")]
    DecodeData(base64::DecodeError),
    #[error("failed to parse --data as JSON: {0}")]
    ParseData(serde_json::Error),
    #[error("invalid --data payload: {0}")]
    InvalidPayload(IpcError),
    #[error("the {command} command is not implemented")]
    NotImplemented { command: &'static str },
    #[error("{operation} failed: {source}")]
    Request {
        operation: &'static str,
        source: IpcError,
    },
    #[error("failed to serialise reply: {0}")]
    SerialiseReply(serde_json::Error),
    #[error("failed to write output: {0}")]
    WriteOutput(io::Error),
}

impl AppError {
    /// Argument errors are followed by the usage text.
    pub(crate) const fn shows_usage(&self) -> bool {
        matches!(
            self,
            Self::MissingCommand
                | Self::MissingService
                | Self::MissingFile
                | Self::MissingPid
                | Self::MissingProgram
                | Self::MissingSendArguments
        )
    }
}
