//! Connection policy knobs shared by the CLI and the IPC core.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How a connection reacts when the native channel reports an interruption.
///
/// The peer may restart and the native layer may reconnect on its own, so
/// keeping the connection is the default. `Close` treats every interruption
/// as terminal.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TransportErrorPolicy {
    /// Report the interruption and keep the connection usable.
    #[default]
    Retain,
    /// Report the interruption and invalidate the connection.
    Close,
}

/// Errors encountered while parsing a [`TransportErrorPolicy`] from text.
pub type TransportErrorPolicyParseError = strum::ParseError;
