//! Configuration loading helpers for the CLI.
//!
//! Configuration flags are pulled out of the argument list wherever they
//! appear, so `ortho_config` only receives flags it understands and clap only
//! sees command flags.

use std::ffi::{OsStr, OsString};

use xpcman_config::Config;

use crate::errors::AppError;

/// CLI flags recognised by the configuration loader.
///
/// Keep in sync with the fields of `xpcman_config::Config`.
pub(crate) const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--log-filter",
    "--log-format",
    "--reply-timeout-ms",
    "--event-linger-ms",
    "--transport-errors",
    "--service-manager-endpoint",
];

pub(crate) trait ConfigLoader {
    /// Loads configuration from the configuration flags. The first argument
    /// is the binary name.
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Skip,
}

fn process_config_flag(argument: &OsStr) -> FlagAction {
    let argument_text = argument.to_string_lossy();
    if !argument_text.starts_with("--") {
        return FlagAction::Skip;
    }

    let (flag, has_inline_value) = match argument_text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (argument_text.as_ref(), false),
    };
    if CONFIG_CLI_FLAGS.contains(&flag) {
        FlagAction::Include {
            needs_value: !has_inline_value,
        }
    } else {
        FlagAction::Skip
    }
}

/// Arguments partitioned between the configuration loader and clap. Both
/// lists start with the binary name.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ConfigArgumentSplit {
    pub(crate) config_arguments: Vec<OsString>,
    pub(crate) command_arguments: Vec<OsString>,
}

pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let mut split = ConfigArgumentSplit::default();
    let mut arguments = args.iter();
    if let Some(binary) = arguments.next() {
        split.config_arguments.push(binary.clone());
        split.command_arguments.push(binary.clone());
    }

    while let Some(argument) = arguments.next() {
        match process_config_flag(argument) {
            FlagAction::Include { needs_value } => {
                split.config_arguments.push(argument.clone());
                if needs_value && let Some(value) = arguments.next() {
                    split.config_arguments.push(value.clone());
                }
            }
            FlagAction::Skip => split.command_arguments.push(argument.clone()),
        }
    }
    split
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[rstest]
    #[case("--log-filter=debug", FlagAction::Include { needs_value: false })]
    #[case("--log-filter", FlagAction::Include { needs_value: true })]
    #[case("--command", FlagAction::Skip)]
    #[case("list", FlagAction::Skip)]
    fn classifies_flags(#[case] argument: &str, #[case] expected: FlagAction) {
        assert_eq!(process_config_flag(OsStr::new(argument)), expected);
    }

    #[test]
    fn config_flags_are_extracted_anywhere() {
        let split = split_config_arguments(&os(&[
            "xpcman",
            "--command",
            "status",
            "--log-format",
            "json",
            "--service",
            "com.example",
            "--reply-timeout-ms=5",
        ]));
        assert_eq!(
            split.config_arguments,
            os(&["xpcman", "--log-format", "json", "--reply-timeout-ms=5"])
        );
        assert_eq!(
            split.command_arguments,
            os(&["xpcman", "--command", "status", "--service", "com.example"])
        );
    }

    #[test]
    fn empty_arguments_split_to_nothing() {
        assert_eq!(split_config_arguments(&[]), ConfigArgumentSplit::default());
    }
}
