//! Shared helpers for the CLI runtime tests.

use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use xpcman_config::{Config, DEFAULT_SERVICE_MANAGER_ENDPOINT};
use xpcman_ipc::Endpoint;
use xpcman_ipc::native::fake::FakeNativeLayer;

use crate::{AppError, ConfigLoader, IoStreams, run_with_layer};

pub(super) struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    pub(super) const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self, _args: &[OsString]) -> Result<Config, AppError> {
        Ok(self.config.clone())
    }
}

/// Configuration with short waits so tests never linger.
pub(super) fn test_config() -> Config {
    Config {
        reply_timeout_ms: 500,
        event_linger_ms: 0,
        ..Config::default()
    }
}

pub(super) fn service_manager() -> Endpoint {
    Endpoint::privileged(DEFAULT_SERVICE_MANAGER_ENDPOINT)
}

pub(super) fn encode_data(json: &str) -> String {
    BASE64_STANDARD.encode(json.as_bytes())
}

/// Captured result of one CLI invocation.
pub(super) struct Outcome {
    pub(super) exit: ExitCode,
    pub(super) stdout: String,
    pub(super) stderr: String,
}

pub(super) fn run_cli(layer: &FakeNativeLayer, config: Config, args: &[&str]) -> Outcome {
    let mut stdout: Vec<u8> = Vec::new();
    let mut stderr: Vec<u8> = Vec::new();
    let arguments = std::iter::once("xpcman")
        .chain(args.iter().copied())
        .map(OsString::from);
    let loader = StaticConfigLoader::new(config);
    let exit = {
        let mut io = IoStreams::new(&mut stdout, &mut stderr);
        run_with_layer(arguments, &mut io, &loader, layer)
    };
    Outcome {
        exit,
        stdout: String::from_utf8(stdout).expect("stdout utf8"),
        stderr: String::from_utf8(stderr).expect("stderr utf8"),
    }
}

pub(super) fn read_fixture(name: &str) -> Result<String> {
    let normalized = name.trim().trim_matches('"');
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("golden");
    path.push(normalized);
    fs::read_to_string(&path).with_context(|| format!("read fixture at {}", path.display()))
}
