//! Command-line runtime for `xpcman`.
//!
//! The runtime parses flags, loads layered configuration, validates the
//! selected command, and runs it over the native messaging layer. Tests
//! substitute the configuration loader, the IO streams, and the native layer.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use clap::{CommandFactory, Parser};
use tracing::info;
use xpcman_config::Config;
use xpcman_ipc::native::{self, NativeLayer};
use xpcman_ipc::{
    Connection, ConnectionOptions, Endpoint, LoggingHandler, ServiceManager, ServiceRequest,
};

mod cli;
mod command;
mod config;
mod errors;
mod output;
mod telemetry;

use cli::Cli;
use command::{CommandInvocation, SendInvocation};
use config::split_config_arguments;
pub(crate) use config::{ConfigLoader, OrthoConfigLoader};
use errors::AppError;

const CLI_TARGET: &str = concat!(env!("CARGO_CRATE_NAME"), "::runner");

/// Writers the runtime prints replies and diagnostics to.
pub(crate) struct IoStreams<'a, W: Write, E: Write> {
    pub(crate) stdout: &'a mut W,
    pub(crate) stderr: &'a mut E,
}

impl<'a, W: Write, E: Write> IoStreams<'a, W, E> {
    pub(crate) fn new(stdout: &'a mut W, stderr: &'a mut E) -> Self {
        Self { stdout, stderr }
    }
}

struct CliRunner<'a, 'io, W: Write, E: Write, L: ConfigLoader> {
    io: &'a mut IoStreams<'io, W, E>,
    loader: &'a L,
    layer: &'a dyn NativeLayer,
    install_telemetry: bool,
}

impl<'a, 'io, W, E, L> CliRunner<'a, 'io, W, E, L>
where
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    fn new(io: &'a mut IoStreams<'io, W, E>, loader: &'a L, layer: &'a dyn NativeLayer) -> Self {
        Self {
            io,
            loader,
            layer,
            install_telemetry: false,
        }
    }

    const fn with_telemetry(mut self) -> Self {
        self.install_telemetry = true;
        self
    }

    fn run<I>(&mut self, args: I) -> ExitCode
    where
        I: IntoIterator<Item = OsString>,
    {
        let args: Vec<OsString> = args.into_iter().collect();
        match self.try_run(&args) {
            Ok(()) => ExitCode::SUCCESS,
            Err(AppError::CliUsage(error)) if !error.use_stderr() => {
                let _ = write!(self.io.stdout, "{error}");
                ExitCode::SUCCESS
            }
            Err(error) => {
                let _ = writeln!(self.io.stderr, "{error}");
                if error.shows_usage() {
                    let _ = writeln!(self.io.stderr, "{}", Cli::command().render_help());
                }
                ExitCode::FAILURE
            }
        }
    }

    fn try_run(&mut self, args: &[OsString]) -> Result<(), AppError> {
        let split = split_config_arguments(args);
        let cli = Cli::try_parse_from(&split.command_arguments).map_err(AppError::CliUsage)?;
        let config = self.loader.load(&split.config_arguments)?;
        if self.install_telemetry {
            telemetry::initialise(&config)?;
        }

        match CommandInvocation::try_from(cli)? {
            CommandInvocation::Catalogue(request) => self.execute_catalogue(&request, &config),
            CommandInvocation::Send(send) => self.execute_send(send, &config),
            CommandInvocation::Listen => Err(AppError::NotImplemented { command: "listen" }),
        }
    }

    fn execute_catalogue(
        &mut self,
        request: &ServiceRequest,
        config: &Config,
    ) -> Result<(), AppError> {
        let manager = ServiceManager::new(self.layer, config.service_manager_endpoint())
            .with_timeout(config.reply_timeout())
            .with_options(connection_options(config));
        let reply = manager
            .execute(request)
            .map_err(|source| AppError::Request {
                operation: request.operation(),
                source,
            })?;
        match request {
            ServiceRequest::ProcInfo { .. } => output::write_raw(self.io.stdout, &reply),
            _ => output::write_json(self.io.stdout, &reply),
        }
    }

    fn execute_send(&mut self, send: SendInvocation, config: &Config) -> Result<(), AppError> {
        let endpoint = Endpoint::new(send.service.as_str(), send.namespace);
        let handler = Arc::new(LoggingHandler::new(send.service.as_str()));
        let connection =
            Connection::connect(self.layer, endpoint, handler, connection_options(config));
        info!(
            target: CLI_TARGET,
            service = %send.service,
            namespace = %send.namespace,
            expect_reply = send.expect_reply,
            "sending data"
        );

        if send.expect_reply {
            let reply = connection.send_with_reply(send.payload, config.reply_timeout());
            connection.close();
            let reply = reply.map_err(|source| AppError::Request {
                operation: "send",
                source,
            })?;
            return output::write_json(self.io.stdout, &reply);
        }

        let sent = connection.send(send.payload);
        if sent.is_ok() {
            // Asynchronous events for the send are logged by the handler
            // while the connection stays open.
            thread::sleep(config.event_linger());
        }
        connection.close();
        sent.map_err(|source| AppError::Request {
            operation: "send",
            source,
        })
    }
}

fn connection_options(config: &Config) -> ConnectionOptions {
    ConnectionOptions::with_transport_errors(config.transport_errors())
}

/// Runs the CLI using the provided arguments and IO handles.
///
/// Configuration is loaded with `ortho_config`, logging is installed on the
/// first call, and requests travel over the host's native messaging layer.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let layer = native::system_layer();
    let mut io = IoStreams::new(stdout, stderr);
    CliRunner::new(&mut io, &OrthoConfigLoader, layer.as_ref())
        .with_telemetry()
        .run(args)
}

/// Runs the CLI with a custom configuration loader and native layer. Logging
/// is left to the caller.
#[cfg(test)]
pub(crate) fn run_with_layer<I, W, E, L>(
    args: I,
    io: &mut IoStreams<'_, W, E>,
    loader: &L,
    layer: &dyn NativeLayer,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    CliRunner::new(io, loader, layer).run(args)
}

#[cfg(test)]
mod tests;
