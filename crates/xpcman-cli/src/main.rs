//! CLI entrypoint for `xpcman`.
//!
//! The binary delegates to [`xpcman_cli::run`]. Only stdout is locked here:
//! connection delivery threads log to stderr while the command runs.

use std::io::{self, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr = io::stderr();
    xpcman_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
