//! CLI entrypoint for `qmpctl`.
//!
//! The binary delegates to [`qmpctl::run`], which parses arguments, connects
//! to the VM's QMP socket and runs a single operation.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    qmpctl::run(std::env::args_os(), &mut stdout, &mut stderr)
}
