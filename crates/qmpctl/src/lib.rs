//! Command-line runtime for `qmpctl`.
//!
//! The runtime parses arguments, installs telemetry, opens a QMP session on
//! the configured socket and runs one operation. It is exercised both from
//! the binary entrypoint and from tests with in-memory output streams.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;
use std::sync::mpsc::{self, Receiver};

use clap::Parser;
use qmp_client::{Cancellation, EventFilter, QmpConfig, QmpEvent, QmpSession};
use serde_json::{Map, Value};
use tracing::{debug, info};

mod cli;
mod config;
mod errors;
mod output;
pub mod telemetry;

use cli::{Cli, CliCommand, ExecArgs};
pub use config::LogFormat;
use config::Settings;
use errors::AppError;
use output::{EventRecord, write_json_line};

const CLI_TARGET: &str = "qmpctl";

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) if !error.use_stderr() => {
            let _ = write!(stdout, "{error}");
            return ExitCode::SUCCESS;
        }
        Err(error) => {
            let _ = write!(stderr, "{}", AppError::CliUsage(error));
            return ExitCode::FAILURE;
        }
    };

    match execute(&cli, stdout) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let _ = writeln!(stderr, "{error}");
            ExitCode::FAILURE
        }
    }
}

fn execute<W: Write>(cli: &Cli, stdout: &mut W) -> Result<(), AppError> {
    let settings = Settings::from(cli);
    telemetry::initialise(&settings.log_filter, settings.log_format)?;

    let mut config = QmpConfig::default()
        .with_dial_timeout(settings.timeout)
        .with_event_timeout(settings.timeout);
    let events = if matches!(cli.command, CliCommand::Events { .. }) {
        let (sink, receiver) = mpsc::channel();
        config = config.with_event_sink(sink);
        Some(receiver)
    } else {
        None
    };

    let (session, version) = QmpSession::start(
        &settings.socket,
        config,
        &Cancellation::with_timeout(settings.timeout),
    )?;
    info!(
        target: CLI_TARGET,
        socket = %settings.socket.display(),
        "connected to QMP socket"
    );

    if matches!(cli.command, CliCommand::Version) {
        return write_json_line(stdout, &version);
    }

    let deadline = || Cancellation::with_timeout(settings.timeout);
    session.qmp_capabilities(&deadline())?;

    match &cli.command {
        CliCommand::Version | CliCommand::Capabilities => Ok(()),
        CliCommand::Stop => session.stop(&deadline()).map_err(AppError::from),
        CliCommand::Cont => session.cont(&deadline()).map_err(AppError::from),
        CliCommand::Quit => session.quit(&deadline()).map_err(AppError::from),
        CliCommand::Powerdown => session
            .system_powerdown(&deadline())
            .map_err(AppError::from),
        CliCommand::DeviceDel { id } => session
            .device_del(id, &deadline())
            .map_err(AppError::from),
        CliCommand::Exec(exec) => {
            let payload = run_exec(&session, exec, &deadline())?;
            write_json_line(stdout, &payload)
        }
        CliCommand::Events { count } => match events {
            Some(receiver) => stream_events(&receiver, *count, stdout),
            None => Ok(()),
        },
    }
}

fn run_exec(
    session: &QmpSession,
    exec: &ExecArgs,
    cancellation: &Cancellation,
) -> Result<Value, AppError> {
    let arguments = exec.args.as_deref().map(parse_arguments).transpose()?;
    let filter = exec.wait_event.as_ref().map(|event| {
        match (&exec.event_key, &exec.event_value) {
            (Some(key), Some(value)) => EventFilter::with_data(event, key, value),
            _ => EventFilter::named(event),
        }
    });
    debug!(
        target: CLI_TARGET,
        command = %exec.name,
        waits_for_event = filter.is_some(),
        "executing command"
    );
    session
        .execute_with_return(&exec.name, arguments, filter, cancellation)
        .map_err(AppError::from)
}

fn parse_arguments(raw: &str) -> Result<Map<String, Value>, AppError> {
    match serde_json::from_str::<Value>(raw).map_err(AppError::ParseArguments)? {
        Value::Object(map) => Ok(map),
        _ => Err(AppError::ArgumentsNotObject),
    }
}

/// Prints events until `count` have been seen or the session ends.
fn stream_events<W: Write>(
    events: &Receiver<QmpEvent>,
    count: Option<usize>,
    stdout: &mut W,
) -> Result<(), AppError> {
    let limit = count.unwrap_or(usize::MAX);
    for event in events.iter().take(limit) {
        write_json_line(stdout, &EventRecord::from(&event))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests;
