//! CLI argument definitions for `qmpctl`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::LogFormat;

/// Command-line interface for talking to a VM's QMP socket.
#[derive(Parser, Debug)]
#[command(name = "qmpctl", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Path of the VM's QMP Unix socket.
    #[arg(long, env = "QMPCTL_SOCKET", value_name = "PATH")]
    pub(crate) socket: PathBuf,
    /// Tracing filter expression, for example `qmp_client=debug`.
    #[arg(long, env = "QMPCTL_LOG_FILTER", default_value = "warn")]
    pub(crate) log_filter: String,
    /// Log output format written to stderr.
    #[arg(long, env = "QMPCTL_LOG_FORMAT", default_value_t = LogFormat::Compact)]
    pub(crate) log_format: LogFormat,
    /// Seconds to wait for the socket, the greeting and each command.
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub(crate) timeout: u64,
    /// Operation to perform.
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Operations supported by `qmpctl`.
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum CliCommand {
    /// Prints the VM's greeting as JSON.
    Version,
    /// Negotiates capabilities and exits.
    Capabilities,
    /// Pauses the VM.
    Stop,
    /// Resumes the VM.
    Cont,
    /// Terminates the VM process.
    Quit,
    /// Asks the guest to power down and waits for it to shut down.
    Powerdown,
    /// Runs an arbitrary command and prints its return value.
    Exec(ExecArgs),
    /// Detaches a device and waits for the VM to confirm.
    DeviceDel {
        /// Identifier of the device to remove.
        id: String,
    },
    /// Prints events as JSON lines until the VM disconnects.
    Events {
        /// Stops after this many events.
        #[arg(long)]
        count: Option<usize>,
    },
}

/// Arguments for `qmpctl exec`.
#[derive(Args, Debug, Clone)]
pub(crate) struct ExecArgs {
    /// Command name, for example `query-status`.
    pub(crate) name: String,
    /// Command arguments as a JSON object.
    #[arg(long, value_name = "JSON")]
    pub(crate) args: Option<String>,
    /// Event that must arrive before the command counts as complete.
    #[arg(long, value_name = "EVENT")]
    pub(crate) wait_event: Option<String>,
    /// Event data key that must match `--event-value`.
    #[arg(long, requires = "wait_event", requires = "event_value")]
    pub(crate) event_key: Option<String>,
    /// Expected string under `--event-key`.
    #[arg(long, requires = "event_key")]
    pub(crate) event_value: Option<String>,
}
