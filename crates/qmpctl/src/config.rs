//! Runtime settings resolved from flags and environment.

use std::path::PathBuf;
use std::time::Duration;

use strum::{Display, EnumString};

use crate::cli::Cli;

/// Supported logging output formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Structured JSON suitable for ingestion by logging stacks.
    Json,
    /// Human-readable single line output.
    #[default]
    Compact,
}

/// Settings shared by every subcommand.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) socket: PathBuf,
    pub(crate) log_filter: String,
    pub(crate) log_format: LogFormat,
    pub(crate) timeout: Duration,
}

impl From<&Cli> for Settings {
    fn from(cli: &Cli) -> Self {
        Self {
            socket: cli.socket.clone(),
            log_filter: cli.log_filter.clone(),
            log_format: cli.log_format,
            timeout: Duration::from_secs(cli.timeout),
        }
    }
}
