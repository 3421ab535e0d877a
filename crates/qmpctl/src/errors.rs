//! Error types for the CLI runtime.

use std::io;

use qmp_client::QmpError;
use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to initialise logging: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Qmp(#[from] QmpError),
    #[error("--args must be valid JSON: {0}")]
    ParseArguments(serde_json::Error),
    #[error("--args must be a JSON object")]
    ArgumentsNotObject,
    #[error("failed to serialise output: {0}")]
    SerialiseOutput(serde_json::Error),
    #[error("failed to write output: {0}")]
    WriteOutput(io::Error),
}
