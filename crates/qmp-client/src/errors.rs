//! Error types surfaced by the QMP client.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::message::ReplyError;

/// Errors returned by [`crate::QmpSession`] and its startup sequence.
#[derive(Debug, Error)]
pub enum QmpError {
    /// Connecting to the control socket failed.
    #[error("failed to connect to QMP socket {}: {source}", .path.display())]
    Dial {
        /// Socket path that was dialled.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The transport could not be prepared for reading.
    #[error("failed to prepare QMP transport: {0}")]
    Transport(#[source] io::Error),

    /// A background thread could not be started.
    #[error("failed to spawn QMP {thread} thread: {source}")]
    Spawn {
        /// Name of the thread that failed to start.
        thread: &'static str,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The greeting did not carry usable version information.
    #[error("failed to find QMP version information in the greeting")]
    HandshakeFailed,

    /// The stream closed before the greeting arrived.
    #[error("lost connection to the VM before the QMP greeting arrived")]
    ConnectionLost,

    /// The caller cancelled startup before the greeting arrived.
    #[error("QMP startup cancelled by caller")]
    StartupCancelled,

    /// The session ended before the command produced a result.
    #[error("QMP connection closed, command cancelled")]
    ConnectionClosed,

    /// The VM answered the command with an error reply.
    #[error("QMP command {command} failed: {desc} ({class})")]
    CommandFailed {
        /// Name of the failed command.
        command: String,
        /// Error class reported by the VM.
        class: String,
        /// Human-readable description reported by the VM.
        desc: String,
    },

    /// Writing the command to the socket failed.
    #[error("unable to write command {command} to the QMP socket: {source}")]
    Write {
        /// Name of the command being written.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The command could not be serialised.
    #[error("unable to encode command {command}: {source}")]
    Encode {
        /// Name of the command being encoded.
        command: String,
        /// The underlying codec error.
        #[source]
        source: serde_json::Error,
    },

    /// The caller's cancellation token fired.
    #[error("command cancelled by caller")]
    Cancelled,

    /// The caller's deadline passed before a result arrived.
    #[error("deadline exceeded while waiting for the VM")]
    DeadlineExceeded,
}

impl QmpError {
    /// Builds a `CommandFailed` error from an error reply.
    pub(crate) fn command_failed(command: &str, reply: ReplyError) -> Self {
        Self::CommandFailed {
            command: command.to_owned(),
            class: reply.class,
            desc: reply.desc,
        }
    }
}
