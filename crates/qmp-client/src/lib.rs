//! Client for the QEMU Machine Protocol (QMP).
#![deny(missing_docs)]
//!
//! A [`QmpSession`] owns one control-socket connection. Commands submitted
//! from any thread are written strictly one at a time in submission order,
//! and each reply is credited to the oldest outstanding command. Commands
//! whose work finishes asynchronously can wait for a matching event through
//! an [`EventFilter`]. Every event is also forwarded to an optional
//! subscriber channel configured on [`QmpConfig`].
//!
//! The connection itself is abstracted by the [`Transport`] trait; a Unix
//! socket implementation and [`dial`] are provided.

mod cancel;
mod commands;
mod engine;
mod errors;
mod filter;
mod greeting;
mod message;
mod reader;
mod session;
mod signal;
mod transport;

pub use cancel::{CancelToken, Cancellation};
pub use errors::QmpError;
pub use filter::EventFilter;
pub use greeting::QmpVersion;
pub use message::QmpEvent;
pub use session::{
    DEFAULT_DIAL_TIMEOUT, DEFAULT_EVENT_TIMEOUT, QmpConfig, QmpSession, SessionState,
};
pub use signal::DisconnectSignal;
pub use transport::Transport;
#[cfg(unix)]
pub use transport::dial;

#[cfg(all(test, unix))]
mod tests;
