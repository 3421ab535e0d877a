//! Session handle: startup, command submission and shutdown.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[cfg(unix)]
use std::path::Path;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::cancel::Cancellation;
use crate::engine::{Engine, EngineInput, PendingCommand};
use crate::errors::QmpError;
use crate::filter::EventFilter;
use crate::greeting::QmpVersion;
use crate::message::QmpEvent;
use crate::signal::DisconnectSignal;
use crate::transport::Transport;

/// Log target for session lifecycle messages.
pub(crate) const SESSION_TARGET: &str = "qmp_client::session";

/// Default bound on connecting to the control socket.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on waiting for a command's event when the caller set no
/// deadline.
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for starting a session.
#[derive(Debug, Clone)]
pub struct QmpConfig {
    event_sink: Option<Sender<QmpEvent>>,
    dial_timeout: Duration,
    event_timeout: Duration,
}

impl Default for QmpConfig {
    fn default() -> Self {
        Self {
            event_sink: None,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            event_timeout: DEFAULT_EVENT_TIMEOUT,
        }
    }
}

impl QmpConfig {
    /// Forwards every event the VM emits to `sink`.
    ///
    /// The sender is dropped when the session ends, so a receiver loop
    /// terminates on disconnect.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Sender<QmpEvent>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// Sets how long [`QmpSession::start`] may spend connecting.
    #[must_use]
    pub const fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Sets the deadline applied to event-gated commands submitted without
    /// one.
    #[must_use]
    pub const fn with_event_timeout(mut self, timeout: Duration) -> Self {
        self.event_timeout = timeout;
        self
    }
}

/// Where a session handle is in its lifetime.
///
/// Dialling and the greeting happen inside [`QmpSession::start`], so a handle
/// is always at least [`SessionState::Running`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Commands are accepted.
    Running,
    /// Shutdown was requested and the engine is draining.
    ShuttingDown,
    /// The engine has exited. Terminal.
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Running => "running",
            Self::ShuttingDown => "shutting down",
            Self::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

/// A connected QMP session.
///
/// Commands are written one at a time in submission order. The handle may be
/// shared between threads; each [`Self::execute`] call blocks only its own
/// thread. Dropping the handle shuts the session down and waits for the
/// engine to finish.
#[derive(Debug)]
pub struct QmpSession {
    inbox: Sender<EngineInput>,
    disconnected: DisconnectSignal,
    version: QmpVersion,
    event_timeout: Duration,
    shutdown_requested: AtomicBool,
    engine: Option<JoinHandle<()>>,
}

impl QmpSession {
    /// Connects to the Unix socket at `socket` and completes the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`QmpError::Dial`] if the socket cannot be reached, and any
    /// error from [`Self::start_with_transport`].
    #[cfg(unix)]
    pub fn start(
        socket: impl AsRef<Path>,
        config: QmpConfig,
        cancellation: &Cancellation,
    ) -> Result<(Self, QmpVersion), QmpError> {
        let path = socket.as_ref();
        if cancellation.is_fired() {
            return Err(QmpError::StartupCancelled);
        }
        debug!(
            target: SESSION_TARGET,
            socket = %path.display(),
            "dialling QMP socket"
        );
        let stream = crate::transport::dial(path, config.dial_timeout)?;
        Self::start_with_transport(stream, config, cancellation)
    }

    /// Runs a session over an already connected transport.
    ///
    /// Blocks until the greeting has been processed or `cancellation` fires.
    /// On failure the session is torn down before this returns.
    ///
    /// # Errors
    ///
    /// - [`QmpError::HandshakeFailed`] when the greeting is malformed.
    /// - [`QmpError::ConnectionLost`] when the stream closes first.
    /// - [`QmpError::StartupCancelled`] when `cancellation` fires first.
    /// - [`QmpError::Transport`] or [`QmpError::Spawn`] when the session
    ///   threads cannot be set up.
    pub fn start_with_transport<T: Transport>(
        transport: T,
        config: QmpConfig,
        cancellation: &Cancellation,
    ) -> Result<(Self, QmpVersion), QmpError> {
        let stream = transport.reader().map_err(QmpError::Transport)?;
        let (inbox, receiver) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let disconnected = DisconnectSignal::default();

        let engine = Engine::new(transport, receiver, config.event_sink);
        let feed = inbox.clone();
        let signal = disconnected.clone();
        let handle = thread::Builder::new()
            .name("qmp-engine".to_owned())
            .spawn(move || engine.run(stream, feed, ready_tx, signal))
            .map_err(|source| QmpError::Spawn {
                thread: "engine",
                source,
            })?;

        let startup = match cancellation.wait_for(&ready_rx) {
            Ok(Some(startup)) => startup,
            Ok(None) => Err(QmpError::ConnectionLost),
            Err(_) => Err(QmpError::StartupCancelled),
        };
        match startup {
            Ok(version) => {
                let session = Self {
                    inbox,
                    disconnected,
                    version: version.clone(),
                    event_timeout: config.event_timeout,
                    shutdown_requested: AtomicBool::new(false),
                    engine: Some(handle),
                };
                Ok((session, version))
            }
            Err(error) => {
                debug!(target: SESSION_TARGET, error = %error, "QMP startup failed");
                let _ = inbox.send(EngineInput::Shutdown);
                join_engine(handle);
                Err(error)
            }
        }
    }

    /// Version and capabilities announced in the greeting.
    #[must_use]
    pub const fn version(&self) -> &QmpVersion {
        &self.version
    }

    /// Signal set once the session has disconnected.
    #[must_use]
    pub fn disconnected(&self) -> DisconnectSignal {
        self.disconnected.clone()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.disconnected.is_set() {
            SessionState::Disconnected
        } else if self.shutdown_requested.load(Ordering::SeqCst) {
            SessionState::ShuttingDown
        } else {
            SessionState::Running
        }
    }

    /// Runs `name` and waits for its outcome.
    ///
    /// When `filter` is set the command completes only after both a
    /// successful reply and a matching event.
    ///
    /// # Errors
    ///
    /// See [`Self::execute_with_return`].
    pub fn execute(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
        filter: Option<EventFilter>,
        cancellation: &Cancellation,
    ) -> Result<(), QmpError> {
        self.execute_with_return(name, arguments, filter, cancellation)
            .map(|_| ())
    }

    /// Runs `name` and returns the `return` payload of its reply.
    ///
    /// An event-gated command submitted without a deadline waits at most the
    /// configured event timeout.
    ///
    /// # Errors
    ///
    /// - [`QmpError::CommandFailed`] when the VM rejects the command.
    /// - [`QmpError::ConnectionClosed`] when the session ends first, or had
    ///   already ended.
    /// - [`QmpError::Cancelled`] or [`QmpError::DeadlineExceeded`] when
    ///   `cancellation` fires first. The command stays queued.
    /// - [`QmpError::Write`] or [`QmpError::Encode`] when the command could
    ///   not be sent.
    pub fn execute_with_return(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
        filter: Option<EventFilter>,
        cancellation: &Cancellation,
    ) -> Result<Value, QmpError> {
        if self.disconnected.is_set() {
            return Err(QmpError::ConnectionClosed);
        }
        cancellation.check()?;

        let waiting = if filter.is_some() && cancellation.deadline().is_none() {
            cancellation.clone().and_timeout(self.event_timeout)
        } else {
            cancellation.clone()
        };
        let (command, results) = PendingCommand::new(name, arguments, filter, waiting.clone());
        if self.inbox.send(EngineInput::Submit(command)).is_err() {
            return Err(QmpError::ConnectionClosed);
        }
        waiting
            .wait_for(&results)?
            .unwrap_or(Err(QmpError::ConnectionClosed))
    }

    /// Requests teardown without waiting for it.
    ///
    /// Outstanding commands fail with [`QmpError::ConnectionClosed`]. Calls
    /// after the session has ended do nothing.
    pub fn shutdown(&self) {
        if self.disconnected.is_set() || self.shutdown_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(target: SESSION_TARGET, "QMP shutdown requested");
        // The engine may already be gone.
        let _ = self.inbox.send(EngineInput::Shutdown);
    }
}

impl Drop for QmpSession {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.engine.take() {
            join_engine(handle);
        }
    }
}

fn join_engine(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        warn!(target: SESSION_TARGET, "QMP engine thread panicked");
    }
}
