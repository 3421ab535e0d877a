//! Per-call cancellation: an optional deadline and an optional token.
//!
//! Cancelling only ends the caller's wait. The session keeps treating the
//! command as queued until the VM answers it or the connection closes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::errors::QmpError;

/// How often a waiter re-checks its token while nothing arrives.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Shared flag that cancels every [`Cancellation`] built from it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Triggers the token. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`Self::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Cancellation signal attached to one call.
///
/// The default value never fires.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    deadline: Option<Instant>,
    token: Option<CancelToken>,
}

impl Cancellation {
    /// A signal that never fires.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Fires once `timeout` has elapsed from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::none().and_timeout(timeout)
    }

    /// Fires at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            token: None,
        }
    }

    /// Fires when `token` is cancelled.
    #[must_use]
    pub fn with_token(token: CancelToken) -> Self {
        Self {
            deadline: None,
            token: Some(token),
        }
    }

    /// Adds a timeout; the earlier of the two deadlines wins.
    #[must_use]
    pub fn and_timeout(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now().checked_add(timeout);
        self.deadline = match (self.deadline, candidate) {
            (Some(current), Some(candidate)) => Some(current.min(candidate)),
            (current, candidate) => current.or(candidate),
        };
        self
    }

    /// The deadline, if one is set.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns an error if the signal has fired.
    ///
    /// # Errors
    ///
    /// Returns [`QmpError::Cancelled`] when the token fired and
    /// [`QmpError::DeadlineExceeded`] when the deadline passed.
    pub fn check(&self) -> Result<(), QmpError> {
        if self.token.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(QmpError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(QmpError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Returns true once the signal has fired.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.check().is_err()
    }

    /// Blocks until `receiver` yields a value or the signal fires.
    ///
    /// `Ok(None)` means every sender hung up without sending.
    pub(crate) fn wait_for<T>(&self, receiver: &Receiver<T>) -> Result<Option<T>, QmpError> {
        if self.deadline.is_none() && self.token.is_none() {
            return Ok(receiver.recv().ok());
        }

        loop {
            match receiver.recv_timeout(self.poll_interval()) {
                Ok(value) => return Ok(Some(value)),
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
                Err(RecvTimeoutError::Timeout) => self.check()?,
            }
        }
    }

    fn poll_interval(&self) -> Duration {
        let until_deadline = self
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));
        match (&self.token, until_deadline) {
            (Some(_), Some(remaining)) => remaining.min(CANCEL_POLL_INTERVAL),
            (None, Some(remaining)) => remaining,
            (_, None) => CANCEL_POLL_INTERVAL,
        }
    }
}
