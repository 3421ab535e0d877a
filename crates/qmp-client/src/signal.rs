//! One-shot signal raised when a session disconnects.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Signal set exactly once, when the session's engine has released the
/// transport and resolved every outstanding command.
#[derive(Debug, Clone, Default)]
pub struct DisconnectSignal {
    inner: Arc<SignalState>,
}

#[derive(Debug, Default)]
struct SignalState {
    fired: Mutex<bool>,
    changed: Condvar,
}

impl DisconnectSignal {
    pub(crate) fn fire(&self) {
        let mut fired = self.lock();
        *fired = true;
        self.inner.changed.notify_all();
    }

    /// Returns true once the session has disconnected.
    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.lock()
    }

    /// Blocks until the session disconnects.
    pub fn wait(&self) {
        let mut fired = self.lock();
        while !*fired {
            fired = self
                .inner
                .changed
                .wait(fired)
                .unwrap_or_else(|poison| poison.into_inner());
        }
    }

    /// Blocks for at most `timeout`; returns whether the session disconnected.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (fired, _) = self
            .inner
            .changed
            .wait_timeout_while(guard, timeout, |fired| !*fired)
            .unwrap_or_else(|poison| poison.into_inner());
        *fired
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        // A panicking waiter cannot leave the flag half-written.
        self.inner
            .fired
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}
