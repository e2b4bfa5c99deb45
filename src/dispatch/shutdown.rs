//! Session-wide cancellation flag with interruptible waits

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Shared shutdown flag.
///
/// Checked at the top of every worker loop and around every blocking call.
/// [`ShutdownSignal::wait_timeout`] lets backoff sleeps end early.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    triggered: Mutex<bool>,
    wake: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let mut triggered = self
            .triggered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *triggered = true;
        self.wake.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self
            .triggered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sleep up to `timeout`. Returns true if shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut triggered = self
            .triggered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while !*triggered {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            triggered = self
                .wake
                .wait_timeout(triggered, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
        true
    }
}
