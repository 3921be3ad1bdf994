//! Shared stop signal for the periodic loops.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A latch every loop waits on between ticks.
///
/// Cloning shares the latch. Once [`stop`](Self::stop) is called, every
/// pending and future [`wait`](Self::wait) returns immediately.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    stopped: Mutex<bool>,
    cv: Condvar,
}

impl StopSignal {
    /// Creates an unset signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the signal and wakes all waiters.
    pub fn stop(&self) {
        let mut stopped = self.inner.stopped.lock();
        *stopped = true;
        self.inner.cv.notify_all();
    }

    /// Returns true once the signal is set.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.inner.stopped.lock()
    }

    /// Sleeps up to `timeout`. Returns true if the signal was set.
    ///
    /// A timeout too large to express as a deadline waits for the signal.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut stopped = self.inner.stopped.lock();
        while !*stopped {
            match deadline {
                Some(deadline) => {
                    if self.inner.cv.wait_until(&mut stopped, deadline).timed_out() {
                        break;
                    }
                }
                None => self.inner.cv.wait(&mut stopped),
            }
        }
        *stopped
    }
}
