use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Ambient cancellation signal threaded through every suspending operation.
///
/// Generalizes the shutdown-flag pattern used by background workers elsewhere
/// in this codebase into a per-call token: a waiter parked on a contended
/// latch or store read wakes as soon as `cancel()` is called instead of
/// polling an `AtomicBool` on a timer.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    condvar: Condvar,
    guard: Mutex<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                condvar: Condvar::new(),
                guard: Mutex::new(()),
            }),
        }
    }

    /// A token that can never be cancelled, for callers that don't need one.
    pub fn none() -> Self {
        Self::new()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let _guard = self.inner.guard.lock();
        self.inner.condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Parks the calling thread until either `timeout` elapses or the token
    /// is cancelled. Returns `true` if cancellation woke it.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let mut guard = self.inner.guard.lock();
        let result = self.inner.condvar.wait_for(&mut guard, timeout);
        !result.timed_out() || self.is_cancelled()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn cancel_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = thread::spawn(move || waiter.wait_timeout(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn uncancelled_token_reports_false() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }
}
