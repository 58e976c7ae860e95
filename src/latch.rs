use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::cancel::CancelToken;
use crate::error::{BufferPoolError, Result};

/// Which direction of latch a caller wants (or, for `read_through`, none at all).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchKind {
    None,
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unlatched,
    Read(usize),
    Write,
}

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Per-frame reader-writer latch. Multiple concurrent readers xor a single
/// writer. Unlike a scope-guard lock, acquisition and release are two
/// independent public calls (`lease`/`return` on the buffer manager), so
/// this is hand-rolled over a `Mutex<State>` + `Condvar` rather than
/// `parking_lot::RwLock`, whose guard cannot outlive the stack frame that
/// acquired it. Acquisition cooperatively suspends and polls the ambient
/// cancellation signal rather than blocking indefinitely.
pub struct Latch {
    state: Mutex<State>,
    condvar: Condvar,
}

impl Latch {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Unlatched),
            condvar: Condvar::new(),
        }
    }

    /// Blocks (cooperatively suspending) until `kind` is grantable, or
    /// returns `Cancelled` if `cancel` fires first. `kind` must not be
    /// `LatchKind::None`; callers enforce `BadLatchRequest` before reaching
    /// here.
    pub fn acquire(&self, kind: LatchKind, cancel: &CancelToken) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            let granted = match (kind, *state) {
                (LatchKind::Read, State::Unlatched) => Some(State::Read(1)),
                (LatchKind::Read, State::Read(n)) => Some(State::Read(n + 1)),
                (LatchKind::Read, State::Write) => None,
                (LatchKind::Write, State::Unlatched) => Some(State::Write),
                (LatchKind::Write, State::Read(_)) | (LatchKind::Write, State::Write) => None,
                (LatchKind::None, _) => unreachable!("BadLatchRequest must be rejected earlier"),
            };
            if let Some(next) = granted {
                *state = next;
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(BufferPoolError::Cancelled);
            }
            self.condvar.wait_for(&mut state, POLL_INTERVAL);
            if cancel.is_cancelled() {
                return Err(BufferPoolError::Cancelled);
            }
        }
    }

    /// Non-blocking best-effort acquisition, for internal callers (eviction
    /// eligibility checks) that must not suspend.
    pub fn try_acquire(&self, kind: LatchKind) -> bool {
        let mut state = self.state.lock();
        let granted = match (kind, *state) {
            (LatchKind::Read, State::Unlatched) => Some(State::Read(1)),
            (LatchKind::Read, State::Read(n)) => Some(State::Read(n + 1)),
            (LatchKind::Write, State::Unlatched) => Some(State::Write),
            _ => None,
        };
        match granted {
            Some(next) => {
                *state = next;
                true
            }
            None => false,
        }
    }

    pub fn release(&self, kind: LatchKind) {
        let mut state = self.state.lock();
        *state = match (kind, *state) {
            (LatchKind::Read, State::Read(n)) if n > 1 => State::Read(n - 1),
            (LatchKind::Read, State::Read(1)) => State::Unlatched,
            (LatchKind::Write, State::Write) => State::Unlatched,
            (_, current) => current, // caller error: releasing a kind not held; no-op
        };
        drop(state);
        self.condvar.notify_all();
    }

    pub fn is_held(&self) -> bool {
        !matches!(*self.state.lock(), State::Unlatched)
    }

    pub fn has_read_latch(&self) -> bool {
        matches!(*self.state.lock(), State::Read(_))
    }

    pub fn has_write_latch(&self) -> bool {
        matches!(*self.state.lock(), State::Write)
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_readers_allowed() {
        let latch = Latch::new();
        let cancel = CancelToken::new();
        latch.acquire(LatchKind::Read, &cancel).unwrap();
        latch.acquire(LatchKind::Read, &cancel).unwrap();
        assert!(latch.is_held());
        assert!(latch.has_read_latch());
        assert!(!latch.has_write_latch());
    }

    #[test]
    fn has_read_latch_is_false_for_writer_or_unlatched() {
        let latch = Latch::new();
        let cancel = CancelToken::new();
        assert!(!latch.has_read_latch());
        latch.acquire(LatchKind::Write, &cancel).unwrap();
        assert!(!latch.has_read_latch());
    }

    #[test]
    fn writer_excludes_readers_until_released() {
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        let latch = Arc::new(Latch::new());
        let cancel = CancelToken::new();
        latch.acquire(LatchKind::Write, &cancel).unwrap();

        let reader_latch = Arc::clone(&latch);
        let handle = thread::spawn(move || {
            let cancel = CancelToken::new();
            reader_latch.acquire(LatchKind::Read, &cancel).unwrap();
        });
        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        latch.release(LatchKind::Write);
        handle.join().unwrap();
    }

    #[test]
    fn cancellation_unblocks_a_waiting_writer() {
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        let latch = Arc::new(Latch::new());
        let holder_cancel = CancelToken::new();
        latch.acquire(LatchKind::Read, &holder_cancel).unwrap();

        let writer_latch = Arc::clone(&latch);
        let writer_cancel = CancelToken::new();
        let waiter_cancel = writer_cancel.clone();
        let handle = thread::spawn(move || writer_latch.acquire(LatchKind::Write, &waiter_cancel));
        thread::sleep(Duration::from_millis(20));
        writer_cancel.cancel();
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(BufferPoolError::Cancelled)));
    }
}
