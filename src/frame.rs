use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::latch::Latch;
use crate::PageId;

/// The unit of residence: a page's buffer, its latch, and its dirty flag.
/// `page_id` is immutable for the life of the frame; the buffer is owned
/// exclusively by the frame and is returned to the rental pool only on
/// destruction.
pub struct Frame {
    page_id: PageId,
    buffer: Mutex<Option<Vec<u8>>>,
    dirty: AtomicBool,
    latch: Latch,
    last_access: Mutex<Instant>,
}

impl Frame {
    pub fn new(page_id: PageId, buffer: Vec<u8>) -> Self {
        Self {
            page_id,
            buffer: Mutex::new(Some(buffer)),
            dirty: AtomicBool::new(false),
            latch: Latch::new(),
            last_access: Mutex::new(Instant::now()),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn latch(&self) -> &Latch {
        &self.latch
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn set_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    pub fn any_latch_held(&self) -> bool {
        self.latch.is_held()
    }

    pub fn has_read_latch(&self) -> bool {
        self.latch.has_read_latch()
    }

    pub fn has_write_latch(&self) -> bool {
        self.latch.has_write_latch()
    }

    pub fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    /// Copies the frame's buffer contents into `out`. Requires the caller
    /// to hold at least a read latch (enforced by callers in `manager`).
    pub fn copy_into(&self, out: &mut [u8]) {
        let guard = self.buffer.lock();
        out.copy_from_slice(guard.as_ref().expect("frame buffer missing while resident"));
    }

    /// Runs `op` against the frame's buffer without copying it. Used by
    /// `flush` to pass the bytes straight to the store's write call.
    pub fn with_buffer<R>(&self, op: impl FnOnce(&[u8]) -> crate::error::Result<R>) -> crate::error::Result<R> {
        let guard = self.buffer.lock();
        op(guard.as_ref().expect("frame buffer missing while resident"))
    }

    /// Overwrites the frame's buffer contents from `data`. Requires the
    /// caller to hold the write latch.
    pub fn copy_from(&self, data: &[u8]) {
        let mut guard = self.buffer.lock();
        guard
            .as_mut()
            .expect("frame buffer missing while resident")
            .copy_from_slice(data);
    }

    /// Takes the buffer out of the frame, for returning to the rental pool
    /// on eviction. The frame must not be used afterward.
    pub fn take_buffer(&self) -> Vec<u8> {
        self.buffer
            .lock()
            .take()
            .expect("take_buffer called more than once")
    }

    pub fn stats(&self) -> FrameStats {
        FrameStats {
            page_id: self.page_id,
            dirty: self.is_dirty(),
            any_latch_held: self.any_latch_held(),
            last_access: *self.last_access.lock(),
        }
    }
}

/// Diagnostic snapshot of a resident frame.
#[derive(Debug, Clone)]
pub struct FrameStats {
    pub page_id: PageId,
    pub dirty: bool,
    pub any_latch_held: bool,
    pub last_access: Instant,
}
