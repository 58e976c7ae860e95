use parking_lot::Mutex;

/// Fixed-size pool of page-sized buffers, shared by every frame so steady
/// state allocates nothing on the hit or miss path. Sized at construction
/// to `ceil(frame_capacity * 1.25)` buffers so a burst of concurrent misses
/// never blocks on buffer availability while eviction catches up.
pub struct RentalPool {
    page_size: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl RentalPool {
    pub fn new(page_size: usize, capacity: usize) -> Self {
        let free = (0..capacity).map(|_| vec![0u8; page_size]).collect();
        Self {
            page_size,
            free: Mutex::new(free),
        }
    }

    /// Takes a buffer from the pool. Falls back to a fresh allocation if the
    /// pool is momentarily starved rather than ever failing admission. The
    /// 1.25x headroom is sized so this fallback path is not expected to be
    /// exercised in steady state.
    pub fn rent(&self) -> Vec<u8> {
        let mut free = self.free.lock();
        match free.pop() {
            Some(mut buf) => {
                buf.resize(self.page_size, 0);
                buf
            }
            None => vec![0u8; self.page_size],
        }
    }

    /// Returns a buffer to the pool. The buffer must not be retained or
    /// dereferenced by the caller after this call.
    pub fn give_back(&self, buf: Vec<u8>) {
        self.free.lock().push(buf);
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }
}
