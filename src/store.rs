use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::{BufferPoolError, Result};
use crate::PageId;

/// Adapter over a single file: one page per fixed-size slot, addressed by
/// page-id. All access is sequenced through a single mutex (the store
/// latch) because the underlying file cursor is shared state: seek and
/// the following read/write must not interleave across threads.
pub struct BackingStore {
    file: Mutex<File>,
    page_size: usize,
}

impl BackingStore {
    pub fn open(path: impl AsRef<Path>, page_size: usize, frame_capacity: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let store = Self {
            file: Mutex::new(file),
            page_size,
        };
        store.preallocate((page_size as u64) * (frame_capacity as u64))?;
        store.advise_random_access();
        Ok(store)
    }

    fn preallocate(&self, bytes: u64) -> Result<()> {
        let file = self.file.lock();
        let current_len = file.metadata()?.len();
        if current_len >= bytes {
            return Ok(());
        }
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = file.as_raw_fd();
            // best-effort: a failure here still leaves set_len below as the
            // fallback, so the file is always at least the right length.
            let rc = unsafe { libc::posix_fallocate(fd, 0, bytes as libc::off_t) };
            if rc != 0 {
                warn!(rc, "posix_fallocate failed, falling back to set_len");
            }
        }
        file.set_len(bytes)?;
        Ok(())
    }

    fn advise_random_access(&self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let file = self.file.lock();
            let fd = file.as_raw_fd();
            let rc = unsafe { libc::posix_fadvise(fd, 0, 0, libc::POSIX_FADV_RANDOM) };
            if rc != 0 {
                warn!(rc, "posix_fadvise(RANDOM) failed, continuing without the hint");
            }
        }
    }

    fn offset(&self, page_id: PageId) -> u64 {
        (page_id - 1) * self.page_size as u64
    }

    /// Scoped acquisition of the store latch, guaranteeing release on every
    /// exit path including early returns and panics.
    pub fn with_store_latch<R>(&self, op: impl FnOnce(&mut File) -> Result<R>) -> Result<R> {
        let mut file = self.file.lock();
        op(&mut file)
    }

    pub fn read_page(&self, page_id: PageId, out_buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(out_buf.len(), self.page_size);
        let offset = self.offset(page_id);
        self.with_store_latch(|file| {
            let resolved = file.seek(SeekFrom::Start(offset))?;
            if resolved != offset {
                return Err(BufferPoolError::ShortIo {
                    page_id,
                    expected: self.page_size,
                    actual: 0,
                });
            }
            match file.read_exact(out_buf) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    Err(BufferPoolError::ShortIo {
                        page_id,
                        expected: self.page_size,
                        actual: 0,
                    })
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.page_size);
        let offset = self.offset(page_id);
        self.with_store_latch(|file| {
            let resolved = file.seek(SeekFrom::Start(offset))?;
            if resolved != offset {
                return Err(BufferPoolError::ShortIo {
                    page_id,
                    expected: self.page_size,
                    actual: 0,
                });
            }
            file.write_all(buf)?;
            // write-through: flush this write to the device rather than
            // leaving it in the OS page cache ahead of the next read.
            file.sync_data()?;
            Ok(())
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }
}
