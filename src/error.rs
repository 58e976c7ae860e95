use thiserror::Error;

use crate::PageId;

/// Errors produced by the buffer pool's public operations.
#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("short I/O on page {page_id}: expected {expected} bytes, got {actual}")]
    ShortIo {
        page_id: PageId,
        expected: usize,
        actual: usize,
    },

    #[error("latch violation: page {0} mutated without holding its write latch")]
    LatchViolation(PageId),

    #[error("bad latch request: `None` is only valid for read_through")]
    BadLatchRequest,

    #[error("buffer pool has been disposed")]
    Disposed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("page {0} is not resident")]
    NotFound(PageId),

    #[error("invalid argument: {0}")]
    InvalidArg(String),

    #[error("{0} page failure(s) during flush_all: {1:?}")]
    AggregateIo(usize, Vec<BufferPoolError>),
}

pub type Result<T> = std::result::Result<T, BufferPoolError>;
