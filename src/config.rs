use serde::{Deserialize, Serialize};

use crate::error::{BufferPoolError, Result};

/// Factor applied to `frame_capacity` to size the rental buffer pool.
///
/// Sized to absorb the transient overshoot a burst of concurrent misses can
/// produce before eviction brings the resident count back under the cap.
pub const RENTAL_OVERSHOOT_FACTOR: f64 = 1.25;

/// The two knobs a buffer pool is constructed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferPoolConfig {
    /// Size in bytes of a single page. Fixed for the life of the backing file.
    pub page_size: usize,
    /// Soft cap on resident frames; also drives preallocation and rental-pool sizing.
    pub frame_capacity: usize,
}

impl BufferPoolConfig {
    pub fn new(page_size: usize, frame_capacity: usize) -> Self {
        Self {
            page_size,
            frame_capacity,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(BufferPoolError::InvalidArg(
                "page_size must be positive".into(),
            ));
        }
        if self.frame_capacity == 0 {
            return Err(BufferPoolError::InvalidArg(
                "frame_capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Capacity of the rental buffer pool: `ceil(frame_capacity * 1.25)`.
    pub fn rental_capacity(&self) -> usize {
        ((self.frame_capacity as f64) * RENTAL_OVERSHOOT_FACTOR).ceil() as usize
    }

    /// Bytes to preallocate on the backing file.
    pub fn preallocation_bytes(&self) -> u64 {
        (self.page_size as u64) * (self.frame_capacity as u64)
    }
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            page_size: 4096,
            frame_capacity: 1024,
        }
    }
}
