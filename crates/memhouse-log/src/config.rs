//! Log Configuration

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Construction-time configuration for one log.
///
/// `segment_capacity` must be a power of two: buffers are allocated with
/// alignment equal to their size, so any pointer into a buffer can be masked
/// down to the buffer's base address. `replicas` parametrizes the backup
/// manager the caller constructs alongside the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Process-unique identifier of the owning master.
    pub log_id: u64,

    /// Total in-memory capacity of the log in bytes.
    pub log_capacity: u64,

    /// Size of each segment buffer in bytes. Power of two.
    pub segment_capacity: u64,

    /// How many backup copies each segment gets.
    pub replicas: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_id: 0,
            log_capacity: 64 * 1024 * 1024,
            segment_capacity: 8 * 1024 * 1024,
            replicas: 2,
        }
    }
}

impl LogConfig {
    /// Number of segment buffers the pool will hold.
    pub fn segment_count(&self) -> u64 {
        self.log_capacity / self.segment_capacity
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !self.segment_capacity.is_power_of_two() {
            return Err(Error::UnalignedSegmentCapacity(self.segment_capacity));
        }
        if self.segment_count() < 1 {
            return Err(Error::InsufficientCapacity {
                log_capacity: self.log_capacity,
                segment_capacity: self.segment_capacity,
            });
        }
        Ok(())
    }
}
