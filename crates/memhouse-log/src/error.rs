//! Log Error Types
//!
//! ## Error Categories
//!
//! ### Construction
//! - `InsufficientCapacity`: the pool cannot hold even one segment
//! - `UnalignedSegmentCapacity`: segment size is not a power of two, so
//!   pointer-to-base masking would be unsound
//! - `AllocationFailed`: the allocator refused an aligned buffer
//!
//! ### Caller Misuse
//! - `EntryTooLarge`: append beyond the framing's single-entry maximum
//! - `InvalidPointer`: free/read/lookup on an address outside any live
//!   segment
//! - `TypeAlreadyRegistered` / `ReservedType`: eviction registry misuse
//!
//! Log-full is deliberately NOT an error: `append` returns `Ok(None)` and
//! the caller decides whether to clean and retry.

use memhouse_core::EntryType;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("log capacity {log_capacity} insufficient for even one segment of {segment_capacity} bytes")]
    InsufficientCapacity {
        log_capacity: u64,
        segment_capacity: u64,
    },

    #[error("segment capacity {0} is not a power of two")]
    UnalignedSegmentCapacity(u64),

    #[error("failed to allocate a {0}-byte segment buffer")]
    AllocationFailed(usize),

    #[error("append of {length} bytes exceeds maximum appendable length {maximum}")]
    EntryTooLarge { length: usize, maximum: usize },

    #[error("pointer {0:#x} does not address a live segment entry")]
    InvalidPointer(usize),

    #[error("entry type {0} is already registered")]
    TypeAlreadyRegistered(EntryType),

    #[error("entry type {0} is reserved for segment framing")]
    ReservedType(EntryType),

    #[error(transparent)]
    Framing(#[from] memhouse_core::Error),
}
