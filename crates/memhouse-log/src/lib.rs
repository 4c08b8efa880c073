//! MemHouse Log
//!
//! The in-memory, log-structured storage substrate of a MemHouse master: an
//! append-only log over a fixed pool of pre-allocated, aligned segment
//! buffers, replicated segment-by-segment through `memhouse-backup`.
//!
//! ## What the Log Provides
//!
//! 1. **Typed appends**: every entry carries a type tag; the returned
//!    [`LogRef`] addresses the entry's log copy for later reads and frees
//! 2. **Segment pool**: fixed buffers, head rollover, O(1) pointer-to-
//!    segment lookup via alignment masking
//! 3. **Replication hooks**: opening, writing, and closing a segment mirror
//!    through the [`memhouse_backup::BackupManager`] before returning
//! 4. **Cleaning**: per-type eviction callbacks, freed-byte accounting, and
//!    buffer reuse
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use memhouse_backup::{mem::InMemoryTransport, BackupManager};
//! use memhouse_core::EntryType;
//! use memhouse_log::{Log, LogConfig};
//!
//! let config = LogConfig { log_id: 1, replicas: 0, ..Default::default() };
//! let backup = Arc::new(BackupManager::new(
//!     Arc::new(InMemoryTransport::new()),
//!     None,
//!     config.replicas,
//! ));
//! let mut log = Log::new(&config, backup)?;
//!
//! const OBJECT: EntryType = EntryType::new(EntryType::USER_BASE);
//! let p = log.append(OBJECT, b"value").await?.expect("log has room");
//! assert_eq!(log.read(p, 5)?, b"value");
//! log.free(p)?;
//! ```
//!
//! ## Single Writer
//!
//! One task owns the log; every mutating operation takes `&mut self`. The
//! log is not a concurrent structure and never locks — the backup manager
//! it drives is the only component with interior synchronization.

pub mod buf;
pub mod cleaner;
pub mod config;
pub mod error;
pub mod log;
pub mod segment;

pub use buf::SegmentBuf;
pub use cleaner::{EvictedEntry, EvictionHandler};
pub use config::LogConfig;
pub use error::{Error, Result};
pub use log::Log;
pub use segment::{Entry, LogRef, Segment};
