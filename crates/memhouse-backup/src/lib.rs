//! MemHouse Segment Replication
//!
//! This crate makes a master's log segments durable: for every segment the
//! log opens, the [`BackupManager`] selects N backup servers, mirrors the
//! segment lifecycle to them, and on master crash streams segment images
//! back from surviving backups to drive replay.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  memhouse-log   │  append / roll / clean
//! └────────┬────────┘
//!          │ open, write, close, free
//!          ▼
//! ┌─────────────────┐      ┌──────────────┐
//! │  BackupManager  │ ───→ │ Coordinator  │  server list
//! └────────┬────────┘      └──────────────┘
//!          │ fan-out over N sessions
//!          ▼
//! ┌─────────────────┐
//! │ BackupClient ×N │  one session per selected backup
//! └─────────────────┘
//! ```
//!
//! ## Durability Contract
//!
//! - While a segment is open, every appended byte range is delivered to all
//!   N replicas, in order, before the append returns to the log's caller.
//! - `open → writes → close → free` is ordered per replica; replicas are
//!   independent of each other.
//! - Anything that would leave the master with fewer than N copies of an
//!   open segment is fatal by design (see [`manager`] module docs).
//!
//! ## Main Types
//!
//! - [`BackupManager`] — the replication front-end bound to one log
//! - [`BackupClient`] / [`TransportManager`] / [`Coordinator`] — injected
//!   seams over the remote surface
//! - [`RecoveryMaster`] — replay sink for recovered segments
//! - [`mem`] — in-memory implementations for tests and single-process runs

pub mod client;
pub mod error;
pub mod manager;
pub mod mem;

pub use client::{BackupClient, Coordinator, RecoveryMaster, TransportManager};
pub use error::{BackupError, Result};
pub use manager::BackupManager;
