//! Remote Interfaces
//!
//! Trait seams over everything the replication layer talks to. Each trait is
//! consumed as an `Arc<dyn ...>` injected at construction, so deployments
//! pick the wiring: the in-memory implementations in [`crate::mem`] for
//! tests and single-process runs, an RPC-backed implementation in a real
//! cluster.
//!
//! The transport is injected rather than fetched from a process-wide
//! registry on purpose: it keeps the replication core free of global state
//! and lets two logs in one process replicate over different transports.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use memhouse_core::{ServerList, Tablets};

use crate::error::Result;

/// One session to one backup server, scoped to segment operations.
///
/// Implementations are per-session stubs: opening a session twice to the
/// same locator may or may not share a connection, but every call on one
/// client is delivered in order (FIFO per session).
#[async_trait]
pub trait BackupClient: Send + Sync {
    /// Tell the backup to start accepting writes for `(master_id, segment_id)`.
    async fn open_segment(&self, master_id: u64, segment_id: u64) -> Result<()>;

    /// Mirror `data` at `offset` within the named open segment.
    async fn write_segment(
        &self,
        master_id: u64,
        segment_id: u64,
        offset: u32,
        data: &[u8],
    ) -> Result<()>;

    /// Mark the segment immutable on the backup.
    async fn close_segment(&self, master_id: u64, segment_id: u64) -> Result<()>;

    /// Drop the backup's replica of the segment.
    async fn free_segment(&self, master_id: u64, segment_id: u64) -> Result<()>;

    /// Fetch the segment image, filtered down to the given tablets, for
    /// replay on a recovery master.
    async fn get_recovery_data(
        &self,
        master_id: u64,
        segment_id: u64,
        tablets: &Tablets,
    ) -> Result<Bytes>;
}

/// Session factory: resolves a service locator to a live [`BackupClient`].
#[async_trait]
pub trait TransportManager: Send + Sync {
    async fn open_session(&self, locator: &str) -> Result<Arc<dyn BackupClient>>;
}

/// Source of truth for cluster membership.
#[async_trait]
pub trait Coordinator: Send + Sync {
    async fn server_list(&self) -> Result<ServerList>;
}

/// Replay sink used during recovery: applies one recovered segment to the
/// master's in-memory state.
pub trait RecoveryMaster: Send {
    fn recover_segment(&mut self, segment_id: u64, data: Bytes);
}
