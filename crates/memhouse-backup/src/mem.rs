//! In-Memory Backup Hosts
//!
//! A real, in-process implementation of the remote surface: a backup host
//! that stores segment images in a map, a transport that routes locators to
//! hosts, and a fixed coordinator. Tests and single-process deployments wire
//! these in exactly where a cluster wires RPC stubs.
//!
//! Hosts support fault injection (`inject_transport_failures`,
//! `inject_client_failures`): the next N requests fail with the chosen error
//! kind, which is how recovery's fall-through paths are exercised.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use memhouse_core::{ServerList, Tablets};
use tokio::sync::Mutex;

use crate::client::{BackupClient, Coordinator, TransportManager};
use crate::error::{BackupError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailKind {
    Transport,
    Client,
}

#[derive(Debug)]
struct StoredSegment {
    data: Vec<u8>,
    open: bool,
}

#[derive(Default)]
struct HostState {
    /// Segment images keyed by `(master_id, segment_id)`.
    segments: HashMap<(u64, u64), StoredSegment>,
    fail_next: u32,
    fail_kind: Option<FailKind>,
}

/// One backup server's worth of in-process segment storage.
#[derive(Default)]
pub struct InMemoryBackupHost {
    state: Mutex<HostState>,
}

impl InMemoryBackupHost {
    pub fn new() -> InMemoryBackupHost {
        InMemoryBackupHost::default()
    }

    /// Fail the next `n` requests with a transport error.
    pub async fn inject_transport_failures(&self, n: u32) {
        let mut state = self.state.lock().await;
        state.fail_next = n;
        state.fail_kind = Some(FailKind::Transport);
    }

    /// Fail the next `n` requests with a client error.
    pub async fn inject_client_failures(&self, n: u32) {
        let mut state = self.state.lock().await;
        state.fail_next = n;
        state.fail_kind = Some(FailKind::Client);
    }

    /// The stored image of a segment, if this host holds one.
    pub async fn stored_segment(&self, master_id: u64, segment_id: u64) -> Option<Vec<u8>> {
        self.state
            .lock()
            .await
            .segments
            .get(&(master_id, segment_id))
            .map(|s| s.data.clone())
    }

    /// Whether the host holds the segment and it is still open for writes.
    pub async fn is_open(&self, master_id: u64, segment_id: u64) -> bool {
        self.state
            .lock()
            .await
            .segments
            .get(&(master_id, segment_id))
            .is_some_and(|s| s.open)
    }

    /// How many segment replicas this host currently stores.
    pub async fn segment_count(&self) -> usize {
        self.state.lock().await.segments.len()
    }

    /// Seed a closed segment image directly; recovery-test setup hook.
    pub async fn stage_segment(&self, master_id: u64, segment_id: u64, data: Vec<u8>) {
        self.state
            .lock()
            .await
            .segments
            .insert((master_id, segment_id), StoredSegment { data, open: false });
    }

    fn take_injected_failure(state: &mut HostState) -> Option<BackupError> {
        if state.fail_next == 0 {
            return None;
        }
        state.fail_next -= 1;
        match state.fail_kind {
            Some(FailKind::Client) => Some(BackupError::Client("injected failure".into())),
            _ => Some(BackupError::Transport("injected failure".into())),
        }
    }
}

#[async_trait]
impl BackupClient for InMemoryBackupHost {
    async fn open_segment(&self, master_id: u64, segment_id: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(err) = Self::take_injected_failure(&mut state) {
            return Err(err);
        }
        if state.segments.contains_key(&(master_id, segment_id)) {
            return Err(BackupError::Client(format!(
                "segment {}/{} already stored",
                master_id, segment_id
            )));
        }
        state.segments.insert(
            (master_id, segment_id),
            StoredSegment {
                data: Vec::new(),
                open: true,
            },
        );
        Ok(())
    }

    async fn write_segment(
        &self,
        master_id: u64,
        segment_id: u64,
        offset: u32,
        data: &[u8],
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(err) = Self::take_injected_failure(&mut state) {
            return Err(err);
        }
        let segment = state
            .segments
            .get_mut(&(master_id, segment_id))
            .ok_or_else(|| {
                BackupError::Client(format!("segment {}/{} not stored", master_id, segment_id))
            })?;
        if !segment.open {
            return Err(BackupError::Client(format!(
                "segment {}/{} is closed",
                master_id, segment_id
            )));
        }
        let end = offset as usize + data.len();
        if segment.data.len() < end {
            segment.data.resize(end, 0);
        }
        segment.data[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    async fn close_segment(&self, master_id: u64, segment_id: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(err) = Self::take_injected_failure(&mut state) {
            return Err(err);
        }
        let segment = state
            .segments
            .get_mut(&(master_id, segment_id))
            .ok_or_else(|| {
                BackupError::Client(format!("segment {}/{} not stored", master_id, segment_id))
            })?;
        segment.open = false;
        Ok(())
    }

    async fn free_segment(&self, master_id: u64, segment_id: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(err) = Self::take_injected_failure(&mut state) {
            return Err(err);
        }
        state
            .segments
            .remove(&(master_id, segment_id))
            .map(|_| ())
            .ok_or_else(|| {
                BackupError::Client(format!("segment {}/{} not stored", master_id, segment_id))
            })
    }

    async fn get_recovery_data(
        &self,
        master_id: u64,
        segment_id: u64,
        _tablets: &Tablets,
    ) -> Result<Bytes> {
        let mut state = self.state.lock().await;
        if let Some(err) = Self::take_injected_failure(&mut state) {
            return Err(err);
        }
        state
            .segments
            .get(&(master_id, segment_id))
            .map(|s| Bytes::from(s.data.clone()))
            .ok_or_else(|| {
                BackupError::Client(format!("segment {}/{} not stored", master_id, segment_id))
            })
    }
}

/// Routes locators to registered [`InMemoryBackupHost`]s.
#[derive(Default)]
pub struct InMemoryTransport {
    hosts: Mutex<HashMap<String, Arc<InMemoryBackupHost>>>,
}

impl InMemoryTransport {
    pub fn new() -> InMemoryTransport {
        InMemoryTransport::default()
    }

    pub async fn register(&self, locator: impl Into<String>, host: Arc<InMemoryBackupHost>) {
        self.hosts.lock().await.insert(locator.into(), host);
    }

    pub async fn host(&self, locator: &str) -> Option<Arc<InMemoryBackupHost>> {
        self.hosts.lock().await.get(locator).cloned()
    }
}

#[async_trait]
impl TransportManager for InMemoryTransport {
    async fn open_session(&self, locator: &str) -> Result<Arc<dyn BackupClient>> {
        self.hosts
            .lock()
            .await
            .get(locator)
            .cloned()
            .map(|host| host as Arc<dyn BackupClient>)
            .ok_or_else(|| BackupError::Transport(format!("no route to {}", locator)))
    }
}

/// A coordinator that always returns the same server list.
pub struct FixedCoordinator {
    hosts: ServerList,
}

impl FixedCoordinator {
    pub fn new(hosts: ServerList) -> FixedCoordinator {
        FixedCoordinator { hosts }
    }
}

#[async_trait]
impl Coordinator for FixedCoordinator {
    async fn server_list(&self) -> Result<ServerList> {
        Ok(self.hosts.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // Host segment lifecycle
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_open_write_close_free() {
        let host = InMemoryBackupHost::new();
        host.open_segment(1, 0).await.unwrap();
        assert!(host.is_open(1, 0).await);

        host.write_segment(1, 0, 0, b"abcd").await.unwrap();
        host.write_segment(1, 0, 4, b"ef").await.unwrap();
        assert_eq!(host.stored_segment(1, 0).await.unwrap(), b"abcdef");

        host.close_segment(1, 0).await.unwrap();
        assert!(!host.is_open(1, 0).await);

        host.free_segment(1, 0).await.unwrap();
        assert_eq!(host.segment_count().await, 0);
    }

    #[tokio::test]
    async fn test_write_at_offset_into_sparse_region() {
        let host = InMemoryBackupHost::new();
        host.open_segment(1, 0).await.unwrap();
        host.write_segment(1, 0, 4, b"zz").await.unwrap();
        assert_eq!(host.stored_segment(1, 0).await.unwrap(), b"\0\0\0\0zz");
    }

    #[tokio::test]
    async fn test_double_open_rejected() {
        let host = InMemoryBackupHost::new();
        host.open_segment(1, 0).await.unwrap();
        let err = host.open_segment(1, 0).await.unwrap_err();
        assert!(matches!(err, BackupError::Client(_)));
    }

    #[tokio::test]
    async fn test_write_to_closed_segment_rejected() {
        let host = InMemoryBackupHost::new();
        host.open_segment(1, 0).await.unwrap();
        host.close_segment(1, 0).await.unwrap();
        let err = host.write_segment(1, 0, 0, b"x").await.unwrap_err();
        assert!(matches!(err, BackupError::Client(_)));
    }

    #[tokio::test]
    async fn test_free_unknown_segment_rejected() {
        let host = InMemoryBackupHost::new();
        let err = host.free_segment(1, 99).await.unwrap_err();
        assert!(matches!(err, BackupError::Client(_)));
    }

    #[tokio::test]
    async fn test_segments_of_different_masters_are_distinct() {
        let host = InMemoryBackupHost::new();
        host.open_segment(1, 0).await.unwrap();
        host.open_segment(2, 0).await.unwrap();
        host.write_segment(1, 0, 0, b"one").await.unwrap();
        host.write_segment(2, 0, 0, b"two").await.unwrap();
        assert_eq!(host.stored_segment(1, 0).await.unwrap(), b"one");
        assert_eq!(host.stored_segment(2, 0).await.unwrap(), b"two");
    }

    // ---------------------------------------------------------------
    // Recovery data
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_get_recovery_data_returns_stored_image() {
        let host = InMemoryBackupHost::new();
        host.stage_segment(7, 3, b"image".to_vec()).await;
        let data = host
            .get_recovery_data(7, 3, &Tablets::default())
            .await
            .unwrap();
        assert_eq!(&data[..], b"image");
    }

    #[tokio::test]
    async fn test_get_recovery_data_unknown_segment() {
        let host = InMemoryBackupHost::new();
        let err = host
            .get_recovery_data(7, 3, &Tablets::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Client(_)));
    }

    // ---------------------------------------------------------------
    // Fault injection
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_injected_transport_failures_expire() {
        let host = InMemoryBackupHost::new();
        host.inject_transport_failures(1).await;
        let err = host.open_segment(1, 0).await.unwrap_err();
        assert!(matches!(err, BackupError::Transport(_)));
        host.open_segment(1, 0).await.unwrap();
    }

    #[tokio::test]
    async fn test_injected_client_failures() {
        let host = InMemoryBackupHost::new();
        host.inject_client_failures(2).await;
        assert!(matches!(
            host.open_segment(1, 0).await.unwrap_err(),
            BackupError::Client(_)
        ));
        assert!(matches!(
            host.open_segment(1, 0).await.unwrap_err(),
            BackupError::Client(_)
        ));
        host.open_segment(1, 0).await.unwrap();
    }

    // ---------------------------------------------------------------
    // Transport routing
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_transport_routes_to_registered_host() {
        let transport = InMemoryTransport::new();
        let host = Arc::new(InMemoryBackupHost::new());
        transport.register("mem:backup0", host.clone()).await;

        let session = transport.open_session("mem:backup0").await.unwrap();
        session.open_segment(1, 0).await.unwrap();
        assert!(host.is_open(1, 0).await);
    }

    #[tokio::test]
    async fn test_transport_unknown_locator() {
        let transport = InMemoryTransport::new();
        let err = match transport.open_session("mem:nowhere").await {
            Ok(_) => panic!("expected error"),
            Err(err) => err,
        };
        assert!(matches!(err, BackupError::Transport(_)));
    }
}
