//! Backup Manager
//!
//! The replication front-end for one master's log. For every segment the log
//! opens, the manager picks `replicas` backup servers, mirrors the segment's
//! lifecycle to them (`open → write* → close → free`), and on master crash
//! streams surviving segment images back to drive replay.
//!
//! ## Lifecycle Mirroring
//!
//! ```text
//! Log rolls head
//!     ↓
//! open_segment()        ← pick replicas, open remote segments
//!     ↓
//! write_segment() ...   ← fan out every appended byte range
//!     ↓
//! close_segment()       ← fan out close, drop the open sessions
//!     ↓ (later, cleaner)
//! free_segment()        ← tell every recorded replica to drop its copy
//! ```
//!
//! ## Invariants
//!
//! - At most one segment is open at a time; while it is open,
//!   `open_host_count()` equals the replication factor.
//! - `segments` remembers every session that ever held a replica of a
//!   segment, so `free_segment` and recovery can route without the
//!   coordinator.
//!
//! ## Failure Policy
//!
//! Replica shortfall, a missing coordinator, a double open, and any failure
//! while opening, writing, or closing are all fatal: the master cannot meet
//! its durability contract and deliberately crashes rather than continue
//! with fewer than `replicas` copies. Recovery, by contrast, is best-effort
//! per segment and falls through to alternative backups.

use std::collections::HashMap;
use std::sync::Arc;

use memhouse_core::{ServerList, ServerType, Tablets};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::client::{BackupClient, Coordinator, RecoveryMaster, TransportManager};
use crate::error::BackupError;

/// An open session to one backup, remembered by locator for diagnostics.
#[derive(Clone)]
struct ReplicaSession {
    locator: String,
    client: Arc<dyn BackupClient>,
}

#[derive(Default)]
struct ManagerState {
    /// Cached cluster snapshot; refreshed lazily from the coordinator.
    hosts: ServerList,

    /// The sessions holding the currently open segment; empty between
    /// segments.
    open_hosts: Vec<ReplicaSession>,

    /// Every session that holds any replica of any segment ever opened,
    /// keyed by segment id. Entries leave only through `free_segment`.
    segments: HashMap<u64, Vec<ReplicaSession>>,
}

/// Replication manager for one log. See the module docs for the contract.
pub struct BackupManager {
    transport: Arc<dyn TransportManager>,
    coordinator: Option<Arc<dyn Coordinator>>,
    replicas: u32,
    state: Mutex<ManagerState>,
}

impl BackupManager {
    /// Create a manager that opens sessions through `transport` and learns
    /// the cluster from `coordinator`. No hosts are contacted until the
    /// first segment opens. With `replicas == 0` every operation is a no-op,
    /// which is how unreplicated logs run.
    pub fn new(
        transport: Arc<dyn TransportManager>,
        coordinator: Option<Arc<dyn Coordinator>>,
        replicas: u32,
    ) -> BackupManager {
        BackupManager {
            transport,
            coordinator,
            replicas,
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// The replication factor this manager was built with.
    pub fn replicas(&self) -> u32 {
        self.replicas
    }

    /// How many backup sessions currently hold an open segment.
    pub async fn open_host_count(&self) -> usize {
        self.state.lock().await.open_hosts.len()
    }

    /// How many sessions are recorded as holding a replica of `segment_id`.
    pub async fn segment_replica_count(&self, segment_id: u64) -> usize {
        self.state
            .lock()
            .await
            .segments
            .get(&segment_id)
            .map_or(0, Vec::len)
    }

    /// Install a host list directly, bypassing the coordinator. Test and
    /// bootstrap hook.
    pub async fn set_host_list(&self, hosts: ServerList) {
        self.state.lock().await.hosts = hosts;
    }

    /// Select `replicas` backups and open `(master_id, segment_id)` on each.
    ///
    /// # Panics
    ///
    /// Fatal when the cluster cannot satisfy the replication factor: no
    /// coordinator to learn hosts from, fewer than `replicas` backups in the
    /// host list, a session that cannot be opened, a backup that rejects the
    /// open, or a previous segment still open.
    pub async fn open_segment(&self, master_id: u64, segment_id: u64) {
        if self.replicas == 0 {
            return;
        }

        let mut state = self.state.lock().await;
        if state.hosts.is_empty() {
            state.hosts = self.host_list_from_coordinator().await;
        }

        let backups = state.hosts.backup_count();
        if backups < self.replicas as usize {
            error!(
                backups,
                replicas = self.replicas,
                "not enough backups to meet replication requirement"
            );
            panic!(
                "not enough backups to meet replication requirement ({} < {})",
                backups, self.replicas
            );
        }

        if !state.open_hosts.is_empty() {
            error!(
                open_hosts = state.open_hosts.len(),
                segment_id, "cannot select new backups while a segment is open"
            );
            panic!("cannot select new backups while a segment is open");
        }

        let ManagerState {
            hosts,
            open_hosts,
            segments,
        } = &mut *state;

        // Random starting point, then scan forward modulo the list so
        // distinct masters spread their replicas across the cluster.
        let num_hosts = hosts.len() as u64;
        let mut cursor = rand::random::<u64>();
        while open_hosts.len() < self.replicas as usize {
            let entry = &hosts.servers[(cursor % num_hosts) as usize];
            if entry.server_type == ServerType::Backup {
                debug!(locator = %entry.locator, segment_id, "backing up to host");
                let client = match self.transport.open_session(&entry.locator).await {
                    Ok(client) => client,
                    Err(e) => {
                        error!(locator = %entry.locator, error = %e, "failed to open backup session");
                        panic!("failed to open backup session to {}: {}", entry.locator, e);
                    }
                };
                open_hosts.push(ReplicaSession {
                    locator: entry.locator.clone(),
                    client,
                });
            }
            cursor = cursor.wrapping_add(1);
        }

        for session in open_hosts.iter() {
            if let Err(e) = session.client.open_segment(master_id, segment_id).await {
                error!(locator = %session.locator, segment_id, error = %e, "open_segment failed on backup");
                panic!(
                    "open_segment({}, {}) failed on {}: {}",
                    master_id, segment_id, session.locator, e
                );
            }
            segments
                .entry(segment_id)
                .or_default()
                .push(session.clone());
        }

        info!(
            master_id,
            segment_id,
            replicas = self.replicas,
            "opened segment on backups"
        );
    }

    /// Mirror `data` at `offset` to every open replica.
    ///
    /// # Panics
    ///
    /// Fatal on any replica failure; partial fan-out failure has no
    /// replacement protocol at this layer.
    pub async fn write_segment(&self, master_id: u64, segment_id: u64, offset: u32, data: &[u8]) {
        let state = self.state.lock().await;
        for session in &state.open_hosts {
            if let Err(e) = session
                .client
                .write_segment(master_id, segment_id, offset, data)
                .await
            {
                error!(locator = %session.locator, segment_id, offset, error = %e, "write_segment failed on backup");
                panic!(
                    "write_segment({}, {}) failed on {}: {}",
                    master_id, segment_id, session.locator, e
                );
            }
        }
    }

    /// Close the open segment on every replica and drop the open sessions.
    /// The sessions stay recorded under the segment id for `free_segment`
    /// and recovery routing.
    ///
    /// # Panics
    ///
    /// Fatal on any replica failure, as for [`Self::write_segment`].
    pub async fn close_segment(&self, master_id: u64, segment_id: u64) {
        let mut state = self.state.lock().await;
        for session in &state.open_hosts {
            if let Err(e) = session.client.close_segment(master_id, segment_id).await {
                error!(locator = %session.locator, segment_id, error = %e, "close_segment failed on backup");
                panic!(
                    "close_segment({}, {}) failed on {}: {}",
                    master_id, segment_id, session.locator, e
                );
            }
        }
        state.open_hosts.clear();
        debug!(master_id, segment_id, "closed segment on backups");
    }

    /// Tell every recorded replica of `segment_id` to drop its copy, and
    /// forget the segment. A backup that cannot be reached is logged and
    /// skipped; freeing is advisory garbage collection and must not stall
    /// the cleaner.
    pub async fn free_segment(&self, master_id: u64, segment_id: u64) {
        let sessions = self
            .state
            .lock()
            .await
            .segments
            .remove(&segment_id)
            .unwrap_or_default();

        let mut freed = 0u32;
        for session in &sessions {
            match session.client.free_segment(master_id, segment_id).await {
                Ok(()) => freed += 1,
                Err(e) => {
                    warn!(locator = %session.locator, segment_id, error = %e, "free_segment failed on backup");
                }
            }
        }

        if freed != self.replicas {
            warn!(
                freed,
                replicas = self.replicas,
                segment_id,
                "freed a different number of segment replicas than expected"
            );
        }
    }

    /// Stream a crashed master's segments back from surviving backups and
    /// replay them on `recovery_master`.
    ///
    /// `backups` is an ordered list of `(locator, segment_id)` pairs; a
    /// segment may appear under several backups in a row as alternative
    /// sources, and the walk relies on that grouping — it never reorders.
    /// Per-source failures fall through to the next candidate; a segment
    /// with no working source is logged as corruption and skipped, keeping
    /// recovery best-effort.
    pub async fn recover(
        &self,
        recovery_master: &mut dyn RecoveryMaster,
        crashed_master_id: u64,
        tablets: &Tablets,
        backups: &ServerList,
    ) {
        let mut segment_to_recover: Option<u64> = None;
        let mut was_recovered = true;

        for entry in backups.iter() {
            let Some(segment_id) = entry.segment_id else {
                warn!(locator = %entry.locator, "recovery backup list entries must carry segment ids");
                continue;
            };
            if was_recovered && segment_to_recover == Some(segment_id) {
                debug!(locator = %entry.locator, segment_id, "skipping backup, segment already recovered");
                continue;
            }
            if entry.server_type != ServerType::Backup {
                warn!(locator = %entry.locator, "recovery backup list should not contain masters");
                continue;
            }
            if !was_recovered && segment_to_recover != Some(segment_id) {
                error!(
                    segment_id = segment_to_recover.unwrap_or(u64::MAX),
                    "failed to recover segment from any backup; recovered master state is corrupted, continuing"
                );
            }
            segment_to_recover = Some(segment_id);
            was_recovered = false;

            let client = match self.transport.open_session(&entry.locator).await {
                Ok(client) => client,
                Err(e) => {
                    warn!(locator = %entry.locator, segment_id, error = %e, "could not reach backup, trying next");
                    continue;
                }
            };
            let data = match client
                .get_recovery_data(crashed_master_id, segment_id, tablets)
                .await
            {
                Ok(data) => data,
                Err(BackupError::Transport(e)) => {
                    warn!(locator = %entry.locator, segment_id, error = %e, "could not contact backup, trying next");
                    continue;
                }
                Err(BackupError::Client(e)) => {
                    warn!(locator = %entry.locator, segment_id, error = %e, "get_recovery_data failed, trying next");
                    continue;
                }
            };

            info!(
                segment_id,
                bytes = data.len(),
                locator = %entry.locator,
                "recovered segment from backup"
            );
            recovery_master.recover_segment(segment_id, data);
            was_recovered = true;
        }

        if !was_recovered {
            error!(
                segment_id = segment_to_recover.unwrap_or(u64::MAX),
                "failed to recover segment from any backup; recovered master state is corrupted, continuing"
            );
        }
    }

    /// # Panics
    ///
    /// Fatal when no coordinator was supplied or the coordinator cannot be
    /// reached: the replication requirement cannot be met without a host
    /// list.
    async fn host_list_from_coordinator(&self) -> ServerList {
        let Some(coordinator) = &self.coordinator else {
            error!("no coordinator given, replication requirements cannot be met");
            panic!("no coordinator given, replication requirements cannot be met");
        };
        match coordinator.server_list().await {
            Ok(hosts) => hosts,
            Err(e) => {
                error!(error = %e, "failed to fetch server list from coordinator");
                panic!("failed to fetch server list from coordinator: {}", e);
            }
        }
    }
}
