//! Cluster Types
//!
//! Plain serde types describing the cluster as seen by a master: the server
//! list handed out by the coordinator, and the tablet ranges used to filter
//! recovery data on a backup.
//!
//! A [`ServerList`] doubles as the input to recovery: each entry then names a
//! backup able to serve one segment (`segment_id` is set), and a segment may
//! appear under several backups in a row as alternative sources.

use serde::{Deserialize, Serialize};

/// Role of a server in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerType {
    Master,
    Backup,
}

/// One server known to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Opaque address understood by the transport manager.
    pub locator: String,

    pub server_type: ServerType,

    /// Set on recovery lists: the segment this backup can serve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_id: Option<u64>,
}

impl ServerEntry {
    pub fn master(locator: impl Into<String>) -> ServerEntry {
        ServerEntry {
            locator: locator.into(),
            server_type: ServerType::Master,
            segment_id: None,
        }
    }

    pub fn backup(locator: impl Into<String>) -> ServerEntry {
        ServerEntry {
            locator: locator.into(),
            server_type: ServerType::Backup,
            segment_id: None,
        }
    }

    /// A backup entry advertising one recoverable segment.
    pub fn backup_for_segment(locator: impl Into<String>, segment_id: u64) -> ServerEntry {
        ServerEntry {
            locator: locator.into(),
            server_type: ServerType::Backup,
            segment_id: Some(segment_id),
        }
    }
}

/// Snapshot of the cluster membership.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerList {
    pub servers: Vec<ServerEntry>,
}

impl ServerList {
    pub fn new(servers: Vec<ServerEntry>) -> ServerList {
        ServerList { servers }
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ServerEntry> {
        self.servers.iter()
    }

    /// How many entries are backups (the pool replicas are drawn from).
    pub fn backup_count(&self) -> usize {
        self.servers
            .iter()
            .filter(|entry| entry.server_type == ServerType::Backup)
            .count()
    }
}

/// A contiguous object-id range of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletRange {
    pub table_id: u64,
    pub start_object_id: u64,
    pub end_object_id: u64,
}

/// The set of tablets a recovery master is taking over. Backups use this to
/// filter segment entries down to the relevant tables before shipping them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tablets {
    pub tablets: Vec<TabletRange>,
}

impl Tablets {
    pub fn new(tablets: Vec<TabletRange>) -> Tablets {
        Tablets { tablets }
    }
}
