//! Replicated Log Tests
//!
//! The log wired to in-memory backup hosts: every segment lifecycle event
//! must show up on the replicas, segment images must verify, and cleaning
//! must drop replicas. These are the same flows a clustered deployment runs,
//! minus the wire.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use memhouse_backup::mem::{InMemoryBackupHost, InMemoryTransport};
use memhouse_backup::BackupManager;
use memhouse_core::{
    EntryHeader, EntryType, SegmentFooter, ServerEntry, ServerList, ENTRY_HEADER_SIZE,
};
use memhouse_log::{EvictedEntry, EvictionHandler, Log, LogConfig, LogRef};

const KIB: u64 = 1024;
const LOG_ID: u64 = 9;
const OBJECT: EntryType = EntryType::new(EntryType::USER_BASE);

struct Replicated {
    log: Log,
    hosts: Vec<Arc<InMemoryBackupHost>>,
}

async fn replicated_log(log_capacity: u64, replicas: u32) -> Replicated {
    let transport = Arc::new(InMemoryTransport::new());
    let mut hosts = Vec::new();
    let mut servers = Vec::new();
    for i in 0..replicas {
        let locator = format!("mem:backup{}", i);
        let host = Arc::new(InMemoryBackupHost::new());
        transport.register(&locator, host.clone()).await;
        hosts.push(host);
        servers.push(ServerEntry::backup(locator));
    }

    let config = LogConfig {
        log_id: LOG_ID,
        log_capacity,
        segment_capacity: 64 * KIB,
        replicas,
    };
    let backup = Arc::new(BackupManager::new(transport, None, replicas));
    backup.set_host_list(ServerList::new(servers)).await;
    Replicated {
        log: Log::new(&config, backup).unwrap(),
        hosts,
    }
}

/// Decode `(entry_type, payload)` pairs out of a mirrored segment image.
fn decode_image(image: &[u8]) -> Vec<(EntryType, Vec<u8>)> {
    let mut entries = Vec::new();
    let mut offset = 0;
    while offset + ENTRY_HEADER_SIZE <= image.len() {
        let header = EntryHeader::decode(&image[offset..]).unwrap();
        let start = offset + ENTRY_HEADER_SIZE;
        let end = start + header.length as usize;
        entries.push((header.entry_type, image[start..end].to_vec()));
        offset = end;
    }
    entries
}

// ---------------------------------------------------------------
// Mirroring
// ---------------------------------------------------------------

#[tokio::test]
async fn test_first_append_opens_segment_on_all_replicas() {
    let mut cluster = replicated_log(128 * KIB, 2).await;
    cluster.log.append(OBJECT, b"hello").await.unwrap().unwrap();

    for host in &cluster.hosts {
        assert!(host.is_open(LOG_ID, 0).await);
        let image = host.stored_segment(LOG_ID, 0).await.unwrap();
        let entries = decode_image(&image);
        assert_eq!(entries[0].0, EntryType::SEGMENT_HEADER);
        assert_eq!(entries[1], (OBJECT, b"hello".to_vec()));
    }
}

#[tokio::test]
async fn test_every_append_reaches_every_replica_in_order() {
    let mut cluster = replicated_log(128 * KIB, 3).await;
    cluster.log.append(OBJECT, b"one").await.unwrap().unwrap();
    cluster.log.append(OBJECT, b"two").await.unwrap().unwrap();
    cluster.log.append(OBJECT, b"three").await.unwrap().unwrap();

    for host in &cluster.hosts {
        let image = host.stored_segment(LOG_ID, 0).await.unwrap();
        let payloads: Vec<Vec<u8>> = decode_image(&image)
            .into_iter()
            .filter(|(ty, _)| !ty.is_reserved())
            .map(|(_, data)| data)
            .collect();
        assert_eq!(payloads, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
    }
}

#[tokio::test]
async fn test_rollover_closes_old_segment_and_opens_next_on_replicas() {
    let mut cluster = replicated_log(128 * KIB, 2).await;
    let max = cluster.log.maximum_appendable_bytes();

    cluster.log.append(OBJECT, &vec![0xAB; max]).await.unwrap().unwrap();
    cluster.log.append(OBJECT, b"rolls").await.unwrap().unwrap();

    for host in &cluster.hosts {
        assert!(!host.is_open(LOG_ID, 0).await);
        assert!(host.is_open(LOG_ID, 1).await);
        assert_eq!(host.segment_count().await, 2);
    }
    assert_eq!(cluster.log.head_segment_id(), Some(1));
}

#[tokio::test]
async fn test_closed_image_carries_valid_footer_checksum() {
    let mut cluster = replicated_log(128 * KIB, 1).await;
    let max = cluster.log.maximum_appendable_bytes();

    cluster.log.append(OBJECT, &vec![0xCD; max]).await.unwrap().unwrap();
    cluster.log.append(OBJECT, b"next").await.unwrap().unwrap();

    let image = cluster.hosts[0].stored_segment(LOG_ID, 0).await.unwrap();
    let entries = decode_image(&image);
    let (footer_type, footer_payload) = entries.last().unwrap();
    assert_eq!(*footer_type, EntryType::SEGMENT_FOOTER);

    let footer = SegmentFooter::decode(&footer_payload[..]).unwrap();
    let body_len = image.len() - ENTRY_HEADER_SIZE - footer_payload.len();
    assert_eq!(footer.checksum, crc32fast::hash(&image[..body_len]));
}

// ---------------------------------------------------------------
// Cleaning drops replicas
// ---------------------------------------------------------------

#[tokio::test]
async fn test_cleaning_frees_segment_on_every_replica() {
    let mut cluster = replicated_log(128 * KIB, 2).await;
    let max = cluster.log.maximum_appendable_bytes();

    let p = cluster.log.append(OBJECT, &vec![1; max]).await.unwrap().unwrap();
    cluster.log.append(OBJECT, b"head").await.unwrap().unwrap();

    cluster.log.free(p).unwrap();
    assert_eq!(cluster.log.clean(1).await, 1);

    assert!(!cluster.log.is_segment_live(0));
    for host in &cluster.hosts {
        assert!(host.stored_segment(LOG_ID, 0).await.is_none());
        assert_eq!(host.segment_count().await, 1);
    }
}

// ---------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------

#[tokio::test]
async fn test_shutdown_closes_head_on_replicas() {
    let mut cluster = replicated_log(128 * KIB, 2).await;
    cluster.log.append(OBJECT, b"durable").await.unwrap().unwrap();

    cluster.log.shutdown().await;

    for host in &cluster.hosts {
        assert!(!host.is_open(LOG_ID, 0).await);
    }
    assert!(cluster.log.head_segment_id().is_none());
}

#[tokio::test]
async fn test_shutdown_without_head_is_a_no_op() {
    let mut cluster = replicated_log(128 * KIB, 2).await;
    cluster.log.shutdown().await;
    cluster.log.shutdown().await;
}

// ---------------------------------------------------------------
// Eviction callbacks
// ---------------------------------------------------------------

/// Relocates entries whose payload starts with the live marker and records
/// every invocation, the way an object table relocates surviving objects.
struct Relocator {
    live_marker: u8,
    moves: Arc<StdMutex<Vec<(LogRef, Option<LogRef>)>>>,
}

#[async_trait]
impl EvictionHandler for Relocator {
    async fn on_evict(&mut self, entry: EvictedEntry, log: &mut Log) {
        let is_live = entry.data.first() == Some(&self.live_marker);
        let relocated = if is_live {
            Some(
                log.append(entry.entry_type, &entry.data)
                    .await
                    .expect("relocation append is well-formed")
                    .expect("log has room for relocated entries"),
            )
        } else {
            None
        };
        self.moves.lock().unwrap().push((entry.location, relocated));
    }
}

#[tokio::test]
async fn test_eviction_relocates_live_entries() {
    let mut cluster = replicated_log(128 * KIB, 0).await;
    let max = cluster.log.maximum_appendable_bytes();
    let moves = Arc::new(StdMutex::new(Vec::new()));
    cluster
        .log
        .register_type(
            OBJECT,
            Box::new(Relocator {
                live_marker: b'd',
                moves: moves.clone(),
            }),
        )
        .unwrap();

    // Four equal entries fill segment 0; the fourth stays live.
    let entry_len = max / 4 - ENTRY_HEADER_SIZE;
    let payloads: Vec<Vec<u8>> = (0..4).map(|i| vec![b'a' + i as u8; entry_len]).collect();
    let mut refs = Vec::new();
    for payload in &payloads {
        refs.push(cluster.log.append(OBJECT, payload).await.unwrap().unwrap());
    }
    let rolled = cluster.log.append(OBJECT, b"rolls to segment 1").await.unwrap();
    assert!(rolled.is_some());
    assert_eq!(cluster.log.head_segment_id(), Some(1));

    for p in &refs[..3] {
        cluster.log.free(*p).unwrap();
    }
    assert_eq!(cluster.log.clean(1).await, 1);

    // The handler saw all four entries of its type, in write order, and
    // relocated only the live one.
    let moves = moves.lock().unwrap();
    assert_eq!(moves.len(), 4);
    for (i, (old, relocated)) in moves.iter().enumerate() {
        assert_eq!(*old, refs[i]);
        assert_eq!(relocated.is_some(), i == 3);
    }
    let new_ref = moves[3].1.unwrap();
    assert_eq!(cluster.log.segment_id(new_ref).unwrap(), 1);
    assert_eq!(
        cluster.log.read(new_ref, entry_len).unwrap(),
        &payloads[3][..]
    );
    assert!(!cluster.log.is_segment_live(0));
}

#[tokio::test]
async fn test_unregistered_types_are_discarded_silently() {
    let mut cluster = replicated_log(128 * KIB, 0).await;
    let max = cluster.log.maximum_appendable_bytes();
    let moves = Arc::new(StdMutex::new(Vec::new()));
    let tombstone = EntryType::new(EntryType::USER_BASE + 1);
    cluster
        .log
        .register_type(
            OBJECT,
            Box::new(Relocator {
                live_marker: 0xFF,
                moves: moves.clone(),
            }),
        )
        .unwrap();

    // One registered entry, one unregistered entry, then fill and roll.
    let p1 = cluster.log.append(OBJECT, b"tracked").await.unwrap().unwrap();
    let p2 = cluster.log.append(tombstone, b"untracked").await.unwrap().unwrap();
    let filler_len =
        max - (ENTRY_HEADER_SIZE + 7) - (ENTRY_HEADER_SIZE + 9) - ENTRY_HEADER_SIZE;
    let p3 = cluster.log.append(OBJECT, &vec![0; filler_len]).await.unwrap().unwrap();
    cluster.log.append(OBJECT, b"rolls").await.unwrap().unwrap();

    cluster.log.free(p1).unwrap();
    cluster.log.free(p2).unwrap();
    cluster.log.free(p3).unwrap();
    assert_eq!(cluster.log.clean(1).await, 1);

    // Only the two OBJECT entries reached the handler.
    let moves = moves.lock().unwrap();
    assert_eq!(moves.len(), 2);
    assert_eq!(moves[0].0, p1);
    assert_eq!(moves[1].0, p3);
}
