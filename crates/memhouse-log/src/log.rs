//! The Log
//!
//! An append-only, segmented byte arena owned by one master. Appends go to
//! the unique head segment; when the head fills, the log closes it (which
//! closes it on every backup replica), pulls a fresh buffer from the free
//! list, and opens the next segment (which selects and opens replicas)
//! before retrying.
//!
//! ## Write Flow
//!
//! ```text
//! append(type, bytes)
//!     ↓
//! head.append()            ← copy into the head buffer, mirror to replicas
//!     ↓ refused (full)
//! head.close()             ← footer + replica close
//!     ↓
//! pop free buffer          ← none left? return Ok(None): log full
//!     ↓
//! Segment::replicated()    ← next id, replica open, mirrored header
//!     ↓
//! clean(1)                 ← one unit of compaction work
//!     ↓
//! retry append             ← succeeds on a fresh segment
//! ```
//!
//! ## Ownership
//!
//! The log owns the buffer pool, the active segments, the eviction registry,
//! and the cleaner; segments share the backup manager through an `Arc`. One
//! writer owns the log — every mutating operation takes `&mut self`, so the
//! single-writer rule is enforced by the borrow checker rather than a lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use memhouse_backup::BackupManager;
use memhouse_core::EntryType;
use tracing::{debug, info};

use crate::buf::SegmentBuf;
use crate::cleaner::{EvictedEntry, EvictionHandler, EvictionRegistry, LogCleaner};
use crate::config::LogConfig;
use crate::error::{Error, Result};
use crate::segment::{LogRef, Segment};

/// Buffer pool and active-segment indices. Split out of [`Log`] so the
/// cleaner can inspect segments while the log mutates other state.
pub(crate) struct SegmentTable {
    /// Buffers not bound to any segment. LIFO: the most recently returned
    /// buffer is reused first while its cache lines are still warm.
    free: Vec<SegmentBuf>,

    /// Every live segment, keyed by id. BTreeMap gives the ascending-id
    /// traversal the cleaner and `for_each_segment` rely on.
    active: BTreeMap<u64, Segment>,

    /// Buffer base address → segment id, for O(1) pointer lookup.
    by_base: HashMap<usize, u64>,

    head: Option<u64>,
    next_segment_id: u64,
}

impl SegmentTable {
    fn new() -> SegmentTable {
        SegmentTable {
            free: Vec::new(),
            active: BTreeMap::new(),
            by_base: HashMap::new(),
            head: None,
            next_segment_id: 0,
        }
    }

    fn push_free(&mut self, buf: SegmentBuf) {
        self.free.push(buf);
    }

    fn pop_free(&mut self) -> Option<SegmentBuf> {
        self.free.pop()
    }

    fn insert(&mut self, segment: Segment) {
        self.by_base.insert(segment.base_addr(), segment.id());
        self.active.insert(segment.id(), segment);
    }

    fn remove(&mut self, id: u64) -> Option<Segment> {
        let segment = self.active.remove(&id)?;
        self.by_base.remove(&segment.base_addr());
        if self.head == Some(id) {
            self.head = None;
        }
        Some(segment)
    }

    fn id_by_base(&self, base: usize) -> Option<u64> {
        self.by_base.get(&base).copied()
    }

    /// Live segments in ascending id order.
    pub(crate) fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.active.values()
    }

    fn allocate_segment_id(&mut self) -> u64 {
        let id = self.next_segment_id;
        self.next_segment_id += 1;
        id
    }
}

/// The segmented in-memory log. See the module docs for the write flow.
pub struct Log {
    log_id: u64,
    segment_capacity: usize,
    maximum_appendable_bytes: usize,
    table: SegmentTable,
    registry: EvictionRegistry,
    cleaner: LogCleaner,
    backup: Arc<BackupManager>,
    /// Set while an eviction pass runs; appends issued by handlers must not
    /// re-enter the cleaner.
    cleaning: bool,
}

impl Log {
    /// Build a log over a freshly allocated buffer pool.
    ///
    /// `config.log_capacity / config.segment_capacity` buffers are
    /// allocated, each aligned to its size; a scratch segment over the first
    /// buffer measures the framing overhead that bounds single appends.
    pub fn new(config: &LogConfig, backup: Arc<BackupManager>) -> Result<Log> {
        config.validate()?;
        let segment_capacity = config.segment_capacity as usize;

        let mut table = SegmentTable::new();
        for _ in 0..config.segment_count() {
            table.push_free(SegmentBuf::alloc(segment_capacity)?);
        }

        // Frame a throwaway segment once to learn the largest payload the
        // framing permits, then put the buffer back.
        let buf = table.pop_free().expect("pool holds at least one buffer");
        let scratch = Segment::detached(config.log_id, 0, buf);
        let maximum_appendable_bytes = scratch.appendable_bytes();
        table.push_free(scratch.into_buf());

        info!(
            log_id = config.log_id,
            segments = config.segment_count(),
            segment_capacity,
            maximum_appendable_bytes,
            "constructed log"
        );

        Ok(Log {
            log_id: config.log_id,
            segment_capacity,
            maximum_appendable_bytes,
            table,
            registry: EvictionRegistry::default(),
            cleaner: LogCleaner::new(),
            backup,
            cleaning: false,
        })
    }

    pub fn log_id(&self) -> u64 {
        self.log_id
    }

    /// The largest payload a single append can ever carry.
    pub fn maximum_appendable_bytes(&self) -> usize {
        self.maximum_appendable_bytes
    }

    /// Append one typed entry and get a handle to its log copy.
    ///
    /// Returns `Ok(None)` when the log is out of buffers (the caller may
    /// [`Self::clean`] and retry) and `Err(EntryTooLarge)` when the payload
    /// can never fit a segment.
    ///
    /// # Panics
    ///
    /// Rolling the head replicates through the backup manager; its fatal
    /// conditions (replica shortfall, fan-out failure) propagate.
    pub async fn append(&mut self, entry_type: EntryType, data: &[u8]) -> Result<Option<LogRef>> {
        if entry_type.is_reserved() {
            return Err(Error::ReservedType(entry_type));
        }
        if data.len() > self.maximum_appendable_bytes {
            return Err(Error::EntryTooLarge {
                length: data.len(),
                maximum: self.maximum_appendable_bytes,
            });
        }

        loop {
            if let Some(head_id) = self.table.head {
                let head = self
                    .table
                    .active
                    .get_mut(&head_id)
                    .expect("head segment is always in the active set");
                if let Some(p) = head.append(entry_type, data).await {
                    return Ok(Some(p));
                }
                head.close().await;
                self.table.head = None;
            }

            let Some(buf) = self.table.pop_free() else {
                debug!(log_id = self.log_id, "log full: no free segment buffers");
                return Ok(None);
            };
            let id = self.table.allocate_segment_id();
            let segment = Segment::replicated(self.log_id, id, buf, Arc::clone(&self.backup)).await;
            self.table.insert(segment);
            self.table.head = Some(id);
            info!(log_id = self.log_id, segment_id = id, "opened new head segment");

            self.clean(1).await;
        }
    }

    /// Declare the entry behind `p` dead. Maintains the per-segment freed
    /// tally that victim selection keys off.
    pub fn free(&mut self, p: LogRef) -> Result<()> {
        let id = self.live_segment_id(p)?;
        self.table
            .active
            .get_mut(&id)
            .expect("base index references an active segment")
            .free(p)
    }

    /// Read `len` bytes behind a handle produced by `append`.
    pub fn read(&self, p: LogRef, len: usize) -> Result<&[u8]> {
        let id = self.live_segment_id(p)?;
        self.table.active[&id].read(p, len)
    }

    /// The id of the live segment `p` points into.
    pub fn segment_id(&self, p: LogRef) -> Result<u64> {
        self.live_segment_id(p)
    }

    /// Whether data in segment `id` is still present in the system. Once a
    /// segment is cleaned, its id never reappears.
    pub fn is_segment_live(&self, id: u64) -> bool {
        self.table.active.contains_key(&id)
    }

    /// Register the eviction handler for an entry type. One-shot: a second
    /// registration for the same type fails and leaves the first in place.
    /// Entries whose type has no handler are discarded during cleaning.
    pub fn register_type(
        &mut self,
        entry_type: EntryType,
        handler: Box<dyn EvictionHandler>,
    ) -> Result<()> {
        self.registry.register(entry_type, handler)
    }

    /// Visit up to `limit` live segments in ascending id order.
    pub fn for_each_segment<F: FnMut(&Segment)>(&self, limit: usize, mut f: F) {
        for segment in self.table.segments().take(limit) {
            f(segment);
        }
    }

    /// Run up to `units` units of cleaning now. Invoked automatically on
    /// every head rollover; callers that hit log-full drive it directly
    /// before retrying. Returns how many segments were evicted.
    pub async fn clean(&mut self, units: usize) -> usize {
        if self.cleaning {
            return 0;
        }
        self.cleaning = true;
        let victims = self.cleaner.select_victims(&self.table, units);
        let mut cleaned = 0;
        for id in victims {
            self.evict_segment(id).await;
            cleaned += 1;
        }
        self.cleaning = false;
        cleaned
    }

    /// Close the head so every replica observes a clean close. Buffers and
    /// registered handlers are released when the log drops.
    pub async fn shutdown(&mut self) {
        if let Some(head_id) = self.table.head.take() {
            if let Some(head) = self.table.active.get_mut(&head_id) {
                head.close().await;
            }
            info!(log_id = self.log_id, segment_id = head_id, "closed head on shutdown");
        }
    }

    // -- accessors used by tests and operators ---------------------------

    pub fn head_segment_id(&self) -> Option<u64> {
        self.table.head
    }

    pub fn active_segment_count(&self) -> usize {
        self.table.active.len()
    }

    pub fn free_buffer_count(&self) -> usize {
        self.table.free.len()
    }

    pub fn segments_cleaned(&self) -> u64 {
        self.cleaner.segments_cleaned()
    }

    // -- internals --------------------------------------------------------

    fn live_segment_id(&self, p: LogRef) -> Result<u64> {
        let base = p.addr() & !(self.segment_capacity - 1);
        self.table
            .id_by_base(base)
            .ok_or(Error::InvalidPointer(p.addr()))
    }

    async fn evict_segment(&mut self, id: u64) {
        // Stage entries of registered types before anything moves: handlers
        // may append into (and free from) the log while the victim is still
        // in the active set.
        let staged: Vec<EvictedEntry> = {
            let segment = &self.table.active[&id];
            segment
                .entries()
                .filter(|entry| {
                    !entry.entry_type.is_reserved() && self.registry.is_registered(entry.entry_type)
                })
                .map(|entry| EvictedEntry {
                    entry_type: entry.entry_type,
                    data: Bytes::copy_from_slice(entry.data),
                    location: entry.location,
                })
                .collect()
        };

        for entry in staged {
            let entry_type = entry.entry_type;
            if let Some(mut handler) = self.registry.take(entry_type) {
                handler.on_evict(entry, self).await;
                self.registry.restore(entry_type, handler);
            }
        }

        let segment = self
            .table
            .remove(id)
            .expect("victim segment is in the active set");
        self.backup.free_segment(self.log_id, id).await;
        self.table.push_free(segment.into_buf());
        self.cleaner.note_cleaned();
        debug!(log_id = self.log_id, segment_id = id, "evicted segment and returned its buffer");
    }
}
