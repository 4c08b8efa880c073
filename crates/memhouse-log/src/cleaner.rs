//! Log Cleaning
//!
//! The cleaner reclaims segment buffers. It runs cooperatively: every head
//! rollover performs one unit of cleaning, and a caller that hit log-full
//! can drive more via [`crate::Log::clean`].
//!
//! ## Eviction Contract
//!
//! When a closed segment's freed-byte tally crosses the cleaning threshold,
//! the segment becomes a victim. Evicting it:
//!
//! 1. fires the registered eviction handler for every entry of a registered
//!    type, in write order (framing entries and unregistered types are
//!    silently discarded);
//! 2. erases the segment from the active indices;
//! 3. frees the segment on every backup replica;
//! 4. returns the buffer to the free list.
//!
//! A handler typically checks whether the entry is still live in its own
//! index, re-appends it through the log handle it is given, and drops its
//! pointers to the old location. Appends issued from inside an eviction
//! pass do not trigger further cleaning.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use memhouse_core::EntryType;

use crate::error::{Error, Result};
use crate::log::{Log, SegmentTable};
use crate::segment::{LogRef, Segment};

/// One entry being evicted from a victim segment. The payload is a copy;
/// the underlying buffer may be reused as soon as the pass finishes.
#[derive(Debug, Clone)]
pub struct EvictedEntry {
    pub entry_type: EntryType,
    pub data: Bytes,
    /// Where the entry lived. Dead once the pass completes.
    pub location: LogRef,
}

/// Per-type eviction capability. The handler owns whatever state it needs
/// to decide liveness (the original callback-plus-cookie pair collapses
/// into the trait object).
#[async_trait]
pub trait EvictionHandler: Send {
    /// Called once per surviving entry of the registered type. `log` is the
    /// owning log; re-appending and freeing through it are both allowed.
    async fn on_evict(&mut self, entry: EvictedEntry, log: &mut Log);
}

/// One-shot registration of eviction handlers by entry type.
#[derive(Default)]
pub(crate) struct EvictionRegistry {
    /// `None` marks a handler temporarily lent out to a running pass.
    handlers: HashMap<u8, Option<Box<dyn EvictionHandler>>>,
}

impl EvictionRegistry {
    pub(crate) fn register(
        &mut self,
        entry_type: EntryType,
        handler: Box<dyn EvictionHandler>,
    ) -> Result<()> {
        if entry_type.is_reserved() {
            return Err(Error::ReservedType(entry_type));
        }
        if self.handlers.contains_key(&entry_type.raw()) {
            return Err(Error::TypeAlreadyRegistered(entry_type));
        }
        self.handlers.insert(entry_type.raw(), Some(handler));
        Ok(())
    }

    pub(crate) fn is_registered(&self, entry_type: EntryType) -> bool {
        self.handlers.contains_key(&entry_type.raw())
    }

    /// Lend the handler out for one dispatch. The slot stays registered.
    pub(crate) fn take(&mut self, entry_type: EntryType) -> Option<Box<dyn EvictionHandler>> {
        self.handlers.get_mut(&entry_type.raw())?.take()
    }

    pub(crate) fn restore(&mut self, entry_type: EntryType, handler: Box<dyn EvictionHandler>) {
        if let Some(slot) = self.handlers.get_mut(&entry_type.raw()) {
            *slot = Some(handler);
        }
    }
}

/// Victim selection and cleaning statistics.
///
/// The policy here is the reference one: a closed segment qualifies once at
/// least three quarters of its payload has been freed. Deployments wanting a
/// different trade-off tune the threshold, not the eviction machinery.
pub(crate) struct LogCleaner {
    segments_cleaned: u64,
}

impl LogCleaner {
    pub(crate) fn new() -> LogCleaner {
        LogCleaner {
            segments_cleaned: 0,
        }
    }

    pub(crate) fn segments_cleaned(&self) -> u64 {
        self.segments_cleaned
    }

    pub(crate) fn note_cleaned(&mut self) {
        self.segments_cleaned += 1;
    }

    /// Up to `limit` victim ids, in ascending id order (oldest first).
    pub(crate) fn select_victims(&self, table: &SegmentTable, limit: usize) -> Vec<u64> {
        table
            .segments()
            .filter(|segment| Self::is_victim(segment))
            .map(Segment::id)
            .take(limit)
            .collect()
    }

    fn is_victim(segment: &Segment) -> bool {
        segment.is_closed()
            && segment.payload_bytes() > 0
            && segment.freed_bytes() * 4 >= segment.payload_bytes() * 3
    }
}
