//! Log Segments
//!
//! A segment frames one pool buffer as a sequence of typed entries:
//!
//! ```text
//! [SEGMENT_HEADER][user entry][user entry]...[SEGMENT_FOOTER]
//!                                             └─ appended on close
//! ```
//!
//! Every byte range a segment writes is mirrored to the backup manager
//! before the write returns, so the remote image is always a prefix of the
//! local buffer:
//!
//! ```text
//! open()   → backup.open_segment + mirrored header entry
//! append() → mirrored entry bytes
//! close()  → mirrored footer entry + backup.close_segment
//! ```
//!
//! `free` is local: it reads the entry header behind the pointer and bumps a
//! freed-bytes tally the cleaner uses to pick victims. Dropping the whole
//! replica set (`free_segment`) happens when the cleaner evicts the segment,
//! not here.

use std::sync::Arc;

use memhouse_backup::BackupManager;
use memhouse_core::{
    EntryHeader, EntryType, SegmentFooter, SegmentHeader, ENTRY_HEADER_SIZE, SEGMENT_FOOTER_LEN,
    SEGMENT_HEADER_LEN,
};

use crate::buf::SegmentBuf;
use crate::error::{Error, Result};

/// A copyable handle to one appended payload.
///
/// The wrapped address stays valid while the owning segment is live; every
/// use goes back through the log, which re-validates it against the active
/// segment set. Ordering compares addresses, so within one segment later
/// appends compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogRef(usize);

impl LogRef {
    pub fn from_addr(addr: usize) -> LogRef {
        LogRef(addr)
    }

    pub fn addr(self) -> usize {
        self.0
    }
}

/// One framed segment over one pool buffer.
pub struct Segment {
    log_id: u64,
    id: u64,
    buf: SegmentBuf,
    /// Next write offset within the buffer.
    tail: usize,
    /// Total user payload bytes appended.
    payload_bytes: usize,
    /// User payload bytes the owner has declared dead.
    freed_bytes: usize,
    closed: bool,
    backup: Option<Arc<BackupManager>>,
}

/// One entry yielded by [`Segment::entries`].
#[derive(Debug, Clone, Copy)]
pub struct Entry<'a> {
    pub entry_type: EntryType,
    pub data: &'a [u8],
    pub location: LogRef,
}

impl Segment {
    /// Frame a segment with no replication attached. Used for the scratch
    /// segment that measures framing overhead and for unreplicated tests.
    pub(crate) fn detached(log_id: u64, id: u64, buf: SegmentBuf) -> Segment {
        Segment::build(log_id, id, buf, None)
    }

    /// Open a replicated segment: select replicas and open the segment on
    /// them first, then frame the buffer and mirror the header entry.
    pub(crate) async fn replicated(
        log_id: u64,
        id: u64,
        buf: SegmentBuf,
        backup: Arc<BackupManager>,
    ) -> Segment {
        backup.open_segment(log_id, id).await;
        let segment = Segment::build(log_id, id, buf, Some(backup));
        segment.mirror_from(0).await;
        segment
    }

    fn build(log_id: u64, id: u64, buf: SegmentBuf, backup: Option<Arc<BackupManager>>) -> Segment {
        let mut segment = Segment {
            log_id,
            id,
            buf,
            tail: 0,
            payload_bytes: 0,
            freed_bytes: 0,
            closed: false,
            backup,
        };
        let mut payload = [0u8; SEGMENT_HEADER_LEN];
        {
            let mut slice = &mut payload[..];
            SegmentHeader { log_id, segment_id: id }.encode(&mut slice);
        }
        segment.write_entry(EntryType::SEGMENT_HEADER, &payload);
        segment
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn base_addr(&self) -> usize {
        self.buf.base_addr()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Bytes written so far (framing included).
    pub fn len(&self) -> usize {
        self.tail
    }

    pub fn is_empty(&self) -> bool {
        self.payload_bytes == 0
    }

    pub fn payload_bytes(&self) -> usize {
        self.payload_bytes
    }

    pub fn freed_bytes(&self) -> usize {
        self.freed_bytes
    }

    /// The largest payload a single append can currently take. Room for the
    /// footer entry is always held back, so a close can never fail for
    /// space.
    pub fn appendable_bytes(&self) -> usize {
        if self.closed {
            return 0;
        }
        let free = self.buf.capacity() - self.tail;
        free.saturating_sub(2 * ENTRY_HEADER_SIZE + SEGMENT_FOOTER_LEN)
    }

    /// Append one typed entry. Returns `None` when the entry does not fit
    /// (the caller rolls to a new segment) and the payload handle otherwise.
    pub(crate) async fn append(&mut self, entry_type: EntryType, data: &[u8]) -> Option<LogRef> {
        if self.closed || data.len() > self.appendable_bytes() {
            return None;
        }
        let start = self.write_entry(entry_type, data);
        self.payload_bytes += data.len();
        self.mirror_from(start).await;
        Some(LogRef::from_addr(
            self.buf.base_addr() + start + ENTRY_HEADER_SIZE,
        ))
    }

    /// Finalize framing with a footer entry carrying a CRC32 over everything
    /// before it, mirror the footer, and close the segment on every replica.
    ///
    /// # Panics
    ///
    /// Closing twice is a logic error: a segment stops being the head on its
    /// first close and nothing may write to it again.
    pub(crate) async fn close(&mut self) {
        assert!(!self.closed, "segment {} closed twice", self.id);
        let checksum = crc32fast::hash(self.buf.bytes(0, self.tail));
        let mut payload = [0u8; SEGMENT_FOOTER_LEN];
        {
            let mut slice = &mut payload[..];
            SegmentFooter { checksum }.encode(&mut slice);
        }
        let start = self.write_entry(EntryType::SEGMENT_FOOTER, &payload);
        self.closed = true;
        self.mirror_from(start).await;
        if let Some(backup) = &self.backup {
            backup.close_segment(self.log_id, self.id).await;
        }
    }

    /// Declare the entry behind `p` dead: read its header and add its length
    /// to the freed tally the cleaner keys victim selection off.
    pub(crate) fn free(&mut self, p: LogRef) -> Result<()> {
        let base = self.buf.base_addr();
        let addr = p.addr();
        if addr < base + ENTRY_HEADER_SIZE || addr > base + self.tail {
            return Err(Error::InvalidPointer(addr));
        }
        let offset = addr - base;
        let header =
            EntryHeader::decode(self.buf.bytes(offset - ENTRY_HEADER_SIZE, ENTRY_HEADER_SIZE))?;
        if offset + header.length as usize > self.tail {
            return Err(Error::InvalidPointer(addr));
        }
        self.freed_bytes += header.length as usize;
        Ok(())
    }

    /// Borrow `len` payload bytes behind a handle produced by `append`.
    pub(crate) fn read(&self, p: LogRef, len: usize) -> Result<&[u8]> {
        let base = self.buf.base_addr();
        let addr = p.addr();
        if addr < base || addr + len > base + self.tail {
            return Err(Error::InvalidPointer(addr));
        }
        Ok(self.buf.bytes(addr - base, len))
    }

    /// Iterate every entry in write order, framing entries included.
    pub fn entries(&self) -> Entries<'_> {
        Entries {
            segment: self,
            offset: 0,
        }
    }

    pub(crate) fn into_buf(self) -> SegmentBuf {
        self.buf
    }

    fn write_entry(&mut self, entry_type: EntryType, payload: &[u8]) -> usize {
        let start = self.tail;
        let mut header = [0u8; ENTRY_HEADER_SIZE];
        {
            let mut slice = &mut header[..];
            EntryHeader::new(entry_type, payload.len() as u32).encode(&mut slice);
        }
        self.buf.write_at(start, &header);
        self.buf.write_at(start + ENTRY_HEADER_SIZE, payload);
        self.tail = start + ENTRY_HEADER_SIZE + payload.len();
        start
    }

    async fn mirror_from(&self, start: usize) {
        if let Some(backup) = &self.backup {
            backup
                .write_segment(
                    self.log_id,
                    self.id,
                    start as u32,
                    self.buf.bytes(start, self.tail - start),
                )
                .await;
        }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("base", &format_args!("{:#x}", self.base_addr()))
            .field("tail", &self.tail)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Iterator over a segment's entries. Stops at the write tail; a truncated
/// header or length (which framing never produces) ends iteration early.
pub struct Entries<'a> {
    segment: &'a Segment,
    offset: usize,
}

impl<'a> Iterator for Entries<'a> {
    type Item = Entry<'a>;

    fn next(&mut self) -> Option<Entry<'a>> {
        if self.offset + ENTRY_HEADER_SIZE > self.segment.tail {
            return None;
        }
        let header = EntryHeader::decode(
            self.segment
                .buf
                .bytes(self.offset, ENTRY_HEADER_SIZE),
        )
        .ok()?;
        let start = self.offset + ENTRY_HEADER_SIZE;
        let length = header.length as usize;
        if start + length > self.segment.tail {
            return None;
        }
        self.offset = start + length;
        Some(Entry {
            entry_type: header.entry_type,
            data: self.segment.buf.bytes(start, length),
            location: LogRef::from_addr(self.segment.buf.base_addr() + start),
        })
    }
}
