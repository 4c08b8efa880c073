//! Segment Entry Framing
//!
//! This module defines the binary layout of typed entries inside a segment.
//! A segment is a fixed-size byte buffer carrying a sequence of entries:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Entry: SEGMENT_HEADER                                    │
//! │ - EntryHeader (8 bytes): type, reserved, length          │
//! │ - log_id (8 bytes, LE)                                   │
//! │ - segment_id (8 bytes, LE)                               │
//! ├──────────────────────────────────────────────────────────┤
//! │ Entry: user type                                         │
//! │ - EntryHeader (8 bytes)                                  │
//! │ - payload (length bytes)                                 │
//! ├──────────────────────────────────────────────────────────┤
//! │ ...                                                      │
//! ├──────────────────────────────────────────────────────────┤
//! │ Entry: SEGMENT_FOOTER (appended on close)                │
//! │ - EntryHeader (8 bytes)                                  │
//! │ - CRC32 over all preceding bytes (4 bytes, LE)           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Entry types below [`EntryType::USER_BASE`] are reserved for framing; the
//! log refuses to append them and never surfaces them to eviction callbacks.
//! All integers are little-endian.

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};

/// Size of an entry header on the wire.
pub const ENTRY_HEADER_SIZE: usize = 8;

/// Payload size of a `SEGMENT_HEADER` entry (log id + segment id).
pub const SEGMENT_HEADER_LEN: usize = 16;

/// Payload size of a `SEGMENT_FOOTER` entry (CRC32 checksum).
pub const SEGMENT_FOOTER_LEN: usize = 4;

/// Tag identifying what an entry's payload contains.
///
/// Tags below [`Self::USER_BASE`] belong to segment framing. Everything from
/// `USER_BASE` up is available to log clients, who register an eviction
/// handler per tag they use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryType(u8);

impl EntryType {
    /// First entry of every segment: identifies the owning log and segment.
    pub const SEGMENT_HEADER: EntryType = EntryType(0);

    /// Last entry of a closed segment: checksum over everything before it.
    pub const SEGMENT_FOOTER: EntryType = EntryType(1);

    /// Lowest tag available to log clients.
    pub const USER_BASE: u8 = 16;

    pub const fn new(raw: u8) -> EntryType {
        EntryType(raw)
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Whether this tag belongs to segment framing rather than client data.
    pub const fn is_reserved(self) -> bool {
        self.0 < Self::USER_BASE
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed header preceding every entry payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub entry_type: EntryType,
    /// Payload length in bytes (header excluded).
    pub length: u32,
}

impl EntryHeader {
    pub fn new(entry_type: EntryType, length: u32) -> EntryHeader {
        EntryHeader { entry_type, length }
    }

    /// Encode as 8 bytes: type, 3 reserved bytes, length (LE).
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.entry_type.raw());
        buf.put_bytes(0, 3);
        buf.put_u32_le(self.length);
    }

    pub fn decode(mut buf: impl Buf) -> Result<EntryHeader> {
        if buf.remaining() < ENTRY_HEADER_SIZE {
            return Err(Error::Truncated {
                needed: ENTRY_HEADER_SIZE,
                available: buf.remaining(),
            });
        }
        let entry_type = EntryType::new(buf.get_u8());
        buf.advance(3);
        let length = buf.get_u32_le();
        Ok(EntryHeader { entry_type, length })
    }
}

/// Payload of the `SEGMENT_HEADER` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub log_id: u64,
    pub segment_id: u64,
}

impl SegmentHeader {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.log_id);
        buf.put_u64_le(self.segment_id);
    }

    pub fn decode(mut buf: impl Buf) -> Result<SegmentHeader> {
        if buf.remaining() < SEGMENT_HEADER_LEN {
            return Err(Error::Truncated {
                needed: SEGMENT_HEADER_LEN,
                available: buf.remaining(),
            });
        }
        Ok(SegmentHeader {
            log_id: buf.get_u64_le(),
            segment_id: buf.get_u64_le(),
        })
    }
}

/// Payload of the `SEGMENT_FOOTER` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentFooter {
    /// CRC32 over every segment byte preceding the footer entry.
    pub checksum: u32,
}

impl SegmentFooter {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.checksum);
    }

    pub fn decode(mut buf: impl Buf) -> Result<SegmentFooter> {
        if buf.remaining() < SEGMENT_FOOTER_LEN {
            return Err(Error::Truncated {
                needed: SEGMENT_FOOTER_LEN,
                available: buf.remaining(),
            });
        }
        Ok(SegmentFooter {
            checksum: buf.get_u32_le(),
        })
    }
}
