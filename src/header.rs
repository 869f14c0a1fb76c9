//! Per-record header codec for the up-channel.
//!
//! Every record in the active block is `header || payload`. The header holds
//! two length fields: `block_sz`, fixed at reservation time, and `wr_sz`,
//! written as 0 when the slot is reserved and rewritten to `block_sz` when
//! the producer finishes. A host that snapshots the block mid-write sees
//! `wr_sz < block_sz` and discards the record; that race is part of the
//! protocol, not a defect.
//!
//! Two fixed widths are selected once at configuration time. `Compact` keeps
//! overhead at two bytes and caps payloads at 255 bytes. `Wide` spends four
//! bytes and steals the top bit of `block_sz` to tag which producer (e.g.
//! CPU core) opened the record; the tag is host-side diagnostics only.

/// Header encoding, chosen once per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderFormat {
    /// `{ block_sz: u8, wr_sz: u8 }`, 2 bytes.
    #[default]
    Compact,
    /// `{ block_sz: u16 (top bit = producer tag), wr_sz: u16 }`, 4 bytes,
    /// little-endian fields.
    Wide,
}

/// Bit of the wide `block_sz` field that carries the producer tag.
pub const WIDE_TAG_SHIFT: u32 = 15;
/// Length bits of the wide `block_sz` field.
pub const WIDE_LEN_MASK: u16 = 0x7FFF;

impl HeaderFormat {
    /// Bytes of overhead in front of every record.
    #[inline]
    pub const fn size(self) -> u32 {
        match self {
            HeaderFormat::Compact => 2,
            HeaderFormat::Wide => 4,
        }
    }

    /// Largest payload a single record can carry in a block of `block_size`
    /// bytes: the full length field in compact mode, the block minus header
    /// (capped by the length bits) in wide mode.
    pub fn usr_data_len_max(self, block_size: u32) -> u32 {
        match self {
            HeaderFormat::Compact => u8::MAX as u32,
            HeaderFormat::Wide => (block_size - self.size()).min(WIDE_LEN_MASK as u32),
        }
    }
}

/// Write an open header: `block_sz = len`, `wr_sz = 0`.
///
/// # Safety
/// `at` must be valid for writes of `fmt.size()` bytes. `len` must fit the
/// format's length field and `tag` must be 0 or 1 (wide) or 0 (compact).
pub(crate) unsafe fn write_open(fmt: HeaderFormat, at: *mut u8, len: u32, tag: u8) {
    match fmt {
        HeaderFormat::Compact => {
            at.write(len as u8);
            at.add(1).write(0);
        }
        HeaderFormat::Wide => {
            let block_sz = (len as u16) | ((tag as u16) << WIDE_TAG_SHIFT);
            core::ptr::copy_nonoverlapping(block_sz.to_le_bytes().as_ptr(), at, 2);
            core::ptr::copy_nonoverlapping(0u16.to_le_bytes().as_ptr(), at.add(2), 2);
        }
    }
}

/// Mark the record whose header starts at `at` as closed: `wr_sz = block_sz`
/// with the tag bits stripped. Idempotent; touches nothing but `wr_sz`.
///
/// # Safety
/// `at` must point at a header previously written by [`write_open`] with the
/// same format.
pub(crate) unsafe fn close_at(fmt: HeaderFormat, at: *mut u8) {
    match fmt {
        HeaderFormat::Compact => {
            let block_sz = at.read();
            at.add(1).write(block_sz);
        }
        HeaderFormat::Wide => {
            let mut raw = [0u8; 2];
            core::ptr::copy_nonoverlapping(at as *const u8, raw.as_mut_ptr(), 2);
            let wr_sz = u16::from_le_bytes(raw) & WIDE_LEN_MASK;
            core::ptr::copy_nonoverlapping(wr_sz.to_le_bytes().as_ptr(), at.add(2), 2);
        }
    }
}

/// Decoded record header, as the host sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Reserved payload length.
    pub block_sz: u32,
    /// Bytes actually written; equals `block_sz` once the record is closed.
    pub wr_sz: u32,
    /// Producer tag (wide format only; always 0 in compact).
    pub tag: u8,
}

impl RecordHeader {
    /// A record is only valid once the producer closed it.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.wr_sz == self.block_sz
    }
}

/// Decode one header from the front of `bytes`. `None` if fewer than
/// `fmt.size()` bytes remain.
pub fn decode(fmt: HeaderFormat, bytes: &[u8]) -> Option<RecordHeader> {
    if bytes.len() < fmt.size() as usize {
        return None;
    }
    Some(match fmt {
        HeaderFormat::Compact => RecordHeader {
            block_sz: bytes[0] as u32,
            wr_sz: bytes[1] as u32,
            tag: 0,
        },
        HeaderFormat::Wide => {
            let raw = u16::from_le_bytes([bytes[0], bytes[1]]);
            RecordHeader {
                block_sz: (raw & WIDE_LEN_MASK) as u32,
                wr_sz: u16::from_le_bytes([bytes[2], bytes[3]]) as u32,
                tag: (raw >> WIDE_TAG_SHIFT) as u8,
            }
        }
    })
}

/// One record as parsed out of a block snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    pub header: RecordHeader,
    /// The reserved payload bytes. Only trustworthy when
    /// `header.is_complete()`.
    pub payload: &'a [u8],
}

/// Walks the `[header || payload]*` layout of a vacated block.
///
/// This is the host-side half of the wire format: feed it a snapshot of a
/// block up to the committed fill level from the swap handshake. Iteration
/// stops cleanly at a truncated trailer.
pub struct RecordIter<'a> {
    fmt: HeaderFormat,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> RecordIter<'a> {
    pub fn new(fmt: HeaderFormat, bytes: &'a [u8]) -> Self {
        Self { fmt, bytes, pos: 0 }
    }
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Record<'a>;

    fn next(&mut self) -> Option<Record<'a>> {
        let header = decode(self.fmt, &self.bytes[self.pos..])?;
        let payload_start = self.pos + self.fmt.size() as usize;
        let payload_end = payload_start + header.block_sz as usize;
        if payload_end > self.bytes.len() {
            return None;
        }
        self.pos = payload_end;
        Some(Record {
            header,
            payload: &self.bytes[payload_start..payload_end],
        })
    }
}
