//! Record Codec
//!
//! Encodes and decodes the single unit persisted in a segment.
//!
//! ## Record Format
//! ```text
//! ┌──────────────┬──────────────┬──────────┬───────────┬─────────────┐
//! │ KeyLen (4)   │ ValLen (4)   │ Tomb (1) │ Key       │ Value       │
//! │ u32, BE      │ u32, BE      │ 0 / 1    │ KeyLen B  │ ValLen B    │
//! └──────────────┴──────────────┴──────────┴───────────┴─────────────┘
//! ```
//!
//! Tombstones are written with `ValLen = 0`. The layout has no checksum and
//! no padding, so existing data directories stay readable bit-for-bit.

use bytes::{Buf, BufMut};

use crate::error::{CaskError, Result};

/// Header size: KeyLen (4) + ValLen (4) + Tomb (1) = 9 bytes
pub const HEADER_SIZE: usize = 9;

const TOMB_LIVE: u8 = 0;
const TOMB_DELETED: u8 = 1;

/// A single log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    /// Always empty for tombstones
    pub value: Vec<u8>,
    pub tombstone: bool,
}

impl Record {
    /// A live key/value record
    pub fn live(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            tombstone: false,
        }
    }

    /// A deletion marker for `key`
    pub fn tombstone(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: Vec::new(),
            tombstone: true,
        }
    }

    /// Number of bytes `encode` produces for this record
    pub fn encoded_len(&self) -> usize {
        let value_len = if self.tombstone { 0 } else { self.value.len() };
        HEADER_SIZE + self.key.len() + value_len
    }
}

/// Parsed fixed-size record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub key_len: u32,
    pub val_len: u32,
    pub tombstone: bool,
}

impl RecordHeader {
    /// Parse the first `HEADER_SIZE` bytes of `bytes`.
    ///
    /// `offset` is only used to report where a bad header was found.
    pub fn parse(mut bytes: &[u8], offset: u64) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(CaskError::corrupt(
                offset,
                format!(
                    "incomplete header: expected {} bytes, got {}",
                    HEADER_SIZE,
                    bytes.len()
                ),
            ));
        }

        let key_len = bytes.get_u32();
        let val_len = bytes.get_u32();
        if key_len == 0 {
            return Err(CaskError::corrupt(offset, "record has an empty key"));
        }
        let tombstone = match bytes.get_u8() {
            TOMB_LIVE => false,
            TOMB_DELETED => true,
            other => {
                return Err(CaskError::corrupt(
                    offset,
                    format!("invalid tombstone flag 0x{:02x}", other),
                ))
            }
        };

        Ok(Self {
            key_len,
            val_len,
            tombstone,
        })
    }

    /// Key and value lengths from the start of a header, without looking
    /// at the tomb byte. `None` if the length fields are incomplete.
    pub fn peek_lengths(mut bytes: &[u8]) -> Option<(u32, u32)> {
        if bytes.len() < 8 {
            return None;
        }
        Some((bytes.get_u32(), bytes.get_u32()))
    }

    /// Length of the payload that follows the header
    pub fn body_len(&self) -> u64 {
        self.key_len as u64 + self.val_len as u64
    }

    /// Length of the whole record, header included
    pub fn record_len(&self) -> u64 {
        HEADER_SIZE as u64 + self.body_len()
    }
}

/// Encode a record to bytes
///
/// Never fails: lengths only need to fit the u32 header fields, which the
/// caller guarantees for keys and values handed to the engine.
pub fn encode(record: &Record) -> Vec<u8> {
    let value: &[u8] = if record.tombstone { &[] } else { &record.value };

    let mut buf = Vec::with_capacity(record.encoded_len());
    buf.put_u32(record.key.len() as u32);
    buf.put_u32(value.len() as u32);
    buf.put_u8(if record.tombstone { TOMB_DELETED } else { TOMB_LIVE });
    buf.put_slice(&record.key);
    buf.put_slice(value);
    buf
}

/// Decode the record starting at `offset` within `bytes`
///
/// Returns the record and number of bytes consumed. Fails with
/// `CorruptRecord` when fewer bytes remain than the header declares.
pub fn decode(bytes: &[u8], offset: usize) -> Result<(Record, usize)> {
    let remaining = bytes.get(offset..).unwrap_or(&[]);
    let header = RecordHeader::parse(remaining, offset as u64)?;

    let record_len = header.record_len();
    if (remaining.len() as u64) < record_len {
        return Err(CaskError::corrupt(
            offset as u64,
            format!(
                "record declares {} bytes, only {} remain",
                record_len,
                remaining.len()
            ),
        ));
    }

    let key_start = HEADER_SIZE;
    let key_end = key_start + header.key_len as usize;
    let value_end = key_end + header.val_len as usize;

    let key = remaining[key_start..key_end].to_vec();
    let record = if header.tombstone {
        Record::tombstone(key)
    } else {
        Record::live(key, remaining[key_end..value_end].to_vec())
    };

    Ok((record, record_len as usize))
}
