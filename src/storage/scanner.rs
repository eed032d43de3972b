//! Segment Scanner
//!
//! Sequential iteration over every record in a segment, oldest first.

use std::fs::File;
use std::io::{BufReader, Read};

use crate::error::{CaskError, Result};
use crate::record::{Record, RecordHeader, HEADER_SIZE};

use super::Segment;

/// A record together with where it lives in its segment
#[derive(Debug, Clone)]
pub struct ScannedRecord {
    pub record: Record,
    pub offset: u64,
    pub len: u64,
}

/// Iterator over the records of one segment
///
/// Stops cleanly at end of file. A trailing record whose header is cut
/// short, whose declared length runs past the end of the file, or whose
/// key is empty ends the scan as a torn tail: see
/// [`SegmentScanner::torn_tail_bytes`]. A record that fits but carries a
/// tomb byte other than 0 or 1 is an error.
pub struct SegmentScanner {
    reader: BufReader<File>,
    segment_id: u64,
    /// Stop reading at this offset (segment size when the scan began)
    end_offset: u64,
    current_offset: u64,
    torn: bool,
    failed: bool,
}

impl SegmentScanner {
    /// Scan `segment` from the start up to its current size
    pub fn new(segment: &Segment) -> Result<Self> {
        let file = File::open(segment.path())?;
        Ok(Self {
            reader: BufReader::new(file),
            segment_id: segment.id(),
            end_offset: segment.size(),
            current_offset: 0,
            torn: false,
            failed: false,
        })
    }

    /// Offset just past the last whole record read so far
    pub fn valid_len(&self) -> u64 {
        self.current_offset
    }

    /// Bytes discarded after the last whole record (0 if the tail is clean)
    pub fn torn_tail_bytes(&self) -> u64 {
        if self.torn {
            self.end_offset - self.current_offset
        } else {
            0
        }
    }

    fn read_next(&mut self) -> Result<Option<ScannedRecord>> {
        let remaining = self.end_offset - self.current_offset;
        if remaining == 0 {
            return Ok(None);
        }
        if remaining < HEADER_SIZE as u64 {
            self.torn = true;
            return Ok(None);
        }

        let mut header_bytes = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut header_bytes)?;

        // Lengths first: a torn write can leave any byte in the tomb slot
        let Some((key_len, val_len)) = RecordHeader::peek_lengths(&header_bytes) else {
            self.torn = true;
            return Ok(None);
        };
        let record_len = HEADER_SIZE as u64 + key_len as u64 + val_len as u64;
        if record_len > remaining {
            self.torn = true;
            return Ok(None);
        }

        // No writer produces an empty key; this is a zero-filled tail
        if key_len == 0 {
            self.torn = true;
            return Ok(None);
        }

        let header = RecordHeader::parse(&header_bytes, self.current_offset)?;

        let mut key = vec![0u8; header.key_len as usize];
        self.reader.read_exact(&mut key)?;
        let mut value = vec![0u8; header.val_len as usize];
        self.reader.read_exact(&mut value)?;

        let record = if header.tombstone {
            Record::tombstone(key)
        } else {
            Record::live(key, value)
        };

        let offset = self.current_offset;
        self.current_offset += record_len;

        Ok(Some(ScannedRecord {
            record,
            offset,
            len: record_len,
        }))
    }
}

impl Iterator for SegmentScanner {
    type Item = Result<ScannedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.torn || self.failed {
            return None;
        }

        match self.read_next() {
            Ok(Some(scanned)) => Some(Ok(scanned)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(match e {
                    CaskError::CorruptRecord { offset, reason } => CaskError::CorruptRecord {
                        offset,
                        reason: format!("segment {}: {}", self.segment_id, reason),
                    },
                    other => other,
                }))
            }
        }
    }
}
