//! Index Module
//!
//! In-memory map from key to the location of its newest live record.
//!
//! ## Responsibilities
//! - O(1) pointer lookups for reads
//! - Incremental updates on every successful write
//! - Full rebuild by recovery (never persisted, never trusted across restarts)
//!
//! ## Data Structure Choice
//! HashMap wrapped in RwLock:
//! - Point lookups only (no range queries), so no ordering needed
//! - A pointer is `Copy`, so a read observes one whole pointer or none

mod keydir;

pub use keydir::KeyDir;

/// Where a live record lives on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordPointer {
    /// Segment holding the record
    pub segment_id: u64,

    /// Byte offset of the record header within the segment
    pub offset: u64,

    /// Encoded record length, header included
    pub len: u64,
}
