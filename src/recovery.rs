//! Recovery
//!
//! Rebuilds the index by replaying every segment in age order.
//!
//! ## Procedure
//! 1. Walk the segments oldest → newest (by id)
//! 2. Decode every record in file order
//!    - live record → point the key at it
//!    - tombstone   → drop the key
//! 3. Stop a segment's scan at a torn trailing record and discard it
//! 4. Reopen the newest log segment as active, truncated to its last
//!    whole record, so new appends never land behind garbage
//!
//! Replaying in any other order would let stale writes clobber newer ones.

use std::collections::HashMap;

use crate::error::Result;
use crate::index::{KeyDir, RecordPointer};
use crate::storage::{Segment, SegmentManager, SegmentScanner};

/// Outcome of a recovery run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Number of segments replayed
    pub segments_scanned: u64,

    /// Number of live records applied
    pub records_replayed: u64,

    /// Number of tombstones applied
    pub tombstones_replayed: u64,

    /// Bytes discarded from torn trailing records
    pub torn_tail_bytes: u64,

    /// Segments removed because a merged segment supersedes them
    pub superseded_removed: u64,

    /// Unfinished compaction temp files removed
    pub temp_files_removed: u64,
}

/// What replaying a single segment found
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SegmentReplay {
    pub records: u64,
    pub tombstones: u64,
    /// Offset just past the last whole record
    pub valid_len: u64,
    pub torn_tail_bytes: u64,
}

/// Replay one segment's records into `entries`, last write wins
pub fn replay_segment(
    segment: &Segment,
    entries: &mut HashMap<Vec<u8>, RecordPointer>,
) -> Result<SegmentReplay> {
    let mut replay = SegmentReplay::default();
    let mut scanner = SegmentScanner::new(segment)?;

    for scanned in scanner.by_ref() {
        let scanned = scanned?;
        if scanned.record.tombstone {
            entries.remove(&scanned.record.key);
            replay.tombstones += 1;
        } else {
            let pointer = RecordPointer {
                segment_id: segment.id(),
                offset: scanned.offset,
                len: scanned.len,
            };
            entries.insert(scanned.record.key, pointer);
            replay.records += 1;
        }
    }

    replay.valid_len = scanner.valid_len();
    replay.torn_tail_bytes = scanner.torn_tail_bytes();

    Ok(replay)
}

/// Rebuild `index` from every segment in `segments`
///
/// Expects a freshly opened manager (no active segment yet). Leaves the
/// manager with an active segment: the newest log segment if there is one,
/// otherwise a new empty segment.
pub fn recover(segments: &SegmentManager, index: &KeyDir) -> Result<RecoveryReport> {
    let leftovers = segments.leftovers();
    let mut report = RecoveryReport {
        superseded_removed: leftovers.superseded_removed,
        temp_files_removed: leftovers.temp_files_removed,
        ..RecoveryReport::default()
    };

    let mut entries = HashMap::new();
    let mut tail_len = None;

    let all = segments.list_all();
    for (position, segment) in all.iter().enumerate() {
        let replay = replay_segment(segment, &mut entries)?;
        tracing::debug!(
            "Replayed segment {}: {} records, {} tombstones",
            segment.id(),
            replay.records,
            replay.tombstones
        );

        if replay.torn_tail_bytes > 0 {
            tracing::warn!(
                "Discarding {} bytes of torn record at offset {} in segment {}",
                replay.torn_tail_bytes,
                replay.valid_len,
                segment.path().display()
            );
        }

        report.segments_scanned += 1;
        report.records_replayed += replay.records;
        report.tombstones_replayed += replay.tombstones;
        report.torn_tail_bytes += replay.torn_tail_bytes;

        if position + 1 == all.len() {
            tail_len = Some(replay.valid_len);
        }
    }

    index.replace(entries);

    if let Some(valid_len) = tail_len {
        if let Some(active) = segments.reopen_tail(valid_len)? {
            tracing::debug!("Resuming appends to segment {}", active.id());
        }
    }
    segments.current_active()?;

    Ok(report)
}
