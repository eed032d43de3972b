//! Storage Module
//!
//! Append-only segment files and the manager that owns them.
//!
//! ## Responsibilities
//! - Durable sequential appends to the single active segment
//! - Random-offset reads from any segment
//! - Rotation once the active segment crosses the size threshold
//! - Crash-safe swap of compacted segments
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/
//!   ├── merged-0000000003.log       ← compaction output, supersedes ids < 3
//!   ├── segment-0000000004.log      ← sealed
//!   ├── segment-0000000005.log      ← active (highest id)
//!   └── merged-0000000006.log.tmp   ← compaction in progress (removed at open)
//! ```
//!
//! Segment order is the id order embedded in the file names.

mod manager;
mod scanner;
mod segment;

use std::path::Path;

pub use manager::{Leftovers, SegmentManager};
pub use scanner::{ScannedRecord, SegmentScanner};
pub use segment::{PendingSegment, SealedPending, Segment};

/// Extension shared by every segment file
pub(crate) const SEGMENT_EXT: &str = ".log";

/// Suffix of compaction output that has not been renamed into place yet
pub(crate) const TMP_SUFFIX: &str = ".tmp";

/// How a segment came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Written by appends from put/delete
    Log,
    /// Written by compaction; supersedes every segment with a smaller id
    Merged,
}

impl SegmentKind {
    fn prefix(self) -> &'static str {
        match self {
            SegmentKind::Log => "segment-",
            SegmentKind::Merged => "merged-",
        }
    }
}

/// "segment-0000000042.log" for (42, Log)
pub fn segment_file_name(id: u64, kind: SegmentKind) -> String {
    format!("{}{:010}{}", kind.prefix(), id, SEGMENT_EXT)
}

/// Parse a segment file name back into (id, kind)
/// "merged-0000000042.log" → Some((42, Merged))
pub fn parse_segment_file_name(path: &Path) -> Option<(u64, SegmentKind)> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(SEGMENT_EXT)?;

    [SegmentKind::Log, SegmentKind::Merged]
        .into_iter()
        .find_map(|kind| {
            let digits = stem.strip_prefix(kind.prefix())?;
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            digits.parse().ok().map(|id| (id, kind))
        })
}
