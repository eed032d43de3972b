//! Segment Manager
//!
//! Owns the ordered segment set and enforces the single-active-segment rule.
//!
//! ## Responsibilities
//! - Discover existing segments on startup (and finish interrupted compactions)
//! - Hand out the active segment, creating it on first use
//! - Rotate the active segment once it crosses the size threshold
//! - Swap compacted output in for the segments it replaces

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{CaskError, Result};

use super::{
    parse_segment_file_name, segment_file_name, PendingSegment, SealedPending, Segment,
    SegmentKind, SEGMENT_EXT, TMP_SUFFIX,
};

/// Segments keyed by id (oldest first), plus which one is active
struct SegmentSet {
    segments: BTreeMap<u64, Arc<Segment>>,
    active: Option<u64>,
}

/// Files removed while opening the directory
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Leftovers {
    /// Segments older than a merged segment (crash after the compaction rename)
    pub superseded_removed: u64,
    /// Unfinished compaction output (crash before the rename)
    pub temp_files_removed: u64,
}

/// Manages the segment files of one data directory
///
/// ## Concurrency:
/// - `set`: Protected by RwLock (readers resolve segments while the writer rotates)
/// - `next_id`: Atomic counter (lock-free)
/// - All methods use `&self`; the engine serializes mutating callers
pub struct SegmentManager {
    dir: PathBuf,
    set: RwLock<SegmentSet>,
    next_id: AtomicU64,
    leftovers: Leftovers,
}

impl SegmentManager {
    /// Open the segments in `dir`, creating the directory if needed
    ///
    /// On startup:
    /// 1. Remove unfinished compaction temp files
    /// 2. Remove segments superseded by the newest merged segment
    /// 3. Open every remaining segment read-only, ordered by id
    ///
    /// No segment is active afterwards; see [`SegmentManager::reopen_tail`]
    /// and [`SegmentManager::current_active`].
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let mut leftovers = Leftovers::default();
        let mut found: BTreeMap<u64, (SegmentKind, PathBuf)> = BTreeMap::new();

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }

            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if name.ends_with(&format!("{}{}", SEGMENT_EXT, TMP_SUFFIX)) {
                tracing::warn!("Removing unfinished compaction output {}", path.display());
                fs::remove_file(&path)?;
                leftovers.temp_files_removed += 1;
                continue;
            }

            if let Some((id, kind)) = parse_segment_file_name(&path) {
                if let Some((_, existing)) = found.insert(id, (kind, path.clone())) {
                    return Err(CaskError::corrupt(
                        0,
                        format!(
                            "segment id {} claimed by both {} and {}",
                            id,
                            existing.display(),
                            path.display()
                        ),
                    ));
                }
            }
        }

        // A merged segment holds the latest state of every id below it
        let newest_merged = found
            .iter()
            .rev()
            .find(|(_, (kind, _))| *kind == SegmentKind::Merged)
            .map(|(&id, _)| id);

        if let Some(merged_id) = newest_merged {
            let stale: Vec<u64> = found.range(..merged_id).map(|(&id, _)| id).collect();
            for id in stale {
                if let Some((_, path)) = found.remove(&id) {
                    tracing::warn!(
                        "Removing segment {} superseded by merged segment {}",
                        path.display(),
                        merged_id
                    );
                    fs::remove_file(&path)?;
                    leftovers.superseded_removed += 1;
                }
            }
            if leftovers.superseded_removed > 0 {
                sync_dir(dir)?;
            }
        }

        let mut segments = BTreeMap::new();
        for (id, (kind, path)) in &found {
            let segment = Segment::open_sealed(path, *id, *kind)?;
            segments.insert(*id, Arc::new(segment));
        }

        // Next ID = max + 1, or 1 if no segments exist
        let next_id = found.keys().next_back().map(|&id| id + 1).unwrap_or(1);

        Ok(Self {
            dir: dir.to_path_buf(),
            set: RwLock::new(SegmentSet {
                segments,
                active: None,
            }),
            next_id: AtomicU64::new(next_id),
            leftovers,
        })
    }

    /// Make the newest segment active again, truncated to `valid_len`
    ///
    /// Only a regular log segment is reopened; a merged segment stays sealed
    /// and the next call to `current_active` creates a fresh segment instead.
    /// Returns the reopened segment, if any.
    pub fn reopen_tail(&self, valid_len: u64) -> Result<Option<Arc<Segment>>> {
        let mut set = self.set.write();
        if set.active.is_some() {
            return Ok(None);
        }

        let Some((&id, last)) = set.segments.iter().next_back() else {
            return Ok(None);
        };
        if last.kind() != SegmentKind::Log {
            return Ok(None);
        }

        let reopened = Arc::new(Segment::reopen_active(
            last.path(),
            id,
            SegmentKind::Log,
            valid_len,
        )?);
        set.segments.insert(id, Arc::clone(&reopened));
        set.active = Some(id);

        Ok(Some(reopened))
    }

    /// The active segment, created (with a fresh id) if none exists yet
    pub fn current_active(&self) -> Result<Arc<Segment>> {
        {
            let set = self.set.read();
            if let Some(segment) = set.active.and_then(|id| set.segments.get(&id)) {
                return Ok(Arc::clone(segment));
            }
        }

        let mut set = self.set.write();
        if let Some(segment) = set.active.and_then(|id| set.segments.get(&id)) {
            return Ok(Arc::clone(segment));
        }
        self.open_new_active(&mut set)
    }

    /// Seal the active segment and open the next one if the active segment
    /// is at or past `threshold`, or if appending `incoming` bytes would push
    /// a non-empty segment past it.
    ///
    /// Records are never split: an oversized record still goes, whole, into
    /// an empty segment. An active segment that sealed itself after a failed
    /// append is always rotated. Returns true if a rotation happened.
    pub fn rotate_if_needed(&self, threshold: u64, incoming: u64) -> Result<bool> {
        let active = self.current_active()?;
        let size = active.size();

        let full = size >= threshold || (size > 0 && size.saturating_add(incoming) > threshold);
        if !full && !active.is_sealed() {
            return Ok(false);
        }

        let next = self.rotate()?;
        tracing::info!(
            "Rotated segment {} ({} bytes), active segment is now {}",
            active.id(),
            size,
            next.id()
        );
        Ok(true)
    }

    /// Unconditionally seal the active segment and open a new one
    pub fn rotate(&self) -> Result<Arc<Segment>> {
        let mut set = self.set.write();
        self.seal_active(&mut set)?;
        self.open_new_active(&mut set)
    }

    /// Freeze everything written so far for compaction
    ///
    /// Seals the active segment, reserves the next id for the merge output
    /// and opens a new active segment after it, so that
    /// `inputs < merge id < active id`. Returns the inputs, oldest first,
    /// and the reserved id.
    pub fn begin_compaction(&self) -> Result<(Vec<Arc<Segment>>, u64)> {
        let mut set = self.set.write();
        self.seal_active(&mut set)?;

        let inputs: Vec<Arc<Segment>> = set.segments.values().cloned().collect();
        let merge_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.open_new_active(&mut set)?;

        Ok((inputs, merge_id))
    }

    /// Start writing the merge output for a reserved id
    pub fn create_pending(&self, id: u64) -> Result<PendingSegment> {
        PendingSegment::create(&self.tmp_path(id), id)
    }

    /// Swap a finished merge segment in for the segments it replaces
    ///
    /// 1. Rename the fsynced temp file into place and fsync the directory
    ///    (the merge output is now durable and supersedes older ids)
    /// 2. Delete the superseded segment files
    /// 3. Update the in-memory segment set
    ///
    /// A crash after step 1 leaves superseded files behind; `open` removes
    /// them. Failures in step 2 are logged and left for the same cleanup.
    pub fn replace_after_compaction(
        &self,
        merged: SealedPending,
        superseded: &[u64],
    ) -> Result<Arc<Segment>> {
        if let Some(&newest) = superseded.iter().max() {
            if newest >= merged.id {
                return Err(CaskError::Config(format!(
                    "merge segment {} must be newer than superseded segment {}",
                    merged.id, newest
                )));
            }
        }

        // Phase 1: make the new segment durable and visible
        let final_path = self.segment_path(merged.id, SegmentKind::Merged);
        fs::rename(&merged.tmp_path, &final_path)?;
        sync_dir(&self.dir)?;
        let segment = Arc::new(Segment::open_sealed(
            &final_path,
            merged.id,
            SegmentKind::Merged,
        )?);

        // Phase 2: retire the old segments
        let mut set = self.set.write();
        for id in superseded {
            if let Some(old) = set.segments.get(id) {
                if let Err(e) = fs::remove_file(old.path()) {
                    tracing::warn!(
                        "Failed to remove superseded segment {}: {}",
                        old.path().display(),
                        e
                    );
                }
            }
        }
        for id in superseded {
            set.segments.remove(id);
        }
        set.segments.insert(merged.id, Arc::clone(&segment));

        Ok(segment)
    }

    /// Sealed segments, oldest first
    pub fn list_sealed(&self) -> Vec<Arc<Segment>> {
        let set = self.set.read();
        set.segments
            .iter()
            .filter(|&(&id, _)| Some(id) != set.active)
            .map(|(_, segment)| Arc::clone(segment))
            .collect()
    }

    /// Every segment (sealed and active), oldest first
    pub fn list_all(&self) -> Vec<Arc<Segment>> {
        self.set.read().segments.values().cloned().collect()
    }

    /// Resolve a segment by id
    pub fn get(&self, id: u64) -> Option<Arc<Segment>> {
        self.set.read().segments.get(&id).cloned()
    }

    /// Seal the active segment (flushes it to disk)
    pub fn close(&self) -> Result<()> {
        let mut set = self.set.write();
        self.seal_active(&mut set)
    }

    /// Get the number of segments
    pub fn segment_count(&self) -> usize {
        self.set.read().segments.len()
    }

    /// Id of the active segment, if one is open
    pub fn active_id(&self) -> Option<u64> {
        self.set.read().active
    }

    /// Sum of all segment sizes in bytes
    pub fn total_size(&self) -> u64 {
        self.set.read().segments.values().map(|s| s.size()).sum()
    }

    /// Files removed while opening
    pub fn leftovers(&self) -> Leftovers {
        self.leftovers
    }

    /// Get the data directory path
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get the next segment ID (for testing/debugging)
    pub fn next_segment_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn seal_active(&self, set: &mut SegmentSet) -> Result<()> {
        if let Some(id) = set.active.take() {
            if let Some(segment) = set.segments.get(&id) {
                segment.seal()?;
            }
        }
        Ok(())
    }

    fn open_new_active(&self, set: &mut SegmentSet) -> Result<Arc<Segment>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let path = self.segment_path(id, SegmentKind::Log);
        let segment = Arc::new(Segment::create(&path, id, SegmentKind::Log)?);
        sync_dir(&self.dir)?;

        set.segments.insert(id, Arc::clone(&segment));
        set.active = Some(id);
        tracing::debug!("Opened active segment {}", path.display());

        Ok(segment)
    }

    fn segment_path(&self, id: u64, kind: SegmentKind) -> PathBuf {
        self.dir.join(segment_file_name(id, kind))
    }

    fn tmp_path(&self, id: u64) -> PathBuf {
        self.dir
            .join(format!("{}{}", segment_file_name(id, SegmentKind::Merged), TMP_SUFFIX))
    }
}

/// Make renames and unlinks in `dir` durable
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    fs::File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
