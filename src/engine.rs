//! Engine Module
//!
//! The storage engine that coordinates segments and the index.
//!
//! ## Responsibilities
//! - Append records to the active segment and keep the index current
//! - Serve reads with a single positioned read per key
//! - Merge sealed segments (compaction)
//! - Rebuild the index on startup (recovery)

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use fs2::FileExt;
use parking_lot::{Mutex, RwLock};

use crate::command::Command;
use crate::config::Config;
use crate::error::{CaskError, Result};
use crate::index::{KeyDir, RecordPointer};
use crate::record::{self, Record};
use crate::recovery::{self, RecoveryReport};
use crate::storage::{PendingSegment, Segment, SegmentKind, SegmentManager, SegmentScanner};

/// Point-in-time numbers about an open engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Number of live keys
    pub key_count: usize,

    /// Number of segment files (sealed + active)
    pub segment_count: usize,

    /// Id of the segment currently accepting appends
    pub active_segment_id: Option<u64>,

    /// Total size of all segments
    pub disk_bytes: u64,

    /// Bytes taken by the records the index points at
    pub live_bytes: u64,
}

/// What a compaction run did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    /// Number of segments replaced by the merge output
    pub segments_merged: usize,

    /// Live records written to the merge segment
    pub records_written: u64,

    /// On-disk size before and after the run
    pub bytes_before: u64,
    pub bytes_after: u64,

    /// Id of the merge segment (None when there was nothing to compact)
    pub merged_segment_id: Option<u64>,
}

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (put/delete/compact): Serialized by `write_lock`
///   - Only ONE write operation at a time
///   - Lock order: write_lock → view_lock → segment set → index
///
/// - **Reads** (get): Never take `write_lock`
///   - Hold `view_lock` (read) only to look up the pointer and resolve its
///     segment handle; the disk read happens after the guard is dropped
///   - Compaction holds `view_lock` (write) while it swaps the segment set
///     and installs the rebuilt index, so a pointer and its segment are
///     always resolved from the same view
///   - A resolved `Arc<Segment>` keeps its file handle open, so a read that
///     is in flight while compaction unlinks the file still completes
///
/// A process-level lock on `{data_dir}/LOCK` keeps other processes out.
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Segment files (internal RwLock on the segment set)
    segments: SegmentManager,

    /// key → newest live record (internal RwLock)
    index: KeyDir,

    /// Serializes write operations (put/delete/compact)
    write_lock: Mutex<()>,

    /// Keeps index lookups and segment resolution consistent across a
    /// compaction swap
    view_lock: RwLock<()>,

    /// Held for the engine's lifetime
    dir_lock: File,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const LOCK_FILENAME: &'static str = "LOCK";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate config, create data directory
    /// 2. Take the directory lock
    /// 3. Discover segments (finishing any interrupted compaction)
    /// 4. Replay every segment into the index
    /// 5. Ready to serve requests
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let data_dir = config.data_dir.clone();
        Self::open_inner(config).map_err(|e| CaskError::Open {
            path: data_dir,
            source: Box::new(e),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config)
    }

    fn open_inner(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let dir_lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(config.data_dir.join(Self::LOCK_FILENAME))?;
        if FileExt::try_lock_exclusive(&dir_lock).is_err() {
            return Err(CaskError::Locked(config.data_dir.clone()));
        }

        let segments = SegmentManager::open(&config.data_dir)?;
        let index = KeyDir::new();
        let report = recovery::recover(&segments, &index)?;
        log_recovery(&config.data_dir, &report, index.len());

        Ok(Self {
            config,
            segments,
            index,
            write_lock: Mutex::new(()),
            view_lock: RwLock::new(()),
            dir_lock,
        })
    }

    /// Execute a command
    ///
    /// Routes commands to appropriate handlers
    pub fn execute(&self, command: Command) -> Result<Option<Vec<u8>>> {
        match command {
            Command::Get { key } => self.get(&key),
            Command::Put { key, value } => {
                self.put(&key, &value)?;
                Ok(None)
            }
            Command::Delete { key } => {
                self.delete(&key)?;
                Ok(None)
            }
            Command::Compact => {
                self.compact()?;
                Ok(None)
            }
        }
    }

    /// Get a value by key
    ///
    /// Absent keys return `None` without touching disk. Present keys cost one
    /// read of exactly the record's length at its offset.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let (pointer, segment) = {
            let _view = self.view_lock.read();

            let Some(pointer) = self.index.get(key) else {
                return Ok(None);
            };
            let segment = self.segments.get(pointer.segment_id).ok_or_else(|| {
                CaskError::IndexCorruption(format!(
                    "index points at missing segment {}",
                    pointer.segment_id
                ))
            })?;
            (pointer, segment)
        };

        let bytes = segment
            .read_at(pointer.offset, pointer.len)
            .map_err(|e| as_index_corruption(e, &pointer))?;
        let (record, _) = record::decode(&bytes, 0).map_err(|e| as_index_corruption(e, &pointer))?;

        if record.tombstone {
            return Err(CaskError::IndexCorruption(format!(
                "index points at a tombstone (segment {}, offset {})",
                pointer.segment_id, pointer.offset
            )));
        }
        if record.key != key {
            return Err(CaskError::IndexCorruption(format!(
                "record at segment {}, offset {} belongs to another key",
                pointer.segment_id, pointer.offset
            )));
        }

        Ok(Some(record.value))
    }

    /// Put a key-value pair
    ///
    /// Steps:
    /// 1. Validate the key and value sizes
    /// 2. Acquire write lock
    /// 3. Append the record (rotating first if needed)
    /// 4. Point the index at it
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        check_key(key)?;
        if value.len() > u32::MAX as usize {
            return Err(CaskError::ValueTooLarge(value.len()));
        }

        let _write_guard = self.write_lock.lock();

        let bytes = record::encode(&Record::live(key, value));
        let pointer = self.append(&bytes)?;
        self.index.put(key.to_vec(), pointer);

        Ok(())
    }

    /// Delete a key
    ///
    /// Always appends a tombstone, even if the key is absent, then drops
    /// the index entry. Deleting an absent key is not an error.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        check_key(key)?;

        let _write_guard = self.write_lock.lock();

        let bytes = record::encode(&Record::tombstone(key));
        self.append(&bytes)?;
        self.index.remove(key);

        Ok(())
    }

    /// Merge everything written so far into one segment
    ///
    /// Steps:
    /// 1. Seal the active segment; the merge output and a new active
    ///    segment get the next two ids
    /// 2. Scan the sealed segments oldest → newest, keeping the newest
    ///    record seen per key
    /// 3. Copy each key's newest live record, in key order, into a temp
    ///    segment; keys whose newest record is a tombstone are dropped
    /// 4. Fsync it and swap it in for the scanned segments
    /// 5. Rebuild the index from the merge output plus a replay of the
    ///    (still empty) active segment
    ///
    /// Either the whole swap happens or the pre-compaction state is left
    /// untouched.
    pub fn compact(&self) -> Result<CompactionReport> {
        let _write_guard = self.write_lock.lock();

        let bytes_before = self.segments.total_size();
        if self.already_compact()? {
            tracing::debug!("Nothing to compact");
            return Ok(CompactionReport {
                bytes_before,
                bytes_after: bytes_before,
                ..CompactionReport::default()
            });
        }

        // Step 1: freeze an immutable view
        let (inputs, merge_id) = self.segments.begin_compaction()?;
        let superseded: Vec<u64> = inputs.iter().map(|s| s.id()).collect();

        // Step 2: newest record per key; None marks a tombstone
        let latest = latest_records(&inputs)?;

        // Step 3: write the live survivors
        let by_id: HashMap<u64, &Arc<Segment>> = inputs.iter().map(|s| (s.id(), s)).collect();
        let mut pending = self.segments.create_pending(merge_id)?;
        let mut entries = match copy_live_records(&mut pending, &latest, &by_id) {
            Ok(entries) => entries,
            Err(e) => {
                pending.abandon();
                return Err(e);
            }
        };

        // Step 4: make it durable (a failed seal removes the temp file)
        let sealed = pending.seal()?;
        let records_written = sealed.records;

        // Step 5: writes that landed after the freeze live in the active segment
        let replayed = self
            .segments
            .current_active()
            .and_then(|active| recovery::replay_segment(&active, &mut entries));
        if let Err(e) = replayed {
            sealed.discard();
            return Err(e);
        }

        {
            let _view = self.view_lock.write();
            self.segments.replace_after_compaction(sealed, &superseded)?;
            self.index.replace(entries);
        }

        let report = CompactionReport {
            segments_merged: superseded.len(),
            records_written,
            bytes_before,
            bytes_after: self.segments.total_size(),
            merged_segment_id: Some(merge_id),
        };
        tracing::info!(
            "Compacted {} segments into segment {}: {} live records, {} → {} bytes",
            report.segments_merged,
            merge_id,
            report.records_written,
            report.bytes_before,
            report.bytes_after
        );

        Ok(report)
    }

    /// Close the engine gracefully
    ///
    /// Seals the active segment (fsync) and releases the directory lock
    pub fn close(self) -> Result<()> {
        let _write_guard = self.write_lock.lock();

        self.segments.close()?;
        FileExt::unlock(&self.dir_lock)?;

        tracing::info!("Closed store at {}", self.config.data_dir.display());
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the number of live keys
    pub fn key_count(&self) -> usize {
        self.index.len()
    }

    /// Get the number of segments
    pub fn segment_count(&self) -> usize {
        self.segments.segment_count()
    }

    /// Get the id of the active segment
    pub fn active_segment_id(&self) -> Option<u64> {
        self.segments.active_id()
    }

    /// Get the total on-disk size of all segments
    pub fn disk_size(&self) -> u64 {
        self.segments.total_size()
    }

    /// Every live key, sorted
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.index.keys()
    }

    /// Snapshot of engine statistics
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            key_count: self.index.len(),
            segment_count: self.segments.segment_count(),
            active_segment_id: self.segments.active_id(),
            disk_bytes: self.segments.total_size(),
            live_bytes: self.index.live_bytes(),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Append encoded bytes to the active segment (called with write lock held)
    fn append(&self, bytes: &[u8]) -> Result<RecordPointer> {
        self.segments
            .rotate_if_needed(self.config.segment_size_threshold, bytes.len() as u64)?;

        let active = self.segments.current_active()?;
        let offset = active.append(bytes)?;

        Ok(RecordPointer {
            segment_id: active.id(),
            offset,
            len: bytes.len() as u64,
        })
    }

    /// True when a merge could not shrink anything: no sealed data besides
    /// a single merged segment, and nothing in the active segment
    fn already_compact(&self) -> Result<bool> {
        let active = self.segments.current_active()?;
        if active.size() > 0 {
            return Ok(false);
        }

        let sealed = self.segments.list_sealed();
        Ok(match sealed.as_slice() {
            [] => true,
            [only] => only.kind() == SegmentKind::Merged,
            _ => false,
        })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("data_dir", &self.config.data_dir)
            .field("keys", &self.index.len())
            .field("segments", &self.segments.segment_count())
            .finish()
    }
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.is_empty() || key.len() > u32::MAX as usize {
        return Err(CaskError::InvalidKey);
    }
    Ok(())
}

fn as_index_corruption(err: CaskError, pointer: &RecordPointer) -> CaskError {
    match err {
        CaskError::CorruptRecord { offset, reason } => CaskError::IndexCorruption(format!(
            "segment {}, offset {}: {}",
            pointer.segment_id, offset, reason
        )),
        other => other,
    }
}

/// Newest record per key across `inputs` (oldest first)
///
/// A later record always overwrites an earlier one, whichever segment it
/// came from; (segment id, offset) is the total order of writes.
fn latest_records(inputs: &[Arc<Segment>]) -> Result<BTreeMap<Vec<u8>, Option<RecordPointer>>> {
    let mut latest = BTreeMap::new();

    for segment in inputs {
        for scanned in SegmentScanner::new(segment)? {
            let scanned = scanned?;
            let pointer = (!scanned.record.tombstone).then_some(RecordPointer {
                segment_id: segment.id(),
                offset: scanned.offset,
                len: scanned.len,
            });
            latest.insert(scanned.record.key, pointer);
        }
    }

    Ok(latest)
}

/// Copy every live record into `pending`, returning the new pointers
fn copy_live_records(
    pending: &mut PendingSegment,
    latest: &BTreeMap<Vec<u8>, Option<RecordPointer>>,
    by_id: &HashMap<u64, &Arc<Segment>>,
) -> Result<HashMap<Vec<u8>, RecordPointer>> {
    let mut entries = HashMap::with_capacity(latest.len());

    for (key, pointer) in latest {
        let Some(pointer) = pointer else { continue };
        let source = by_id.get(&pointer.segment_id).ok_or_else(|| {
            CaskError::IndexCorruption(format!(
                "compaction input segment {} disappeared",
                pointer.segment_id
            ))
        })?;

        // Records are copied byte-for-byte; they are already encoded
        let bytes = source.read_at(pointer.offset, pointer.len)?;
        let offset = pending.append(&bytes)?;
        entries.insert(
            key.clone(),
            RecordPointer {
                segment_id: pending.id(),
                offset,
                len: pointer.len,
            },
        );
    }

    Ok(entries)
}

fn log_recovery(data_dir: &Path, report: &RecoveryReport, keys: usize) {
    tracing::info!(
        "Opened store at {}: {} segments, {} records, {} tombstones replayed, {} live keys",
        data_dir.display(),
        report.segments_scanned,
        report.records_replayed,
        report.tombstones_replayed,
        keys
    );
    if report.superseded_removed > 0 || report.temp_files_removed > 0 {
        tracing::info!(
            "Finished interrupted compaction: {} superseded segments, {} temp files removed",
            report.superseded_removed,
            report.temp_files_removed
        );
    }
}
