//! Segment
//!
//! One append-only log file. The active segment owns a write handle;
//! sealed segments only keep a read handle.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{CaskError, Result};

use super::SegmentKind;

/// An append-only log file plus its write cursor
///
/// ## Concurrency:
/// - `writer`: `Some` only while the segment is active; appends serialize on it
/// - `reader`: separate handle, so random reads never move the append cursor
/// - `size`: atomic, readable without taking either lock
pub struct Segment {
    id: u64,
    kind: SegmentKind,
    path: PathBuf,
    writer: Mutex<Option<File>>,
    reader: Mutex<File>,
    size: AtomicU64,
}

impl Segment {
    /// Create a new, empty active segment
    ///
    /// Fails if a file with the same name already exists.
    pub fn create(path: &Path, id: u64, kind: SegmentKind) -> Result<Self> {
        let writer = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(path)?;
        let reader = File::open(path)?;

        Ok(Self {
            id,
            kind,
            path: path.to_path_buf(),
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(reader),
            size: AtomicU64::new(0),
        })
    }

    /// Open an existing segment read-only (sealed)
    pub fn open_sealed(path: &Path, id: u64, kind: SegmentKind) -> Result<Self> {
        let reader = File::open(path)?;
        let size = reader.metadata()?.len();

        Ok(Self {
            id,
            kind,
            path: path.to_path_buf(),
            writer: Mutex::new(None),
            reader: Mutex::new(reader),
            size: AtomicU64::new(size),
        })
    }

    /// Reopen an existing segment as the active one, dropping everything
    /// past `valid_len` (a torn write left behind by a crash)
    pub fn reopen_active(path: &Path, id: u64, kind: SegmentKind, valid_len: u64) -> Result<Self> {
        let writer = OpenOptions::new().write(true).open(path)?;
        if writer.metadata()?.len() != valid_len {
            writer.set_len(valid_len)?;
            writer.sync_all()?;
        }
        drop(writer);

        // Reopen in append mode so every write lands at the (new) end
        let writer = OpenOptions::new().append(true).open(path)?;
        let reader = File::open(path)?;

        Ok(Self {
            id,
            kind,
            path: path.to_path_buf(),
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(reader),
            size: AtomicU64::new(valid_len),
        })
    }

    /// Append bytes durably, returning the offset the write began at
    ///
    /// A failed write is truncated away. If the truncate fails as well the
    /// segment seals itself, since later offsets could no longer be trusted.
    pub fn append(&self, bytes: &[u8]) -> Result<u64> {
        let mut writer = self.writer.lock();
        let file = writer.as_mut().ok_or(CaskError::SegmentSealed(self.id))?;

        let offset = self.size.load(Ordering::Acquire);
        if let Err(e) = file.write_all(bytes).and_then(|_| file.sync_data()) {
            // Roll back a partial write so the cursor matches the file again
            if let Err(rollback) = file.set_len(offset) {
                tracing::error!(
                    "Sealing segment {} after failed rollback to {} bytes: {}",
                    self.path.display(),
                    offset,
                    rollback
                );
                *writer = None;
            }
            return Err(e.into());
        }
        self.size.store(offset + bytes.len() as u64, Ordering::Release);

        Ok(offset)
    }

    /// Random-access read of `len` bytes at `offset`
    pub fn read_at(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let size = self.size();
        if offset.checked_add(len).map_or(true, |end| end > size) {
            return Err(CaskError::corrupt(
                offset,
                format!(
                    "read of {} bytes past end of segment {} ({} bytes)",
                    len, self.id, size
                ),
            ));
        }

        let mut buf = vec![0u8; len as usize];
        let mut reader = self.reader.lock();
        reader.seek(SeekFrom::Start(offset))?;
        reader.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Mark read-only; later appends fail with `SegmentSealed`
    pub fn seal(&self) -> Result<()> {
        if let Some(file) = self.writer.lock().take() {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Current size in bytes
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_sealed(&self) -> bool {
        self.writer.lock().is_none()
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("size", &self.size())
            .finish()
    }
}

/// A segment under construction in a temp file (compaction output)
///
/// Nothing in the data directory refers to it until the segment manager
/// renames it into place.
pub struct PendingSegment {
    id: u64,
    tmp_path: PathBuf,
    writer: BufWriter<File>,
    size: u64,
    records: u64,
}

impl PendingSegment {
    /// Start writing a new segment at `tmp_path`
    pub fn create(tmp_path: &Path, id: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(tmp_path)?;

        Ok(Self {
            id,
            tmp_path: tmp_path.to_path_buf(),
            writer: BufWriter::new(file),
            size: 0,
            records: 0,
        })
    }

    /// Buffer an encoded record, returning its offset
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let offset = self.size;
        self.writer.write_all(bytes)?;
        self.size += bytes.len() as u64;
        self.records += 1;
        Ok(offset)
    }

    /// Flush and fsync; the file is complete and durable afterwards
    ///
    /// On failure the temp file is removed.
    pub fn seal(self) -> Result<SealedPending> {
        let tmp_path = self.tmp_path.clone();
        self.finish().map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            e
        })
    }

    fn finish(mut self) -> Result<SealedPending> {
        self.writer.flush()?;
        let file = self.writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        Ok(SealedPending {
            id: self.id,
            tmp_path: self.tmp_path,
            size: self.size,
            records: self.records,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Give up on this segment and remove its temp file
    pub fn abandon(self) {
        let tmp_path = self.tmp_path.clone();
        drop(self);
        let _ = fs::remove_file(tmp_path);
    }
}

/// A fully written and fsynced pending segment, ready to be swapped in
#[derive(Debug)]
pub struct SealedPending {
    pub id: u64,
    pub tmp_path: PathBuf,
    pub size: u64,
    pub records: u64,
}

impl SealedPending {
    /// Remove the temp file instead of swapping it in
    pub fn discard(self) {
        let _ = fs::remove_file(&self.tmp_path);
    }
}
