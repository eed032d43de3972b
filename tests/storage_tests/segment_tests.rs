//! Tests for Segment, PendingSegment and SegmentScanner
//!
//! These tests verify:
//! - Appends return the starting offset and advance the cursor
//! - Random reads do not disturb appends
//! - Sealed segments reject appends
//! - Scanning yields records in file order and detects torn tails

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use caskkv::record::{encode, Record};
use caskkv::storage::{PendingSegment, Segment, SegmentKind, SegmentScanner};
use caskkv::CaskError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_segment() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("segment-0000000001.log");
    (temp_dir, path)
}

fn live(key: &str, value: &str) -> Vec<u8> {
    encode(&Record::live(key.as_bytes().to_vec(), value.as_bytes().to_vec()))
}

// =============================================================================
// Append / Read Tests
// =============================================================================

#[test]
fn test_create_empty_segment() {
    let (_temp, path) = setup_temp_segment();

    let segment = Segment::create(&path, 1, SegmentKind::Log).unwrap();

    assert!(path.exists());
    assert_eq!(segment.id(), 1);
    assert_eq!(segment.size(), 0);
    assert!(!segment.is_sealed());
}

#[test]
fn test_create_refuses_existing_file() {
    let (_temp, path) = setup_temp_segment();
    Segment::create(&path, 1, SegmentKind::Log).unwrap();

    let result = Segment::create(&path, 1, SegmentKind::Log);

    assert!(matches!(result, Err(CaskError::Io(_))));
}

#[test]
fn test_append_returns_start_offset() {
    let (_temp, path) = setup_temp_segment();
    let segment = Segment::create(&path, 1, SegmentKind::Log).unwrap();

    let first = live("a", "1");
    let second = live("b", "22");

    assert_eq!(segment.append(&first).unwrap(), 0);
    assert_eq!(segment.append(&second).unwrap(), first.len() as u64);
    assert_eq!(segment.size(), (first.len() + second.len()) as u64);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), segment.size());
}

#[test]
fn test_read_at_between_appends() {
    let (_temp, path) = setup_temp_segment();
    let segment = Segment::create(&path, 1, SegmentKind::Log).unwrap();

    let first = live("a", "1");
    segment.append(&first).unwrap();
    assert_eq!(segment.read_at(0, first.len() as u64).unwrap(), first);

    // Reading must not move the append cursor
    let second = live("b", "2");
    let offset = segment.append(&second).unwrap();
    assert_eq!(offset, first.len() as u64);
    assert_eq!(segment.read_at(offset, second.len() as u64).unwrap(), second);
}

#[test]
fn test_read_past_end_fails() {
    let (_temp, path) = setup_temp_segment();
    let segment = Segment::create(&path, 1, SegmentKind::Log).unwrap();
    segment.append(&live("a", "1")).unwrap();

    let result = segment.read_at(5, 100);

    assert!(matches!(result, Err(CaskError::CorruptRecord { .. })));
}

#[test]
fn test_seal_rejects_appends() {
    let (_temp, path) = setup_temp_segment();
    let segment = Segment::create(&path, 7, SegmentKind::Log).unwrap();
    segment.append(&live("a", "1")).unwrap();

    segment.seal().unwrap();

    assert!(segment.is_sealed());
    assert!(matches!(
        segment.append(&live("b", "2")),
        Err(CaskError::SegmentSealed(7))
    ));
    // Still readable
    assert_eq!(segment.read_at(0, 11).unwrap(), live("a", "1"));
}

#[test]
fn test_open_sealed_existing_file() {
    let (_temp, path) = setup_temp_segment();
    {
        let segment = Segment::create(&path, 1, SegmentKind::Log).unwrap();
        segment.append(&live("a", "1")).unwrap();
    }

    let segment = Segment::open_sealed(&path, 1, SegmentKind::Log).unwrap();

    assert!(segment.is_sealed());
    assert_eq!(segment.size(), 11);
    assert!(matches!(
        segment.append(&live("b", "2")),
        Err(CaskError::SegmentSealed(1))
    ));
}

#[test]
fn test_reopen_active_truncates_tail() {
    let (_temp, path) = setup_temp_segment();
    let record = live("a", "1");
    {
        let segment = Segment::create(&path, 1, SegmentKind::Log).unwrap();
        segment.append(&record).unwrap();
    }
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0xde, 0xad]).unwrap();
    drop(file);

    let segment =
        Segment::reopen_active(&path, 1, SegmentKind::Log, record.len() as u64).unwrap();

    assert_eq!(std::fs::metadata(&path).unwrap().len(), record.len() as u64);
    let next = live("b", "2");
    assert_eq!(segment.append(&next).unwrap(), record.len() as u64);
    assert_eq!(segment.read_at(record.len() as u64, next.len() as u64).unwrap(), next);
}

// =============================================================================
// Scanner Tests
// =============================================================================

#[test]
fn test_scan_in_file_order() {
    let (_temp, path) = setup_temp_segment();
    let segment = Segment::create(&path, 1, SegmentKind::Log).unwrap();
    segment.append(&live("a", "1")).unwrap();
    segment
        .append(&encode(&Record::tombstone(b"a".to_vec())))
        .unwrap();
    segment.append(&live("b", "2")).unwrap();

    let scanned: Vec<_> = SegmentScanner::new(&segment)
        .unwrap()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(scanned.len(), 3);
    assert_eq!(scanned[0].record, Record::live(b"a".to_vec(), b"1".to_vec()));
    assert!(scanned[1].record.tombstone);
    assert_eq!(scanned[2].record.key, b"b".to_vec());
    assert_eq!(scanned[0].offset, 0);
    assert_eq!(scanned[1].offset, scanned[0].len);
    assert_eq!(scanned[2].offset, scanned[1].offset + scanned[1].len);
}

#[test]
fn test_scan_detects_torn_tail() {
    let (_temp, path) = setup_temp_segment();
    let whole = live("a", "1");
    let mut partial = live("b", "a longer value");
    partial.truncate(partial.len() - 3);
    {
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&whole).unwrap();
        file.write_all(&partial).unwrap();
    }

    let segment = Segment::open_sealed(&path, 1, SegmentKind::Log).unwrap();
    let mut scanner = SegmentScanner::new(&segment).unwrap();
    let records: Vec<_> = scanner.by_ref().map(|r| r.unwrap()).collect();

    assert_eq!(records.len(), 1);
    assert_eq!(scanner.valid_len(), whole.len() as u64);
    assert_eq!(scanner.torn_tail_bytes(), partial.len() as u64);
}

#[test]
fn test_scan_short_garbage_tail() {
    let (_temp, path) = setup_temp_segment();
    let whole = live("a", "1");
    {
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&whole).unwrap();
        file.write_all(&[1, 2, 3]).unwrap();
    }

    let segment = Segment::open_sealed(&path, 1, SegmentKind::Log).unwrap();
    let mut scanner = SegmentScanner::new(&segment).unwrap();

    assert_eq!(scanner.by_ref().count(), 1);
    assert_eq!(scanner.torn_tail_bytes(), 3);
}

#[test]
fn test_scan_ascii_garbage_tail_is_torn() {
    let (_temp, path) = setup_temp_segment();
    let whole = live("a", "1");
    {
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&whole).unwrap();
        // Tomb slot holds '!', but the lengths already run past the end
        file.write_all(b"garbage!!!").unwrap();
    }

    let segment = Segment::open_sealed(&path, 1, SegmentKind::Log).unwrap();
    let mut scanner = SegmentScanner::new(&segment).unwrap();

    let records: Vec<_> = scanner.by_ref().collect();
    assert_eq!(records.len(), 1);
    assert!(records[0].is_ok());
    assert_eq!(scanner.valid_len(), whole.len() as u64);
    assert_eq!(scanner.torn_tail_bytes(), 10);
}

#[test]
fn test_scan_zero_filled_tail_is_torn() {
    let (_temp, path) = setup_temp_segment();
    let whole = live("a", "1");
    {
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&whole).unwrap();
        file.write_all(&[0u8; 18]).unwrap();
    }

    let segment = Segment::open_sealed(&path, 1, SegmentKind::Log).unwrap();
    let mut scanner = SegmentScanner::new(&segment).unwrap();

    let keys: Vec<Vec<u8>> = scanner
        .by_ref()
        .map(|scanned| scanned.unwrap().record.key)
        .collect();
    assert_eq!(keys, vec![b"a".to_vec()]);
    assert_eq!(scanner.valid_len(), 11);
    assert_eq!(scanner.torn_tail_bytes(), 18);
}

#[test]
fn test_scan_invalid_flag_is_an_error() {
    let (_temp, path) = setup_temp_segment();
    {
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&[0, 0, 0, 1, 0, 0, 0, 1, 9, b'k', b'v']).unwrap();
    }

    let segment = Segment::open_sealed(&path, 1, SegmentKind::Log).unwrap();
    let results: Vec<_> = SegmentScanner::new(&segment).unwrap().collect();

    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(CaskError::CorruptRecord { .. })));
}

// =============================================================================
// PendingSegment Tests
// =============================================================================

#[test]
fn test_pending_segment_seal() {
    let temp_dir = TempDir::new().unwrap();
    let tmp_path = temp_dir.path().join("merged-0000000005.log.tmp");

    let mut pending = PendingSegment::create(&tmp_path, 5).unwrap();
    assert_eq!(pending.append(&live("a", "1")).unwrap(), 0);
    assert_eq!(pending.append(&live("b", "2")).unwrap(), 11);
    let sealed = pending.seal().unwrap();

    assert_eq!(sealed.id, 5);
    assert_eq!(sealed.records, 2);
    assert_eq!(sealed.size, 22);
    assert_eq!(std::fs::metadata(&tmp_path).unwrap().len(), 22);
}

#[test]
fn test_pending_segment_abandon_removes_file() {
    let temp_dir = TempDir::new().unwrap();
    let tmp_path = temp_dir.path().join("merged-0000000005.log.tmp");

    let mut pending = PendingSegment::create(&tmp_path, 5).unwrap();
    pending.append(&live("a", "1")).unwrap();
    pending.abandon();

    assert!(!tmp_path.exists());
}

#[cfg(unix)]
#[test]
fn test_pending_segment_failed_seal_removes_file() {
    if !std::path::Path::new("/dev/full").exists() {
        return;
    }
    let temp_dir = TempDir::new().unwrap();
    let tmp_path = temp_dir.path().join("merged-0000000005.log.tmp");
    std::os::unix::fs::symlink("/dev/full", &tmp_path).unwrap();

    let mut pending = PendingSegment::create(&tmp_path, 5).unwrap();
    pending.append(&live("a", "1")).unwrap();

    // The buffered record only hits the device on flush, which fails
    assert!(matches!(pending.seal(), Err(CaskError::Io(_))));
    assert!(std::fs::symlink_metadata(&tmp_path).is_err());
}

// =============================================================================
// Failed Append Tests
// =============================================================================

#[cfg(target_os = "linux")]
#[test]
fn test_failed_append_without_rollback_seals_segment() {
    let device = std::path::Path::new("/dev/full");
    if !device.exists() {
        return;
    }

    // Writes fail with ENOSPC and the device cannot be truncated
    let segment = Segment::reopen_active(device, 1, SegmentKind::Log, 0).unwrap();

    assert!(matches!(segment.append(&live("a", "1")), Err(CaskError::Io(_))));
    assert!(segment.is_sealed());
    assert_eq!(segment.size(), 0);
    assert!(matches!(
        segment.append(&live("b", "2")),
        Err(CaskError::SegmentSealed(1))
    ));
}
