//! Error types for CaskKV
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using CaskError
pub type Result<T> = std::result::Result<T, CaskError>;

/// Unified error type for CaskKV operations
#[derive(Debug, Error)]
pub enum CaskError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    /// Empty key handed to put/delete. Rejected before any I/O.
    #[error("Invalid key: keys must be non-empty")]
    InvalidKey,

    /// Value longer than the u32 length field can describe
    #[error("Value too large: {0} bytes (max {max})", max = u32::MAX)]
    ValueTooLarge(usize),

    #[error("Invalid command: {0}")]
    Command(String),

    // -------------------------------------------------------------------------
    // Log Errors
    // -------------------------------------------------------------------------
    /// Append attempted on a segment that is no longer active.
    #[error("Segment {0} is sealed")]
    SegmentSealed(u64),

    /// Fewer bytes remain than a record header declares, or the header
    /// itself is malformed.
    #[error("Corrupt record at offset {offset}: {reason}")]
    CorruptRecord { offset: u64, reason: String },

    /// The index points somewhere that does not hold a live record.
    #[error("Index corruption: {0}")]
    IndexCorruption(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Failed to open store at {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: Box<CaskError>,
    },

    #[error("Store directory {} is locked by another process", .0.display())]
    Locked(PathBuf),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CaskError {
    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        CaskError::CorruptRecord {
            offset,
            reason: reason.into(),
        }
    }
}
