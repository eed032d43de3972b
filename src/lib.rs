//! # CaskKV
//!
//! A persistent key-value store following the Bitcask design:
//! - Append-only segment files, one active and many sealed
//! - In-memory index: one positioned read per lookup
//! - Compaction that keeps only the newest live record per key
//! - Crash recovery by replaying the log, tolerating a torn tail
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Engine                               │
//! │         (Single Writer / Multi Reader, dir LOCK)            │
//! └──────┬──────────────────────┬───────────────────────────────┘
//!        │ put/delete           │ get
//!        ▼                      ▼
//!   ┌──────────┐  pointer  ┌──────────┐
//!   │  Record  │ ────────▶ │  KeyDir  │  key → (segment, offset, len)
//!   │  Codec   │           │ (RwLock) │
//!   └────┬─────┘           └────┬─────┘
//!        │ append               │ resolve segment id
//!        ▼                      ▼
//!   ┌─────────────────────────────────────┐
//!   │          Segment Manager            │
//!   │  sealed … sealed │ active (append)  │
//!   └─────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use caskkv::{Config, Engine};
//!
//! let config = Config::builder().data_dir("./data").build();
//! let engine = Engine::open(config)?;
//!
//! engine.put(b"hello", b"world")?;
//! assert_eq!(engine.get(b"hello")?, Some(b"world".to_vec()));
//!
//! engine.delete(b"hello")?;
//! engine.compact()?;
//! engine.close()?;
//! # Ok::<(), caskkv::CaskError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod record;
pub mod storage;
pub mod index;
pub mod recovery;
pub mod command;
pub mod engine;
pub mod baseline;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{CaskError, Result};
pub use config::Config;
pub use engine::{CompactionReport, Engine, EngineStats};
pub use command::Command;
pub use baseline::FilePerKeyStore;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of CaskKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
