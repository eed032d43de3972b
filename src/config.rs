//! Configuration for CaskKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{CaskError, Result};

/// Default size at which the active segment is sealed (1 MiB)
pub const DEFAULT_SEGMENT_SIZE_THRESHOLD: u64 = 1024 * 1024;

/// Main configuration for a CaskKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding every segment file
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── LOCK                      (held while an engine is open)
    ///     ├── merged-0000000003.log     (output of the last compaction)
    ///     ├── segment-0000000004.log    (sealed)
    ///     └── segment-0000000005.log    (active)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Segment Configuration
    // -------------------------------------------------------------------------
    /// Active segment size (in bytes) at which it is sealed and a new one opened
    pub segment_size_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./caskkv_data"),
            segment_size_threshold: DEFAULT_SEGMENT_SIZE_THRESHOLD,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the configuration before the engine touches disk
    pub fn validate(&self) -> Result<()> {
        if self.segment_size_threshold == 0 {
            return Err(CaskError::Config(
                "segment_size_threshold must be greater than zero".to_string(),
            ));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(CaskError::Config("data_dir must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all segments)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the segment rotation threshold (in bytes)
    pub fn segment_size_threshold(mut self, bytes: u64) -> Self {
        self.config.segment_size_threshold = bytes;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
