//! File-per-key baseline store
//!
//! The simplest possible persistent store: every key is its own file and
//! every write rewrites it. Only used as a comparison point in benchmarks.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{CaskError, Result};

/// One file per key under a directory
#[derive(Debug)]
pub struct FilePerKeyStore {
    dir: PathBuf,
}

impl FilePerKeyStore {
    /// Open (or create) a store rooted at `dir`
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Overwrite the file for `key`
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut file = File::create(self.key_path(key)?)?;
        file.write_all(value)?;
        file.flush()?;
        Ok(())
    }

    /// Read the file for `key`, if it exists
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match fs::read(self.key_path(key)?) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the file for `key`; absent keys are fine
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        match fs::remove_file(self.key_path(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Nothing is held open between calls
    pub fn close(self) -> Result<()> {
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File names are the hex encoding of the key, so any key bytes are safe
    fn key_path(&self, key: &[u8]) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(CaskError::InvalidKey);
        }
        let name: String = key.iter().map(|b| format!("{:02x}", b)).collect();
        Ok(self.dir.join(name))
    }
}
