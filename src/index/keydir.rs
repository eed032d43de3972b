//! KeyDir implementation
//!
//! HashMap-based index with RwLock for concurrency.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::RecordPointer;

/// Key → newest live record pointer
///
/// Absence of a key means it was never written or its last record is a
/// tombstone.
#[derive(Debug, Default)]
pub struct KeyDir {
    entries: RwLock<HashMap<Vec<u8>, RecordPointer>>,
}

impl KeyDir {
    /// Create a new empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the pointer for `key` (read lock)
    pub fn get(&self, key: &[u8]) -> Option<RecordPointer> {
        self.entries.read().get(key).copied()
    }

    /// Point `key` at a new record, returning the previous pointer (write lock)
    pub fn put(&self, key: Vec<u8>, pointer: RecordPointer) -> Option<RecordPointer> {
        self.entries.write().insert(key, pointer)
    }

    /// Drop the entry for `key` (write lock)
    pub fn remove(&self, key: &[u8]) -> Option<RecordPointer> {
        self.entries.write().remove(key)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Swap in a freshly rebuilt map in one step
    pub fn replace(&self, entries: HashMap<Vec<u8>, RecordPointer>) {
        *self.entries.write() = entries;
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Total encoded size of the records the index points at
    pub fn live_bytes(&self) -> u64 {
        self.entries.read().values().map(|p| p.len).sum()
    }

    /// Copy of every live key, sorted
    pub fn keys(&self) -> Vec<Vec<u8>> {
        let mut keys: Vec<Vec<u8>> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}
