//! In-memory keyed index.
//!
//! The keydir maps every live key to the location of its most recent
//! record on disk. It is the single source of truth for reads: a key
//! absent here is absent from the store, regardless of what tombstoned or
//! superseded records still sit in segment files.
//!
//! Entries carry segment *ids*, never segment handles; resolving an id to
//! an open file is the engine's job at read time.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{collections::HashMap, sync::RwLock};

// ------------------------------------------------------------------------------------------------
// Keydir
// ------------------------------------------------------------------------------------------------

/// Location of one live record on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    /// Id of the segment holding the record.
    pub file_id: u64,

    /// Full encoded size of the record.
    pub record_size: u64,

    /// Absolute offset of the record inside its segment.
    pub record_offset: u64,

    /// Unix seconds at which the entry was written.
    pub timestamp: i64,
}

/// Thread-safe mapping from key to on-disk record location.
#[derive(Debug, Default)]
pub struct KeyDir {
    data: RwLock<HashMap<Vec<u8>, Entry>>,
}

impl KeyDir {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `key`, if any.
    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        let data = self.data.read().unwrap_or_else(|p| p.into_inner());
        data.get(key).copied()
    }

    /// Inserts or overwrites the entry for `key`.
    ///
    /// Returns whether a previous entry existed.
    pub fn put(&self, key: Vec<u8>, entry: Entry) -> bool {
        let mut data = self.data.write().unwrap_or_else(|p| p.into_inner());
        data.insert(key, entry).is_some()
    }

    /// Removes the entry for `key`.
    ///
    /// Returns whether an entry was removed.
    pub fn delete(&self, key: &[u8]) -> bool {
        let mut data = self.data.write().unwrap_or_else(|p| p.into_inner());
        data.remove(key).is_some()
    }

    /// Applies a batch of inserts under a single lock acquisition, so no
    /// other index operation can interleave with the batch.
    pub fn put_batch(&self, entries: Vec<(Vec<u8>, Entry)>) {
        let mut data = self.data.write().unwrap_or_else(|p| p.into_inner());
        for (key, entry) in entries {
            data.insert(key, entry);
        }
    }

    /// Snapshot of all current keys, in unspecified order.
    pub fn list_keys(&self) -> Vec<Vec<u8>> {
        let data = self.data.read().unwrap_or_else(|p| p.into_inner());
        data.keys().cloned().collect()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let data = self.data.read().unwrap_or_else(|p| p.into_inner());
        data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
