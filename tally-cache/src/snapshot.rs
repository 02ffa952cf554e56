//! Pre-mutation snapshots of affected cache keys.

use serde_json::Value;
use tally_core::CacheError;

use crate::key::CacheKey;
use crate::store::CacheStore;

/// The values of a set of keys at one instant. Absence is a captured state.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    entries: Vec<(CacheKey, Option<Value>)>,
}

impl Snapshot {
    /// Read the current value of every key under a single lock.
    ///
    /// Duplicate keys are captured once.
    pub fn capture(store: &CacheStore, keys: &[CacheKey]) -> Result<Self, CacheError> {
        let mut unique: Vec<CacheKey> = Vec::with_capacity(keys.len());
        for key in keys {
            if !unique.contains(key) {
                unique.push(key.clone());
            }
        }
        let values = store.peek_many(&unique)?;
        Ok(Self {
            entries: unique.into_iter().zip(values).collect(),
        })
    }

    /// Write every captured value back verbatim, deleting keys that were
    /// absent. Restoring twice leaves the store in the same state.
    pub fn restore(&self, store: &CacheStore) -> Result<(), CacheError> {
        store.write_batch(self.entries.clone())
    }

    pub fn get(&self, key: &CacheKey) -> Option<&Option<Value>> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
