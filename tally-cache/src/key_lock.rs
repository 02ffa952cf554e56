//! Per-key mutation locks.
//!
//! When per-key serialization is on, a mutation holds the lock of every key
//! it declares from before its refresh cancellation until its settlement, so
//! two mutations of one key never interleave their speculation and rollback.
//! Keys are locked in `CacheKey` order, which rules out lock-order deadlocks
//! between mutations with overlapping key sets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tally_core::CacheError;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::key::CacheKey;

#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<CacheKey, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the locks of all `keys`.
    pub async fn acquire(&self, keys: &[CacheKey]) -> Result<KeyGuards<'_>, CacheError> {
        let mut sorted = keys.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for key in &sorted {
            let lock = {
                let mut locks = self.locks.lock().map_err(|_| CacheError::LockPoisoned)?;
                locks.entry(key.clone()).or_default().clone()
            };
            guards.push(lock.lock_owned().await);
        }

        Ok(KeyGuards {
            owner: self,
            keys: sorted,
            guards,
        })
    }

    /// Number of keys with a live lock entry.
    pub fn held(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}

/// Locks held by one mutation; released on drop.
#[derive(Debug)]
pub struct KeyGuards<'a> {
    owner: &'a KeyLocks,
    keys: Vec<CacheKey>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl KeyGuards<'_> {
    pub fn keys(&self) -> &[CacheKey] {
        &self.keys
    }
}

impl Drop for KeyGuards<'_> {
    fn drop(&mut self) {
        self.guards.clear();
        if let Ok(mut locks) = self.owner.locks.lock() {
            for key in &self.keys {
                // Only the map holds it: nobody is waiting.
                if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
                    locks.remove(key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_entries_are_pruned_after_release() {
        let locks = KeyLocks::new();
        let keys = vec![CacheKey::collection("b"), CacheKey::collection("a")];
        {
            let guards = locks.acquire(&keys).await.unwrap();
            assert_eq!(guards.keys()[0], CacheKey::collection("a"));
            assert_eq!(locks.held(), 2);
        }
        assert_eq!(locks.held(), 0);
    }

    #[tokio::test]
    async fn test_second_holder_waits() {
        let locks = KeyLocks::new();
        let key = vec![CacheKey::collection("a")];
        let guards = locks.acquire(&key).await.unwrap();

        let waiting = tokio::time::timeout(Duration::from_millis(20), locks.acquire(&key)).await;
        assert!(waiting.is_err());

        drop(guards);
        let reacquired = tokio::time::timeout(Duration::from_millis(20), locks.acquire(&key)).await;
        assert!(reacquired.is_ok());
    }
}
