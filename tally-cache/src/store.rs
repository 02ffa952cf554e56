//! The cache store: one materialized value per semantic key.
//!
//! The store is an explicit object handed to the engine and read layer, not
//! ambient global state, so every test can run against its own instance.
//! All operations are synchronous; the internal lock is never held across an
//! await point.
//!
//! Besides values the store tracks refresh state per key. A key has at most
//! one pending refresh: scheduling while one is already pending or in flight
//! coalesces into it, and cancelling an in-flight refresh makes its result
//! be discarded on arrival instead of overwriting a newer speculative write.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tally_core::{CacheError, Timestamp};
use tokio::sync::broadcast;
use tracing::trace;

use crate::key::CacheKey;

/// A cached value and when it was last written.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub value: Value,
    pub updated_at: Timestamp,
}

/// Notification sent to cache observers after a change is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Updated(CacheKey),
    Removed(CacheKey),
    Invalidated(CacheKey),
    Refreshed(CacheKey),
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub entry_count: u64,
    pub refreshes_started: u64,
    /// Refresh results dropped because the refresh was cancelled in flight.
    pub refreshes_discarded: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Proof that a refresh was started; hand it back when the fetch returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTicket {
    key: CacheKey,
    generation: u64,
}

impl RefreshTicket {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RefreshSlot {
    stale: bool,
    in_flight: Option<u64>,
    /// Scheduled again while a refresh was in flight.
    rescheduled: bool,
}

impl RefreshSlot {
    fn is_idle(&self) -> bool {
        !self.stale && self.in_flight.is_none() && !self.rescheduled
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<CacheKey, CachedValue>,
    refresh: HashMap<CacheKey, RefreshSlot>,
    stats: CacheStats,
    next_generation: u64,
}

impl StoreInner {
    fn put(&mut self, key: CacheKey, value: Option<Value>, events: &mut Vec<CacheEvent>) {
        match value {
            Some(value) => {
                self.entries.insert(
                    key.clone(),
                    CachedValue {
                        value,
                        updated_at: Utc::now(),
                    },
                );
                self.stats.writes += 1;
                events.push(CacheEvent::Updated(key));
            }
            None => {
                if self.entries.remove(&key).is_some() {
                    events.push(CacheEvent::Removed(key));
                }
            }
        }
        self.stats.entry_count = self.entries.len() as u64;
    }

    fn tidy(&mut self, key: &CacheKey) {
        if self.refresh.get(key).is_some_and(RefreshSlot::is_idle) {
            self.refresh.remove(key);
        }
    }
}

/// Process-local key→value map of query results.
#[derive(Debug)]
pub struct CacheStore {
    inner: RwLock<StoreInner>,
    events: broadcast::Sender<CacheEvent>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(256)
    }
}

impl CacheStore {
    /// Create an empty store whose event channel buffers `event_capacity` events.
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            inner: RwLock::new(StoreInner::default()),
            events,
        }
    }

    fn read_inner(&self) -> Result<RwLockReadGuard<'_, StoreInner>, CacheError> {
        self.inner.read().map_err(|_| CacheError::LockPoisoned)
    }

    fn write_inner(&self) -> Result<RwLockWriteGuard<'_, StoreInner>, CacheError> {
        self.inner.write().map_err(|_| CacheError::LockPoisoned)
    }

    fn publish(&self, events: Vec<CacheEvent>) {
        for event in events {
            // No subscribers is fine; observers are optional.
            let _ = self.events.send(event);
        }
    }

    /// Subscribe to committed changes.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // VALUES
    // ========================================================================

    /// Current value for `key`, counting a hit or miss.
    pub fn read(&self, key: &CacheKey) -> Result<Option<Value>, CacheError> {
        let mut inner = self.write_inner()?;
        let value = inner.entries.get(key).map(|e| e.value.clone());
        if value.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        Ok(value)
    }

    /// Current value and write time, without touching statistics.
    pub fn peek(&self, key: &CacheKey) -> Result<Option<CachedValue>, CacheError> {
        Ok(self.read_inner()?.entries.get(key).cloned())
    }

    /// Current values for several keys read under one lock.
    pub fn peek_many(&self, keys: &[CacheKey]) -> Result<Vec<Option<Value>>, CacheError> {
        let inner = self.read_inner()?;
        Ok(keys
            .iter()
            .map(|k| inner.entries.get(k).map(|e| e.value.clone()))
            .collect())
    }

    pub fn contains(&self, key: &CacheKey) -> Result<bool, CacheError> {
        Ok(self.read_inner()?.entries.contains_key(key))
    }

    pub fn write(&self, key: CacheKey, value: Value) -> Result<(), CacheError> {
        self.write_batch(vec![(key, Some(value))])
    }

    /// Apply `updater` to the value under `key`; no-op when absent.
    ///
    /// Returns whether the key was present.
    pub fn write_if_present<F>(&self, key: &CacheKey, updater: F) -> Result<bool, CacheError>
    where
        F: FnOnce(Value) -> Value,
    {
        let mut events = Vec::new();
        let present = {
            let mut inner = self.write_inner()?;
            match inner.entries.get(key).map(|e| e.value.clone()) {
                Some(current) => {
                    let updated = updater(current);
                    inner.put(key.clone(), Some(updated), &mut events);
                    true
                }
                None => false,
            }
        };
        self.publish(events);
        Ok(present)
    }

    pub fn remove(&self, key: &CacheKey) -> Result<Option<Value>, CacheError> {
        let mut events = Vec::new();
        let removed = {
            let mut inner = self.write_inner()?;
            let removed = inner.entries.get(key).map(|e| e.value.clone());
            inner.put(key.clone(), None, &mut events);
            removed
        };
        self.publish(events);
        Ok(removed)
    }

    /// Commit several writes at once. `None` removes the key.
    ///
    /// Observers never see a state where only part of the batch is applied.
    pub fn write_batch(&self, writes: Vec<(CacheKey, Option<Value>)>) -> Result<(), CacheError> {
        let mut events = Vec::new();
        {
            let mut inner = self.write_inner()?;
            for (key, value) in writes {
                trace!(key = %key, present = value.is_some(), "cache write");
                inner.put(key, value, &mut events);
            }
        }
        self.publish(events);
        Ok(())
    }

    pub fn keys(&self) -> Result<Vec<CacheKey>, CacheError> {
        let mut keys: Vec<CacheKey> = self.read_inner()?.entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    pub fn len(&self) -> Result<usize, CacheError> {
        Ok(self.read_inner()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(self.read_inner()?.stats.clone())
    }

    // ========================================================================
    // REFRESH STATE
    // ========================================================================

    /// Suppress a refresh already in flight for `key`.
    ///
    /// Its result will be discarded when it arrives. Returns whether one was
    /// in flight. A pending (not yet started) refresh stays scheduled.
    pub fn cancel_pending_refresh(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let mut inner = self.write_inner()?;
        let cancelled = match inner.refresh.get_mut(key) {
            Some(slot) if slot.in_flight.is_some() => {
                slot.in_flight = None;
                if slot.rescheduled {
                    slot.stale = true;
                    slot.rescheduled = false;
                }
                true
            }
            _ => false,
        };
        inner.tidy(key);
        if cancelled {
            trace!(key = %key, "in-flight refresh cancelled");
        }
        Ok(cancelled)
    }

    /// Mark `key` stale so the next read re-fetches it.
    ///
    /// Returns false when the request coalesced into a refresh that was
    /// already pending or in flight.
    pub fn schedule_refresh(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let scheduled = {
            let mut inner = self.write_inner()?;
            let slot = inner.refresh.entry(key.clone()).or_default();
            if slot.in_flight.is_some() {
                let fresh = !slot.rescheduled;
                slot.rescheduled = true;
                fresh
            } else if slot.stale {
                false
            } else {
                slot.stale = true;
                true
            }
        };
        self.publish(vec![CacheEvent::Invalidated(key.clone())]);
        Ok(scheduled)
    }

    /// Schedule a refresh for every cached key of `collection`.
    pub fn invalidate_collection(&self, collection: &str) -> Result<usize, CacheError> {
        let keys: Vec<CacheKey> = self
            .keys()?
            .into_iter()
            .filter(|k| k.matches_collection(collection))
            .collect();
        for key in &keys {
            self.schedule_refresh(key)?;
        }
        Ok(keys.len())
    }

    /// Whether `key` is marked stale or has a refresh outstanding.
    pub fn is_stale(&self, key: &CacheKey) -> Result<bool, CacheError> {
        Ok(self
            .read_inner()?
            .refresh
            .get(key)
            .is_some_and(|s| s.stale || s.rescheduled))
    }

    pub fn is_refreshing(&self, key: &CacheKey) -> Result<bool, CacheError> {
        Ok(self
            .read_inner()?
            .refresh
            .get(key)
            .is_some_and(|s| s.in_flight.is_some()))
    }

    /// Keys marked stale with no refresh currently in flight.
    pub fn scheduled_keys(&self) -> Result<Vec<CacheKey>, CacheError> {
        let mut keys: Vec<CacheKey> = self
            .read_inner()?
            .refresh
            .iter()
            .filter(|(_, s)| s.stale && s.in_flight.is_none())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Start a refresh of `key`, or `None` if one is already in flight.
    pub fn begin_refresh(&self, key: &CacheKey) -> Result<Option<RefreshTicket>, CacheError> {
        let mut inner = self.write_inner()?;
        inner.next_generation += 1;
        let generation = inner.next_generation;
        let slot = inner.refresh.entry(key.clone()).or_default();
        if slot.in_flight.is_some() {
            return Ok(None);
        }
        slot.in_flight = Some(generation);
        inner.stats.refreshes_started += 1;
        Ok(Some(RefreshTicket {
            key: key.clone(),
            generation,
        }))
    }

    /// Land a fetched value. `None` means the server has no such result.
    ///
    /// Returns false, leaving the cache untouched, when the refresh was
    /// cancelled after it started.
    pub fn complete_refresh(
        &self,
        ticket: RefreshTicket,
        fetched: Option<Value>,
    ) -> Result<bool, CacheError> {
        let mut events = Vec::new();
        let applied = {
            let mut inner = self.write_inner()?;
            let current = inner
                .refresh
                .get(&ticket.key)
                .is_some_and(|s| s.in_flight == Some(ticket.generation));
            if current {
                inner.put(ticket.key.clone(), fetched, &mut events);
                if let Some(slot) = inner.refresh.get_mut(&ticket.key) {
                    slot.in_flight = None;
                    slot.stale = slot.rescheduled;
                    slot.rescheduled = false;
                }
                inner.tidy(&ticket.key);
                events.push(CacheEvent::Refreshed(ticket.key.clone()));
            } else {
                inner.stats.refreshes_discarded += 1;
            }
            current
        };
        if !applied {
            trace!(key = %ticket.key, "discarding cancelled refresh result");
        }
        self.publish(events);
        Ok(applied)
    }

    /// Give up on a refresh whose fetch failed; the key stays stale.
    pub fn abandon_refresh(&self, ticket: RefreshTicket) -> Result<(), CacheError> {
        let mut inner = self.write_inner()?;
        if let Some(slot) = inner.refresh.get_mut(&ticket.key) {
            if slot.in_flight == Some(ticket.generation) {
                slot.in_flight = None;
                slot.stale = true;
                slot.rescheduled = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(name: &str) -> CacheKey {
        CacheKey::collection(name)
    }

    #[test]
    fn test_read_write_remove() {
        let store = CacheStore::default();
        assert_eq!(store.read(&key("people")).unwrap(), None);

        store.write(key("people"), json!([1, 2])).unwrap();
        assert_eq!(store.read(&key("people")).unwrap(), Some(json!([1, 2])));

        assert_eq!(store.remove(&key("people")).unwrap(), Some(json!([1, 2])));
        assert!(!store.contains(&key("people")).unwrap());

        let stats = store.stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_write_if_present_skips_absent() {
        let store = CacheStore::default();
        let touched = store
            .write_if_present(&key("people"), |_| json!("changed"))
            .unwrap();
        assert!(!touched);
        assert!(!store.contains(&key("people")).unwrap());

        store.write(key("people"), json!(1)).unwrap();
        let touched = store
            .write_if_present(&key("people"), |v| json!(v.as_i64().unwrap() + 1))
            .unwrap();
        assert!(touched);
        assert_eq!(store.read(&key("people")).unwrap(), Some(json!(2)));
    }

    #[test]
    fn test_write_batch_is_applied_together() {
        let store = CacheStore::default();
        store.write(key("b"), json!("old")).unwrap();
        store
            .write_batch(vec![(key("a"), Some(json!(1))), (key("b"), None)])
            .unwrap();
        assert_eq!(store.keys().unwrap(), vec![key("a")]);
    }

    #[test]
    fn test_schedule_refresh_coalesces() {
        let store = CacheStore::default();
        assert!(store.schedule_refresh(&key("people")).unwrap());
        assert!(!store.schedule_refresh(&key("people")).unwrap());
        assert_eq!(store.scheduled_keys().unwrap(), vec![key("people")]);
    }

    #[test]
    fn test_only_one_refresh_in_flight() {
        let store = CacheStore::default();
        let ticket = store.begin_refresh(&key("people")).unwrap();
        assert!(ticket.is_some());
        assert!(store.begin_refresh(&key("people")).unwrap().is_none());
        assert!(store.is_refreshing(&key("people")).unwrap());
    }

    #[test]
    fn test_cancelled_refresh_cannot_clobber() {
        let store = CacheStore::default();
        store.write(key("people"), json!("old")).unwrap();
        let ticket = store.begin_refresh(&key("people")).unwrap().unwrap();

        assert!(store.cancel_pending_refresh(&key("people")).unwrap());
        store.write(key("people"), json!("speculative")).unwrap();

        let applied = store.complete_refresh(ticket, Some(json!("stale fetch"))).unwrap();
        assert!(!applied);
        assert_eq!(store.read(&key("people")).unwrap(), Some(json!("speculative")));
        assert_eq!(store.stats().unwrap().refreshes_discarded, 1);
    }

    #[test]
    fn test_schedule_during_flight_keeps_key_stale_after_landing() {
        let store = CacheStore::default();
        let ticket = store.begin_refresh(&key("people")).unwrap().unwrap();
        assert!(store.schedule_refresh(&key("people")).unwrap());
        assert!(!store.schedule_refresh(&key("people")).unwrap());

        assert!(store.complete_refresh(ticket, Some(json!([]))).unwrap());
        assert!(store.is_stale(&key("people")).unwrap());
        assert_eq!(store.scheduled_keys().unwrap(), vec![key("people")]);
    }

    #[test]
    fn test_completed_refresh_clears_stale_and_absent_result_removes() {
        let store = CacheStore::default();
        store.write(key("people"), json!([1])).unwrap();
        store.schedule_refresh(&key("people")).unwrap();

        let ticket = store.begin_refresh(&key("people")).unwrap().unwrap();
        assert!(store.complete_refresh(ticket, None).unwrap());
        assert!(!store.is_stale(&key("people")).unwrap());
        assert!(!store.contains(&key("people")).unwrap());
    }

    #[test]
    fn test_abandoned_refresh_stays_stale() {
        let store = CacheStore::default();
        let ticket = store.begin_refresh(&key("people")).unwrap().unwrap();
        store.abandon_refresh(ticket).unwrap();
        assert!(store.is_stale(&key("people")).unwrap());
        assert!(!store.is_refreshing(&key("people")).unwrap());
    }

    #[test]
    fn test_invalidate_collection() {
        let store = CacheStore::default();
        store
            .write(CacheKey::new("routines", &json!({"p": 1})).unwrap(), json!([]))
            .unwrap();
        store
            .write(CacheKey::new("routines", &json!({"p": 2})).unwrap(), json!([]))
            .unwrap();
        store.write(key("people"), json!([])).unwrap();

        assert_eq!(store.invalidate_collection("routines").unwrap(), 2);
        assert_eq!(store.scheduled_keys().unwrap().len(), 2);
    }

    #[test]
    fn test_subscribers_see_events() {
        let store = CacheStore::default();
        let mut rx = store.subscribe();
        store.write(key("people"), json!([])).unwrap();
        store.schedule_refresh(&key("people")).unwrap();
        store.remove(&key("people")).unwrap();

        assert_eq!(rx.try_recv().unwrap(), CacheEvent::Updated(key("people")));
        assert_eq!(rx.try_recv().unwrap(), CacheEvent::Invalidated(key("people")));
        assert_eq!(rx.try_recv().unwrap(), CacheEvent::Removed(key("people")));
    }
}
