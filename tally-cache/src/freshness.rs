//! Freshness contracts for cache reads.
//!
//! Callers state how much staleness they tolerate when reading through the
//! cache, so "may be stale" is never an implicit property of a read.

use chrono::Utc;
use std::time::Duration;
use tally_core::Timestamp;

/// Freshness requirement for cache reads.
///
/// Keys marked stale by `schedule_refresh` are always re-fetched; the
/// variants differ only in how they treat unmarked entries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Freshness {
    /// Serve a cached value not older than `max_staleness`.
    BestEffort {
        max_staleness: Duration,
    },

    /// Serve a cached value as long as nothing has invalidated it since it
    /// was written.
    #[default]
    Consistent,
}

impl Freshness {
    pub fn best_effort(max_staleness: Duration) -> Self {
        Self::BestEffort { max_staleness }
    }

    pub fn consistent() -> Self {
        Self::Consistent
    }

    pub fn is_best_effort(&self) -> bool {
        matches!(self, Self::BestEffort { .. })
    }

    pub fn is_consistent(&self) -> bool {
        matches!(self, Self::Consistent)
    }

    /// Whether an unmarked entry written at `cached_at` may be served.
    pub fn accepts(&self, cached_at: Timestamp) -> bool {
        match self {
            Self::BestEffort { max_staleness } => age_of(cached_at) <= *max_staleness,
            Self::Consistent => true,
        }
    }
}

fn age_of(at: Timestamp) -> Duration {
    Utc::now()
        .signed_duration_since(at)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Result of a read through the cache, carrying staleness metadata.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    cached_at: Timestamp,
    was_cache_hit: bool,
}

impl<T> CacheRead<T> {
    pub fn from_cache(value: T, cached_at: Timestamp) -> Self {
        Self {
            value,
            cached_at,
            was_cache_hit: true,
        }
    }

    /// A value just fetched from the transport.
    pub fn from_fetch(value: T) -> Self {
        Self {
            value,
            cached_at: Utc::now(),
            was_cache_hit: false,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn cached_at(&self) -> Timestamp {
        self.cached_at
    }

    pub fn staleness(&self) -> Duration {
        age_of(self.cached_at)
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }

    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            cached_at: self.cached_at,
            was_cache_hit: self.was_cache_hit,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
