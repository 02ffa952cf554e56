//! Read-through access to the cache store.
//!
//! Reads route through the store first and fall back to the transport when
//! the cached value is missing, marked stale, or older than the caller's
//! freshness allows. Fetches land through refresh tickets, so a refresh that
//! the engine cancelled mid-flight never overwrites a speculative write.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tally_core::{CacheError, CacheSection, TallyResult, TransportError};
use tracing::{debug, warn};

use crate::freshness::{CacheRead, Freshness};
use crate::key::CacheKey;
use crate::store::CacheStore;

/// Configuration for the read-through layer.
#[derive(Debug, Clone)]
pub struct ReadThroughConfig {
    /// Staleness used by [`ReadThrough::get_best_effort`].
    pub default_max_staleness: Duration,
}

impl Default for ReadThroughConfig {
    fn default() -> Self {
        Self {
            default_max_staleness: Duration::from_secs(30),
        }
    }
}

impl ReadThroughConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_staleness(mut self, duration: Duration) -> Self {
        self.default_max_staleness = duration;
        self
    }
}

impl From<&CacheSection> for ReadThroughConfig {
    fn from(section: &CacheSection) -> Self {
        Self::new().with_max_staleness(section.default_max_staleness())
    }
}

/// Fetches the authoritative value of a query from the server.
///
/// `Ok(None)` means the query has no result; the cache entry is removed.
#[async_trait]
pub trait QueryFetcher: Send + Sync {
    async fn fetch(&self, key: &CacheKey) -> Result<Option<Value>, TransportError>;
}

/// Read-through cache over a shared [`CacheStore`].
#[derive(Debug, Clone)]
pub struct ReadThrough {
    store: Arc<CacheStore>,
    config: ReadThroughConfig,
}

impl ReadThrough {
    pub fn new(store: Arc<CacheStore>, config: ReadThroughConfig) -> Self {
        Self { store, config }
    }

    pub fn with_defaults(store: Arc<CacheStore>) -> Self {
        Self::new(store, ReadThroughConfig::default())
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn config(&self) -> &ReadThroughConfig {
        &self.config
    }

    /// Read `key`, fetching through `fetcher` when the cache cannot serve it.
    ///
    /// Returns `Ok(None)` when neither the cache nor the server has a value.
    pub async fn get<F>(
        &self,
        key: &CacheKey,
        freshness: Freshness,
        fetcher: &F,
    ) -> TallyResult<Option<CacheRead<Value>>>
    where
        F: QueryFetcher + ?Sized,
    {
        if !self.store.is_stale(key)? {
            if let Some(entry) = self.store.peek(key)? {
                if freshness.accepts(entry.updated_at) {
                    // Counts the hit.
                    self.store.read(key)?;
                    return Ok(Some(CacheRead::from_cache(entry.value, entry.updated_at)));
                }
            }
        }

        self.refresh(key, fetcher).await?;
        Ok(self
            .store
            .peek(key)?
            .map(|entry| CacheRead::from_fetch(entry.value)))
    }

    /// [`get`](Self::get) with the configured default staleness.
    pub async fn get_best_effort<F>(
        &self,
        key: &CacheKey,
        fetcher: &F,
    ) -> TallyResult<Option<CacheRead<Value>>>
    where
        F: QueryFetcher + ?Sized,
    {
        let freshness = Freshness::best_effort(self.config.default_max_staleness);
        self.get(key, freshness, fetcher).await
    }

    /// Read `key` and decode it into `T`.
    pub async fn get_as<T, F>(
        &self,
        key: &CacheKey,
        freshness: Freshness,
        fetcher: &F,
    ) -> TallyResult<Option<CacheRead<T>>>
    where
        T: DeserializeOwned,
        F: QueryFetcher + ?Sized,
    {
        let Some(read) = self.get(key, freshness, fetcher).await? else {
            return Ok(None);
        };
        let was_hit = read.was_cache_hit();
        let cached_at = read.cached_at();
        let decoded: T =
            serde_json::from_value(read.into_value()).map_err(|e| CacheError::Decode {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Some(if was_hit {
            CacheRead::from_cache(decoded, cached_at)
        } else {
            CacheRead::from_fetch(decoded)
        }))
    }

    /// Fetch `key` and land the result.
    ///
    /// Returns false when the fetch coalesced into one already in flight or
    /// was cancelled before it landed. A failed fetch leaves the key stale.
    pub async fn refresh<F>(&self, key: &CacheKey, fetcher: &F) -> TallyResult<bool>
    where
        F: QueryFetcher + ?Sized,
    {
        let Some(ticket) = self.store.begin_refresh(key)? else {
            debug!(key = %key, "refresh already in flight, coalescing");
            return Ok(false);
        };

        match fetcher.fetch(key).await {
            Ok(value) => {
                let applied = self.store.complete_refresh(ticket, value)?;
                debug!(key = %key, applied, "refresh landed");
                Ok(applied)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "refresh fetch failed");
                self.store.abandon_refresh(ticket)?;
                Err(e.into())
            }
        }
    }

    /// Run every scheduled refresh. Returns how many landed.
    pub async fn refresh_scheduled<F>(&self, fetcher: &F) -> TallyResult<usize>
    where
        F: QueryFetcher + ?Sized,
    {
        let mut landed = 0;
        for key in self.store.scheduled_keys()? {
            if self.refresh(&key, fetcher).await? {
                landed += 1;
            }
        }
        Ok(landed)
    }
}
