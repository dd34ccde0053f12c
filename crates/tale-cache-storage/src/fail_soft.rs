//! Fail-soft boundary over a store
//!
//! Every backend failure is logged here once and reduced to the outcome a
//! caller would see from an empty cache: a miss, a skipped write, nothing
//! deleted.

use tracing::warn;

use tale_cache_core::{
    BackendKind, CacheEntry, CacheOptions, CacheStats, KeyValueStore, Lookup, StoreHealth,
};

/// Wraps a store so that no operation can fail
#[derive(Debug, Clone)]
pub struct FailSoft<S> {
    inner: S,
}

impl<S: KeyValueStore> FailSoft<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// The wrapped store
    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    /// Read an entry; a backend error is reported but never raised
    pub async fn get(&self, key: &str) -> Lookup<CacheEntry<Vec<u8>>> {
        let lookup = Lookup::from(self.inner.get(key).await);
        if let Lookup::BackendError(e) = &lookup {
            warn!(target: "tale_cache", key = %key, error = %e, "Cache read failed, treating as miss");
        }
        lookup
    }

    /// Write an entry, returning whether it was stored
    pub async fn set(&self, key: &str, value: Vec<u8>, options: &CacheOptions) -> bool {
        match self.inner.set(key, value, options).await {
            Ok(()) => true,
            Err(e) => {
                warn!(target: "tale_cache", key = %key, error = %e, "Cache write failed, skipping");
                false
            }
        }
    }

    /// Delete a key, returning whether it existed
    pub async fn delete(&self, key: &str) -> bool {
        self.inner.delete(key).await.unwrap_or_else(|e| {
            warn!(target: "tale_cache", key = %key, error = %e, "Cache delete failed");
            false
        })
    }

    pub async fn delete_many(&self, keys: &[String]) -> u64 {
        if keys.is_empty() {
            return 0;
        }
        self.inner.delete_many(keys).await.unwrap_or_else(|e| {
            warn!(target: "tale_cache", count = keys.len(), error = %e, "Cache bulk delete failed");
            0
        })
    }

    /// Keys matching `pattern`; empty when the scan fails
    pub async fn scan(&self, pattern: &str) -> Vec<String> {
        self.inner.scan_by_pattern(pattern).await.unwrap_or_else(|e| {
            warn!(target: "tale_cache", pattern = %pattern, error = %e, "Cache scan failed");
            Vec::new()
        })
    }

    /// Returns whether the store was cleared
    pub async fn clear(&self) -> bool {
        match self.inner.clear().await {
            Ok(()) => true,
            Err(e) => {
                warn!(target: "tale_cache", error = %e, "Cache clear failed");
                false
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await.unwrap_or_else(|e| {
            warn!(target: "tale_cache", error = %e, "Cache size unavailable");
            0
        })
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Raise a counter; `None` when the store could not
    pub async fn increment(&self, counter: &str) -> Option<u64> {
        match self.inner.increment(counter).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(target: "tale_cache", counter = %counter, error = %e, "Counter increment failed");
                None
            }
        }
    }

    /// Read a counter; `None` when the store could not answer
    pub async fn counter(&self, counter: &str) -> Option<u64> {
        match self.inner.counter(counter).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(target: "tale_cache", counter = %counter, error = %e, "Counter read failed");
                None
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.stats().await.unwrap_or_else(|e| {
            warn!(target: "tale_cache", error = %e, "Cache stats unavailable");
            CacheStats::default()
        })
    }

    pub async fn health_check(&self) -> StoreHealth {
        self.inner.health_check().await
    }
}
