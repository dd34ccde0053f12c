//! Key-value store trait

use async_trait::async_trait;

use crate::{BackendKind, CacheEntry, CacheError, CacheOptions, CacheStats, StoreHealth};

/// Storage operations every cache backend provides
///
/// Implementations report failures through `Result`; the fail-soft contract
/// (errors become misses or skipped writes) is applied by the layer above so
/// that each failure is logged exactly once.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Which topology this store represents
    fn kind(&self) -> BackendKind;

    /// Get an entry
    ///
    /// Returns `None` if the key doesn't exist or is past its retention.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<Vec<u8>>>, CacheError>;

    /// Write an entry, expiring it after `options.retention()`
    async fn set(&self, key: &str, value: Vec<u8>, options: &CacheOptions)
    -> Result<(), CacheError>;

    /// Delete a key
    ///
    /// Returns `true` if the key existed and was deleted.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Delete several keys, returning how many existed
    async fn delete_many(&self, keys: &[String]) -> Result<u64, CacheError>;

    /// Check if a live entry exists
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// All keys matching a glob pattern
    ///
    /// Keys are reported as callers wrote them, without any backend prefix.
    async fn scan_by_pattern(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    /// Clear all entries owned by this store
    async fn clear(&self) -> Result<(), CacheError>;

    /// Number of entries
    async fn len(&self) -> Result<usize, CacheError>;

    /// Check if the store is empty
    async fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len().await? == 0)
    }

    /// Atomically add one to a named counter and return the new value
    ///
    /// Counters live beside the entries: `scan_by_pattern`, `len` and
    /// `clear` never see them, and they never expire.
    async fn increment(&self, counter: &str) -> Result<u64, CacheError>;

    /// Current value of a named counter, `0` if it was never incremented
    async fn counter(&self, counter: &str) -> Result<u64, CacheError>;

    /// Store counters
    async fn stats(&self) -> Result<CacheStats, CacheError>;

    /// Measure reachability and round-trip latency
    async fn health_check(&self) -> StoreHealth;
}
