//! In-memory cache backend using DashMap

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use tale_cache_core::{
    BackendKind, CacheEntry, CacheOptions, CacheStats, Clock, KeyValueStore, Result, SharedClock,
    StoreHealth, SystemClock, glob_match,
};

/// Configuration for the memory backend
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Maximum number of entries (0 = unlimited)
    pub max_capacity: usize,
    /// Interval of the background expiry sweep
    pub cleanup_interval: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl MemoryConfig {
    /// Create config with specific capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            max_capacity: capacity,
            ..Default::default()
        }
    }

    /// Create config with unlimited capacity
    pub fn unlimited() -> Self {
        Self {
            max_capacity: 0,
            ..Default::default()
        }
    }
}

/// Internal statistics tracking
#[derive(Debug, Default)]
struct MemoryStats {
    hits: u64,
    misses: u64,
    writes: u64,
    deletes: u64,
    evictions: u64,
}

/// In-process fallback store
///
/// Process-local: several server instances each running a `MemoryStore`
/// hold independent cache state. Cloning creates a new handle to the SAME
/// underlying map.
#[derive(Clone)]
pub struct MemoryStore {
    data: Arc<DashMap<String, CacheEntry<Vec<u8>>>>,
    counters: Arc<DashMap<String, u64>>,
    stats: Arc<RwLock<MemoryStats>>,
    config: MemoryConfig,
    clock: SharedClock,
}

impl MemoryStore {
    /// Create a new memory store on the system clock
    pub fn new(config: MemoryConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Create with an explicit clock
    pub fn with_clock(config: MemoryConfig, clock: SharedClock) -> Self {
        Self {
            data: Arc::new(DashMap::with_capacity(config.max_capacity.min(10_000))),
            counters: Arc::new(DashMap::new()),
            stats: Arc::new(RwLock::new(MemoryStats::default())),
            config,
            clock,
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(MemoryConfig::default())
    }

    /// The clock expiry is judged against
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Insert a pre-built entry, keeping its original timestamps
    ///
    /// Used when backfilling from another tier so the copy expires together
    /// with the original.
    pub fn insert_entry(&self, key: &str, entry: CacheEntry<Vec<u8>>) {
        if !entry.is_retained_at(self.clock.now_millis()) {
            return;
        }
        self.maybe_evict(key);
        self.data.insert(key.to_string(), entry);
    }

    /// Make room for `incoming` if at capacity
    ///
    /// Expired entries go first, then the oldest writes.
    fn maybe_evict(&self, incoming: &str) {
        let cap = self.config.max_capacity;
        if cap == 0 || self.data.len() < cap || self.data.contains_key(incoming) {
            return;
        }

        self.cleanup_expired();
        if self.data.len() < cap {
            return;
        }

        let excess = self.data.len() + 1 - cap;
        let mut by_age: Vec<(String, u64)> = self
            .data
            .iter()
            .map(|entry| (entry.key().clone(), entry.stored_at))
            .collect();
        by_age.sort_by_key(|(_, stored_at)| *stored_at);

        for (key, _) in by_age.into_iter().take(excess) {
            if self.data.remove(&key).is_some() {
                self.stats.write().evictions += 1;
            }
        }
    }

    /// Remove entries past their retention and return how many were dropped
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let expired: Vec<String> = self
            .data
            .iter()
            .filter(|entry| !entry.is_retained_at(now))
            .map(|entry| entry.key().clone())
            .collect();

        let mut count = 0;
        for key in expired {
            if self
                .data
                .remove_if(&key, |_, entry| !entry.is_retained_at(now))
                .is_some()
            {
                count += 1;
            }
        }

        if count > 0 {
            self.stats.write().evictions += count as u64;
            debug!(target: "tale_cache", removed = count, "Swept expired memory entries");
        }
        count
    }

    /// Run [`cleanup_expired`](Self::cleanup_expired) every
    /// `config.cleanup_interval` until the handle is aborted
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let store = self.clone();
        let period = self.config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.cleanup_expired();
            }
        })
    }

    /// Get approximate memory usage
    pub fn memory_usage(&self) -> usize {
        self.data
            .iter()
            .map(|entry| entry.size + entry.key().len())
            .sum()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry<Vec<u8>>>> {
        let now = self.clock.now_millis();
        match self.data.get_mut(key) {
            Some(mut entry) => {
                if !entry.is_retained_at(now) {
                    drop(entry);
                    // A concurrent writer may have replaced the entry
                    self.data
                        .remove_if(key, |_, entry| !entry.is_retained_at(now));
                    let mut stats = self.stats.write();
                    stats.misses += 1;
                    stats.evictions += 1;
                    return Ok(None);
                }

                entry.access_count += 1;
                self.stats.write().hits += 1;
                Ok(Some(entry.clone()))
            }
            None => {
                self.stats.write().misses += 1;
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, options: &CacheOptions) -> Result<()> {
        self.maybe_evict(key);

        let size = value.len();
        let mut entry = CacheEntry::new(value, size, self.clock.now_millis());
        entry.ttl = options.ttl;
        entry.stale_grace = options.stale_grace;

        self.data.insert(key.to_string(), entry);
        self.stats.write().writes += 1;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        if self.data.remove(key).is_some() {
            self.stats.write().deletes += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        let mut count = 0;
        for key in keys {
            if self.delete(key).await? {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = self.clock.now_millis();
        Ok(self
            .data
            .get(key)
            .is_some_and(|entry| !entry.is_expired_at(now)))
    }

    async fn scan_by_pattern(&self, pattern: &str) -> Result<Vec<String>> {
        let now = self.clock.now_millis();
        Ok(self
            .data
            .iter()
            .filter(|entry| entry.is_retained_at(now) && glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        self.data.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        let now = self.clock.now_millis();
        Ok(self
            .data
            .iter()
            .filter(|entry| entry.is_retained_at(now))
            .count())
    }

    async fn increment(&self, counter: &str) -> Result<u64> {
        let mut value = self.counters.entry(counter.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn counter(&self, counter: &str) -> Result<u64> {
        Ok(self.counters.get(counter).map_or(0, |value| *value))
    }

    async fn stats(&self) -> Result<CacheStats> {
        let size = self.len().await?;
        let stats = self.stats.read();
        Ok(CacheStats {
            hits: stats.hits,
            misses: stats.misses,
            writes: stats.writes,
            deletes: stats.deletes,
            evictions: stats.evictions,
            size,
            memory_bytes: self.memory_usage(),
        })
    }

    async fn health_check(&self) -> StoreHealth {
        StoreHealth::reachable(BackendKind::Memory, 0)
    }
}
