//! Persisted, expiry-stamped cache for fetched statistics

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, trace, warn};

use tale_cache_core::{Clock, SharedClock, SystemClock};

use crate::params::CacheParams;
use crate::storage::{Availability, PersistentStorage, StorageError};

/// Prefix of every storage key the cache owns
pub const DEFAULT_PREFIX: &str = "stats_cache_";

/// Configuration for [`ClientStatsCache`]
#[derive(Debug, Clone)]
pub struct ClientCacheConfig {
    /// How long a written entry stays fresh
    pub ttl: Duration,
    /// Prefix prepended to every cache key
    pub prefix: String,
    /// Keys (without prefix) cleared when storage cannot be enumerated
    pub fallback_keys: Vec<String>,
    /// How often the invalidation poller asks the server
    pub poll_interval: Duration,
}

impl Default for ClientCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            prefix: DEFAULT_PREFIX.to_string(),
            fallback_keys: ["dashboard", "admin_stats", "user_stats", "story_stats", "users", "stories"]
                .into_iter()
                .map(String::from)
                .collect(),
            poll_interval: Duration::from_secs(2 * 60),
        }
    }
}

impl ClientCacheConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Persisted form of one entry
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntry<T> {
    data: T,
    /// Epoch milliseconds after which the entry is stale
    expiry: u64,
    cache_key: String,
}

/// An entry whose payload has not been decoded yet
type RawEntry = StoredEntry<serde_json::Value>;

impl RawEntry {
    fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str::<Self>(raw)
            .ok()
            .filter(|entry| !entry.data.is_null() && !entry.cache_key.is_empty())
    }
}

/// Client-side cache of fetched statistics in persistent storage
///
/// Never fails: unavailable storage, quota errors and corrupt entries all
/// degrade to misses or skipped writes, so callers always fall through to
/// a live fetch. Expired entries are detected lazily on read and evicted.
pub struct ClientStatsCache<S: PersistentStorage> {
    storage: S,
    config: ClientCacheConfig,
    clock: SharedClock,
}

impl<S: PersistentStorage> ClientStatsCache<S> {
    pub fn new(storage: S) -> Self {
        Self::with_config(storage, ClientCacheConfig::default())
    }

    pub fn with_config(storage: S, config: ClientCacheConfig) -> Self {
        Self {
            storage,
            config,
            clock: SystemClock::shared(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ClientCacheConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Check storage; checked again on every operation
    pub fn availability(&self) -> Availability {
        self.storage.availability()
    }

    fn storage_key(&self, params: &CacheParams) -> String {
        format!("{}{}", self.config.prefix, params.cache_key())
    }

    fn usable(&self, op: &'static str) -> bool {
        match self.storage.availability() {
            Availability::Available => true,
            Availability::Unavailable(reason) => {
                debug!(target: "tale_cache", op, reason = %reason, "Client storage unavailable");
                false
            }
        }
    }

    fn evict(&self, key: &str) {
        if let Err(e) = self.storage.remove_item(key) {
            debug!(target: "tale_cache", key, error = %e, "Failed to evict client cache entry");
        }
    }

    /// Read the entry for `params` if it parses and belongs to them
    fn read_entry(&self, key: &str, params: &CacheParams) -> Option<RawEntry> {
        let raw = match self.storage.get_item(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                debug!(target: "tale_cache", key, error = %e, "Client cache read failed");
                return None;
            }
        };
        match RawEntry::parse(&raw) {
            Some(entry) if entry.cache_key == params.cache_key() => Some(entry),
            _ => {
                warn!(target: "tale_cache", key, "Evicting malformed client cache entry");
                self.evict(key);
                None
            }
        }
    }

    /// Get cached data for `params`, or `None` on any miss
    pub fn get_cached_data<T: DeserializeOwned>(&self, params: &CacheParams) -> Option<T> {
        if !self.usable("get") {
            return None;
        }
        let key = self.storage_key(params);
        let entry = self.read_entry(&key, params)?;

        // Still valid at the expiry instant itself
        if self.clock.now_millis() > entry.expiry {
            trace!(target: "tale_cache", key = %key, "Client cache entry expired");
            self.evict(&key);
            return None;
        }

        match serde_json::from_value(entry.data) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(target: "tale_cache", key = %key, error = %e, "Evicting client cache entry of unexpected shape");
                self.evict(&key);
                None
            }
        }
    }

    /// Store `data` for `params`, fresh for the configured TTL
    ///
    /// On a quota error, expired entries are swept and the write retried
    /// once. Returns whether the data was stored.
    pub fn set_cached_data<T: Serialize>(&self, params: &CacheParams, data: &T) -> bool {
        if !self.usable("set") {
            return false;
        }
        let key = self.storage_key(params);
        let data = match serde_json::to_value(data) {
            // A null payload could never be read back
            Ok(serde_json::Value::Null) => {
                debug!(target: "tale_cache", key = %key, "Refusing to cache a null payload");
                return false;
            }
            Ok(data) => data,
            Err(e) => {
                warn!(target: "tale_cache", key = %key, error = %e, "Value not cacheable, skipping write");
                return false;
            }
        };
        let entry = StoredEntry {
            data,
            expiry: self.clock.now_millis() + self.config.ttl.as_millis() as u64,
            cache_key: params.cache_key(),
        };
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(target: "tale_cache", key = %key, error = %e, "Value not cacheable, skipping write");
                return false;
            }
        };

        match self.storage.set_item(&key, &raw) {
            Ok(()) => {}
            Err(StorageError::QuotaExceeded) => {
                let swept = self.cleanup_expired_entries();
                debug!(target: "tale_cache", key = %key, swept, "Storage quota exceeded, retrying once");
                if let Err(e) = self.storage.set_item(&key, &raw) {
                    warn!(target: "tale_cache", key = %key, error = %e, "Client cache write failed after sweep");
                    return false;
                }
            }
            Err(e) => {
                warn!(target: "tale_cache", key = %key, error = %e, "Client cache write failed");
                return false;
            }
        }

        self.cleanup_expired_entries();
        true
    }

    /// Return cached data, or run `fetch` and cache its result
    pub async fn get_or_fetch<T, F, Fut, E>(&self, params: &CacheParams, fetch: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(data) = self.get_cached_data(params) {
            return Ok(data);
        }
        let data = fetch().await?;
        self.set_cached_data(params, &data);
        Ok(data)
    }

    pub fn remove_cached_data(&self, params: &CacheParams) -> bool {
        if !self.usable("remove") {
            return false;
        }
        let key = self.storage_key(params);
        match self.storage.remove_item(&key) {
            Ok(()) => true,
            Err(e) => {
                debug!(target: "tale_cache", key = %key, error = %e, "Client cache remove failed");
                false
            }
        }
    }

    /// Every stored key under the prefix, skipping indices that fail
    fn owned_keys(&self) -> Result<Vec<String>, StorageError> {
        let len = self.storage.length()?;
        let mut keys = Vec::new();
        for index in 0..len {
            match self.storage.key(index) {
                Ok(Some(key)) if key.starts_with(&self.config.prefix) => keys.push(key),
                Ok(_) => {}
                Err(e) => {
                    trace!(target: "tale_cache", index, error = %e, "Skipping unreadable storage index");
                }
            }
        }
        Ok(keys)
    }

    /// Remove every entry the cache owns, returning how many were removed
    ///
    /// When storage cannot be enumerated the configured fallback keys are
    /// removed instead.
    pub fn clear_all_cache(&self) -> usize {
        if !self.usable("clear") {
            return 0;
        }
        let keys = match self.owned_keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(target: "tale_cache", error = %e, "Cannot enumerate client storage, clearing known keys");
                self.config
                    .fallback_keys
                    .iter()
                    .map(|name| format!("{}{}", self.config.prefix, name))
                    .collect()
            }
        };

        let removed = keys
            .iter()
            .filter(|key| self.storage.remove_item(key).is_ok())
            .count();
        debug!(target: "tale_cache", removed, "Cleared client cache");
        removed
    }

    /// Evict expired or unparsable entries, returning how many went
    pub fn cleanup_expired_entries(&self) -> usize {
        let keys = match self.owned_keys() {
            Ok(keys) => keys,
            Err(e) => {
                debug!(target: "tale_cache", error = %e, "Skipping client cache sweep");
                return 0;
            }
        };
        let now = self.clock.now_millis();

        let mut evicted = 0;
        for key in keys {
            let expired = match self.storage.get_item(&key) {
                Ok(Some(raw)) => RawEntry::parse(&raw).is_none_or(|entry| now > entry.expiry),
                Ok(None) | Err(_) => false,
            };
            if expired && self.storage.remove_item(&key).is_ok() {
                evicted += 1;
            }
        }
        if evicted > 0 {
            debug!(target: "tale_cache", evicted, "Swept expired client cache entries");
        }
        evicted
    }

    /// Whether more than half of the entry's TTL remains
    ///
    /// False for missing, expired or unreadable entries.
    pub fn is_cache_fresh(&self, params: &CacheParams) -> bool {
        if !self.usable("freshness") {
            return false;
        }
        let key = self.storage_key(params);
        let Some(entry) = self.read_entry(&key, params) else {
            return false;
        };
        let remaining = entry.expiry.saturating_sub(self.clock.now_millis());
        u128::from(remaining) * 2 > self.config.ttl.as_millis()
    }
}
