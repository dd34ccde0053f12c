use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use parking_lot::RwLock as SyncRwLock;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use tale_cache_core::{
    BackendKind, CacheEntry, CacheError, CacheOptions, CacheStats, Clock, KeyValueStore, Result,
    SharedClock, StoreHealth, SystemClock, escape_glob,
};

use super::config::RedisConfig;

/// Redis-backed store shared by every server instance
///
/// Entries are stored as JSON-encoded [`CacheEntry`] values with a native
/// `PX` expiry equal to the entry's retention, so Redis drops them even if
/// no instance ever reads them again.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool<RedisConnectionManager>,
    config: RedisConfig,
    stats: Arc<SyncRwLock<CacheStats>>,
    clock: SharedClock,
}

impl RedisStore {
    /// Create a new Redis store
    ///
    /// Building the pool opens a connection, so an unreachable server is
    /// reported here.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        Self::with_clock(config, SystemClock::shared()).await
    }

    /// Create with an explicit clock
    pub async fn with_clock(config: RedisConfig, clock: SharedClock) -> Result<Self> {
        let manager = RedisConnectionManager::new(config.url.as_str())
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        Ok(Self {
            pool,
            config,
            stats: Arc::new(SyncRwLock::new(CacheStats::default())),
            clock,
        })
    }

    /// Get prefix for a key
    fn prefixed_key(&self, key: &str) -> String {
        prefixed(self.config.key_prefix.as_deref(), key)
    }

    /// Pattern restricted to this store's namespace
    fn prefixed_pattern(&self, pattern: &str) -> String {
        match &self.config.key_prefix {
            Some(prefix) => format!("{}:{}", escape_glob(prefix), pattern),
            None => pattern.to_string(),
        }
    }

    /// Get connection from pool
    async fn get_connection(&self) -> Result<PooledConnection<'_, RedisConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))
    }

    /// Walk `SCAN MATCH` to completion, returning raw (prefixed) keys
    async fn scan_raw(&self, raw_pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.get_connection().await?;
        let mut cursor = 0u64;
        let mut found = Vec::new();

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .cursor_arg(cursor)
                .arg("MATCH")
                .arg(raw_pattern)
                .arg("COUNT")
                .arg(self.config.scan_count)
                .query_async(&mut *conn)
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))?;

            found.extend(keys);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        // SCAN may return a key more than once
        found.sort();
        found.dedup();
        found.retain(|key| !key.starts_with(UNPREFIXED_COUNTER_MARKER));
        Ok(found)
    }

    async fn unlink(&self, raw_keys: &[String]) -> Result<u64> {
        if raw_keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.get_connection().await?;
        let removed: u64 = redis::cmd("UNLINK")
            .arg(raw_keys)
            .query_async(&mut *conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        self.stats.write().deletes += removed;
        Ok(removed)
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    fn kind(&self) -> BackendKind {
        BackendKind::External
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry<Vec<u8>>>> {
        let mut conn = self.get_connection().await?;
        let prefixed = self.prefixed_key(key);

        let bytes: Option<Vec<u8>> = redis::cmd("GET")
            .arg(&prefixed)
            .query_async(&mut *conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        let Some(data) = bytes else {
            self.stats.write().misses += 1;
            return Ok(None);
        };

        let entry: CacheEntry<Vec<u8>> = match serde_json::from_slice(&data) {
            Ok(entry) => entry,
            Err(e) => {
                // Drop the corrupted value so it cannot fail again
                warn!(target: "tale_cache", key = %key, error = %e, "Evicting undecodable Redis entry");
                let _: std::result::Result<u64, _> =
                    redis::cmd("DEL").arg(&prefixed).query_async(&mut *conn).await;
                self.stats.write().misses += 1;
                return Ok(None);
            }
        };

        if !entry.is_retained_at(self.clock.now_millis()) {
            self.stats.write().misses += 1;
            return Ok(None);
        }

        self.stats.write().hits += 1;
        Ok(Some(entry))
    }

    async fn set(&self, key: &str, value: Vec<u8>, options: &CacheOptions) -> Result<()> {
        let mut conn = self.get_connection().await?;

        let size = value.len();
        let mut entry = CacheEntry::new(value, size, self.clock.now_millis());
        entry.ttl = options.ttl;
        entry.stale_grace = options.stale_grace;

        let serialized =
            serde_json::to_vec(&entry).map_err(|e| CacheError::Serialization(e.to_string()))?;
        let prefixed = self.prefixed_key(key);

        let mut cmd = redis::cmd("SET");
        cmd.arg(&prefixed).arg(&serialized);
        if let Some(retention) = options.retention() {
            // PX 0 is rejected by Redis
            cmd.arg("PX").arg((retention.as_millis() as u64).max(1));
        }
        cmd.query_async::<()>(&mut *conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        self.stats.write().writes += 1;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed = self.unlink(&[self.prefixed_key(key)]).await?;
        Ok(removed > 0)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        let prefixed: Vec<String> = keys.iter().map(|k| self.prefixed_key(k)).collect();
        self.unlink(&prefixed).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self
            .get(key)
            .await?
            .is_some_and(|entry| !entry.is_expired_at(self.clock.now_millis())))
    }

    async fn scan_by_pattern(&self, pattern: &str) -> Result<Vec<String>> {
        let raw = self.scan_raw(&self.prefixed_pattern(pattern)).await?;
        let prefix = self.config.key_prefix.as_deref();
        Ok(raw
            .into_iter()
            .filter_map(|k| unprefixed(prefix, &k).map(str::to_string))
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        let keys = self.scan_raw(&self.prefixed_pattern("*")).await?;
        for chunk in keys.chunks(self.config.scan_count.max(1)) {
            self.unlink(chunk).await?;
        }
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        // O(N): DBSIZE would count counters and foreign keys
        Ok(self.scan_raw(&self.prefixed_pattern("*")).await?.len())
    }

    async fn increment(&self, counter: &str) -> Result<u64> {
        let mut conn = self.get_connection().await?;
        redis::cmd("INCR")
            .arg(counter_key(self.config.key_prefix.as_deref(), counter))
            .query_async(&mut *conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn counter(&self, counter: &str) -> Result<u64> {
        let mut conn = self.get_connection().await?;
        let value: Option<u64> = redis::cmd("GET")
            .arg(counter_key(self.config.key_prefix.as_deref(), counter))
            .query_async(&mut *conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(value.unwrap_or(0))
    }

    async fn stats(&self) -> Result<CacheStats> {
        let mut stats = self.stats.read().clone();
        stats.size = self.len().await?;
        Ok(stats)
    }

    async fn health_check(&self) -> StoreHealth {
        let start = Instant::now();
        let reachable = match self.get_connection().await {
            Ok(mut conn) => redis::cmd("PING")
                .query_async::<String>(&mut *conn)
                .await
                .is_ok(),
            Err(_) => false,
        };
        let latency_ms = start.elapsed().as_millis() as u64;

        if reachable {
            StoreHealth::reachable(BackendKind::External, latency_ms)
        } else {
            StoreHealth::unreachable(BackendKind::External, latency_ms)
        }
    }
}

fn prefixed(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}:{}", prefix, key),
        None => key.to_string(),
    }
}

/// Marks counter keys when no prefix separates them from entries
const UNPREFIXED_COUNTER_MARKER: &str = "__counter__#";

/// Counters sit outside the `prefix:*` entry namespace so scans and clears
/// skip them
fn counter_key(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}#{}", prefix, name),
        None => format!("{}{}", UNPREFIXED_COUNTER_MARKER, name),
    }
}

fn unprefixed<'a>(prefix: Option<&str>, raw: &'a str) -> Option<&'a str> {
    match prefix {
        Some(prefix) => raw.strip_prefix(prefix)?.strip_prefix(':'),
        None => Some(raw),
    }
}
