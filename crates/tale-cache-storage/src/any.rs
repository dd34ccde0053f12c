//! Topology selection
//!
//! Callers hold an [`AnyStore`] and never branch on whether a shared store
//! is behind it.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

use tale_cache_core::{
    BackendKind, CacheEntry, CacheOptions, CacheStats, KeyValueStore, Result, SharedClock,
    StoreHealth, SystemClock,
};

use crate::memory::{MemoryConfig, MemoryStore};

#[cfg(feature = "redis")]
use crate::redis::{RedisConfig, RedisStore};

#[cfg(all(feature = "redis", feature = "multitier"))]
use crate::multitier::{CircuitBreaker, RedisBus, TieredStore};

/// Environment variable naming the shared store
pub const ENV_REDIS_URL: &str = "TALE_CACHE_REDIS_URL";
/// Environment variable overriding the key namespace
pub const ENV_KEY_PREFIX: &str = "TALE_CACHE_KEY_PREFIX";
/// Environment variable bounding the in-process store
pub const ENV_MAX_ENTRIES: &str = "TALE_CACHE_MAX_ENTRIES";

/// Which store to build
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Shared store URL; `None` selects the in-process store
    pub redis_url: Option<String>,
    /// Key namespace inside the shared store
    pub key_prefix: Option<String>,
    /// In-process store settings, also used for the local tier
    pub memory: MemoryConfig,
    /// Put a local memory tier in front of the shared store
    pub tiered: bool,
    /// How long to wait for the shared store when connecting
    pub connection_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: Some("tale".to_string()),
            memory: MemoryConfig::default(),
            tiered: false,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl StoreConfig {
    /// In-process store only
    pub fn memory() -> Self {
        Self::default()
    }

    /// Shared store at `url`
    pub fn redis(url: impl Into<String>) -> Self {
        Self {
            redis_url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Read configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to
    /// its value
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_REDIS_URL).filter(|u| !u.trim().is_empty()) {
            config.redis_url = Some(url);
        }
        if let Some(prefix) = lookup(ENV_KEY_PREFIX) {
            config.key_prefix = if prefix.is_empty() { None } else { Some(prefix) };
        }
        if let Some(raw) = lookup(ENV_MAX_ENTRIES) {
            match raw.trim().parse::<usize>() {
                Ok(max) => config.memory.max_capacity = max,
                Err(_) => {
                    warn!(target: "tale_cache", value = %raw, "Ignoring invalid {}", ENV_MAX_ENTRIES)
                }
            }
        }
        config
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn with_memory(mut self, memory: MemoryConfig) -> Self {
        self.memory = memory;
        self
    }

    pub fn tiered(mut self, tiered: bool) -> Self {
        self.tiered = tiered;
        self
    }

    #[cfg(feature = "redis")]
    fn redis_config(&self, url: &str) -> RedisConfig {
        let mut redis = RedisConfig::new(url).connection_timeout(self.connection_timeout);
        redis.key_prefix = self.key_prefix.clone();
        redis
    }
}

/// The store selected at startup
pub enum AnyStore {
    Memory(MemoryStore),
    #[cfg(feature = "redis")]
    Redis(RedisStore),
    #[cfg(all(feature = "redis", feature = "multitier"))]
    Tiered(TieredStore<RedisStore>),
}

impl AnyStore {
    /// Build the configured store
    ///
    /// Uses the shared store when one is configured and answers a health check,
    /// otherwise logs why and falls back to the in-process store. Never
    /// fails.
    pub async fn connect(config: &StoreConfig) -> Self {
        Self::connect_with_clock(config, SystemClock::shared()).await
    }

    /// [`connect`](Self::connect) with an explicit clock
    pub async fn connect_with_clock(config: &StoreConfig, clock: SharedClock) -> Self {
        let Some(url) = config.redis_url.as_deref() else {
            info!(target: "tale_cache", "No shared store configured, using in-process cache");
            return Self::memory(config, clock);
        };

        Self::connect_shared(config, url, clock).await
    }

    #[cfg(feature = "redis")]
    async fn connect_shared(config: &StoreConfig, url: &str, clock: SharedClock) -> Self {
        match RedisStore::with_clock(config.redis_config(url), clock.clone()).await {
            Ok(redis) => {
                let health = redis.health_check().await;
                if health.reachable {
                    info!(target: "tale_cache", latency_ms = health.latency_ms, "Connected to shared store");
                    return Self::shared(config, url, redis, clock).await;
                }
                warn!(target: "tale_cache", "Shared store did not answer PING, using in-process cache");
            }
            Err(e) => {
                warn!(target: "tale_cache", error = %e, "Shared store unavailable, using in-process cache");
            }
        }
        Self::memory(config, clock)
    }

    #[cfg(not(feature = "redis"))]
    async fn connect_shared(config: &StoreConfig, url: &str, clock: SharedClock) -> Self {
        warn!(target: "tale_cache", url = %url, "Built without the `redis` feature, using in-process cache");
        Self::memory(config, clock)
    }

    fn memory(config: &StoreConfig, clock: SharedClock) -> Self {
        AnyStore::Memory(MemoryStore::with_clock(config.memory.clone(), clock))
    }

    /// Channel the local tiers of one key namespace coordinate on
    pub fn tier_channel(config: &StoreConfig) -> String {
        format!("{}:tier-invalidate", config.key_prefix.as_deref().unwrap_or("tale"))
    }

    #[cfg(feature = "redis")]
    async fn shared(config: &StoreConfig, url: &str, redis: RedisStore, clock: SharedClock) -> Self {
        #[cfg(feature = "multitier")]
        if config.tiered {
            // Without the bus other instances could shadow invalidations
            match RedisBus::connect(url, Self::tier_channel(config)).await {
                Ok(bus) => {
                    let l1 = MemoryStore::with_clock(config.memory.clone(), clock);
                    let tiered = TieredStore::new(l1, redis, CircuitBreaker::default()).with_bus(bus);
                    return AnyStore::Tiered(tiered);
                }
                Err(e) => {
                    warn!(target: "tale_cache", error = %e, "Tier invalidation channel unavailable, not using a local tier");
                }
            }
        }
        #[cfg(not(feature = "multitier"))]
        let _ = (config, url, clock);
        AnyStore::Redis(redis)
    }

    /// Whether keys are shared with other processes
    pub fn is_shared(&self) -> bool {
        self.kind() == BackendKind::External
    }
}

impl From<MemoryStore> for AnyStore {
    fn from(store: MemoryStore) -> Self {
        AnyStore::Memory(store)
    }
}

macro_rules! delegate {
    ($self:ident, $store:ident => $body:expr) => {
        match $self {
            AnyStore::Memory($store) => $body,
            #[cfg(feature = "redis")]
            AnyStore::Redis($store) => $body,
            #[cfg(all(feature = "redis", feature = "multitier"))]
            AnyStore::Tiered($store) => $body,
        }
    };
}

#[async_trait]
impl KeyValueStore for AnyStore {
    fn kind(&self) -> BackendKind {
        delegate!(self, s => s.kind())
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry<Vec<u8>>>> {
        delegate!(self, s => s.get(key).await)
    }

    async fn set(&self, key: &str, value: Vec<u8>, options: &CacheOptions) -> Result<()> {
        delegate!(self, s => s.set(key, value, options).await)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        delegate!(self, s => s.delete(key).await)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        delegate!(self, s => s.delete_many(keys).await)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        delegate!(self, s => s.exists(key).await)
    }

    async fn scan_by_pattern(&self, pattern: &str) -> Result<Vec<String>> {
        delegate!(self, s => s.scan_by_pattern(pattern).await)
    }

    async fn clear(&self) -> Result<()> {
        delegate!(self, s => s.clear().await)
    }

    async fn len(&self) -> Result<usize> {
        delegate!(self, s => s.len().await)
    }

    async fn increment(&self, counter: &str) -> Result<u64> {
        delegate!(self, s => s.increment(counter).await)
    }

    async fn counter(&self, counter: &str) -> Result<u64> {
        delegate!(self, s => s.counter(counter).await)
    }

    async fn stats(&self) -> Result<CacheStats> {
        delegate!(self, s => s.stats().await)
    }

    async fn health_check(&self) -> StoreHealth {
        delegate!(self, s => s.health_check().await)
    }
}
