//! Server-side cache manager

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use tale_cache_core::{
    BackendKind, CacheEntry, CacheError, CacheKey, CacheMetrics, CacheOperation, CacheOptions,
    CacheStats, Cached, Clock, EvictionReason, JsonSerializer, KeyValueStore, Lookup,
    NoopMetrics, Result, Serializer, SharedClock, SignalResponse, StoreHealth, SystemClock,
    escape_glob,
};
use tale_cache_storage::FailSoft;

use crate::resource::{ResourceClass, ResourcePolicy};
use crate::signal::{GENERATION_COUNTER, InvalidationEvent, InvalidationSignal, instructions_for};

mod coalescer;
use coalescer::Coalescer;

mod groups;
pub use groups::ResourceScope;

/// Configuration for CacheManager
#[derive(Debug, Clone)]
pub struct CacheManagerConfig {
    /// TTL for writes that do not name one
    pub default_ttl: Option<Duration>,
    /// Namespace prefix for all keys
    pub namespace: Option<String>,
    /// TTL jitter fraction (0.0 - 1.0); 0 keeps TTLs exact
    pub ttl_jitter: f64,
    /// TTL per resource class
    pub policy: ResourcePolicy,
    /// Keep entries this long past their TTL so
    /// [`get_or_compute_or_stale`](CacheManager::get_or_compute_or_stale)
    /// can fall back to them. `None` disables serve-stale.
    pub stale_grace: Option<Duration>,
}

impl Default for CacheManagerConfig {
    fn default() -> Self {
        Self {
            default_ttl: Some(Duration::from_secs(300)),
            namespace: None,
            ttl_jitter: 0.0,
            policy: ResourcePolicy::default(),
            stale_grace: None,
        }
    }
}

impl CacheManagerConfig {
    /// Create config with specific default TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            default_ttl: Some(ttl),
            ..Default::default()
        }
    }

    /// Create config with namespace
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    /// Replace the per-class TTLs
    pub fn policy(mut self, policy: ResourcePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Enable serve-stale with the given grace period
    pub fn serve_stale(mut self, grace: Duration) -> Self {
        self.stale_grace = Some(grace);
        self
    }

    /// Spread expiries by up to `fraction` of the TTL
    pub fn jitter(mut self, fraction: f64) -> Self {
        self.ttl_jitter = fraction.clamp(0.0, 1.0);
        self
    }
}

/// Counters reported by [`CacheManager::get_stats`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub backend: BackendKind,
    /// Entries currently held by the store
    ///
    /// Includes entries past their TTL that are only kept for the
    /// serve-stale grace period; a plain `get` never returns those.
    pub entry_count: usize,
}

impl ManagerStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Server-side cache with key policy, TTL policy and invalidation
///
/// A store failure never reaches the caller: reads degrade to misses and
/// writes are skipped, both logged at the store boundary. The only error a
/// caller can see is its own producer failing.
///
/// Generic over:
/// - `B`: The store (memory, Redis, tiered, or [`AnyStore`](crate::AnyStore))
/// - `S`: The serializer
/// - `M`: The metrics collector
pub struct CacheManager<B, S = JsonSerializer, M = NoopMetrics>
where
    B: KeyValueStore,
    S: Serializer,
    M: CacheMetrics,
{
    store: Arc<FailSoft<B>>,
    serializer: Arc<S>,
    metrics: Arc<M>,
    config: CacheManagerConfig,
    coalescer: Coalescer<Cached<Vec<u8>>>,
    counters: Arc<Counters>,
    signal: InvalidationSignal,
    clock: SharedClock,
}

// Constructors for default serializer/metrics
impl<B: KeyValueStore> CacheManager<B, JsonSerializer, NoopMetrics> {
    /// Create a new CacheManager with default JSON serializer and no metrics
    pub fn new(store: B) -> Self {
        Self::with_config(store, CacheManagerConfig::default())
    }

    /// Create with custom config
    pub fn with_config(store: B, config: CacheManagerConfig) -> Self {
        Self::with_serializer_and_metrics(store, JsonSerializer, NoopMetrics, config)
    }
}

impl<B, S, M> CacheManager<B, S, M>
where
    B: KeyValueStore,
    S: Serializer,
    M: CacheMetrics,
{
    /// Create a CacheManager with custom serializer and metrics
    pub fn with_serializer_and_metrics(
        store: B,
        serializer: S,
        metrics: M,
        config: CacheManagerConfig,
    ) -> Self {
        Self {
            store: Arc::new(FailSoft::new(store)),
            serializer: Arc::new(serializer),
            metrics: Arc::new(metrics),
            config,
            coalescer: Coalescer::new(),
            counters: Arc::new(Counters::default()),
            signal: InvalidationSignal::default(),
            clock: SystemClock::shared(),
        }
    }

    /// Judge ages against `clock`; must be the clock the store uses
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Raise invalidations on a signal shared with other components
    pub fn with_signal(mut self, signal: InvalidationSignal) -> Self {
        self.signal = signal;
        self
    }

    /// The signal raised by every invalidation
    pub fn signal(&self) -> &InvalidationSignal {
        &self.signal
    }

    pub fn config(&self) -> &CacheManagerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &M {
        &self.metrics
    }

    /// The underlying store
    pub fn store(&self) -> &B {
        self.store.inner()
    }

    /// Operations scoped to one resource family
    pub fn scope(&self, class: ResourceClass) -> ResourceScope<'_, B, S, M> {
        ResourceScope::new(self, class)
    }

    /// Get the full key with namespace prefix
    fn full_key(&self, key: &str) -> String {
        match &self.config.namespace {
            Some(ns) => format!("{}:{}", ns, key),
            None => key.to_string(),
        }
    }

    /// Restrict a caller's glob to this manager's namespace
    fn full_pattern(&self, pattern: &str) -> String {
        match &self.config.namespace {
            Some(ns) => format!("{}:{}", escape_glob(ns), pattern),
            None => pattern.to_string(),
        }
    }

    /// Apply TTL jitter to prevent thundering herd on expiry
    fn apply_ttl_jitter(&self, ttl: Duration) -> Duration {
        if self.config.ttl_jitter > 0.0 {
            let jitter_range = (ttl.as_millis() as f64 * self.config.ttl_jitter) as u64;
            if jitter_range > 0 {
                let jitter = rand::random::<u64>() % jitter_range;
                return ttl + Duration::from_millis(jitter);
            }
        }
        ttl
    }

    fn write_options(&self, mut options: CacheOptions) -> CacheOptions {
        if options.ttl.is_none() {
            options.ttl = self.config.default_ttl;
        }
        if let Some(ttl) = options.ttl {
            options.ttl = Some(self.apply_ttl_jitter(ttl));
        }
        if options.stale_grace.is_none() {
            options.stale_grace = self.config.stale_grace;
        }
        options
    }

    fn record_hit(&self, full_key: &str) {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_hit(full_key);
    }

    fn record_miss(&self, full_key: &str) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_miss(full_key);
    }

    /// Read through the fail-soft boundary
    async fn lookup(&self, full_key: &str) -> Option<CacheEntry<Vec<u8>>> {
        match self.store.get(full_key).await {
            Lookup::Found(entry) => Some(entry),
            Lookup::Miss => None,
            Lookup::BackendError(_) => {
                self.metrics.record_backend_error(CacheOperation::Get);
                None
            }
        }
    }

    /// Decode a stored payload, evicting it if it is corrupt
    async fn decode<T: DeserializeOwned>(&self, full_key: &str, bytes: &[u8]) -> Option<T> {
        match self.serializer.deserialize(bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(target: "tale_cache", key = %full_key, error = %e, "Evicting undecodable cache entry");
                self.store.delete(full_key).await;
                self.metrics.record_eviction(EvictionReason::Corrupted);
                None
            }
        }
    }

    /// Get a value from cache
    ///
    /// Returns `None` on a miss, an expired entry, a corrupt entry or a
    /// store failure. Never returns an entry past its TTL.
    pub async fn get<T>(&self, key: impl CacheKey) -> Option<Cached<T>>
    where
        T: DeserializeOwned,
    {
        let full_key = self.full_key(&key.full_key());
        let start = Instant::now();
        let now = self.clock.now_millis();

        let mut result = None;
        if let Some(entry) = self.lookup(&full_key).await {
            if !entry.is_expired_at(now) {
                if let Some(value) = self.decode(&full_key, &entry.value).await {
                    result = Some(Cached::fresh(value, entry.age_at(now)));
                }
            }
        }

        match &result {
            Some(_) => self.record_hit(&full_key),
            None => self.record_miss(&full_key),
        }
        self.metrics
            .record_latency(CacheOperation::Get, start.elapsed());
        result
    }

    /// Set a value in cache
    ///
    /// Returns whether the value was stored; a failure is logged and
    /// otherwise ignored.
    pub async fn set<T>(&self, key: impl CacheKey, value: T, options: impl Into<CacheOptions>) -> bool
    where
        T: Serialize,
    {
        let full_key = self.full_key(&key.full_key());
        match self.serializer.serialize(&value) {
            Ok(bytes) => self.set_raw(&full_key, bytes, options.into()).await,
            Err(e) => {
                warn!(target: "tale_cache", key = %full_key, error = %e, "Value not cacheable, skipping write");
                false
            }
        }
    }

    /// Set a value with its resource class's TTL
    pub async fn set_for<T>(&self, class: ResourceClass, key: impl CacheKey, value: T) -> bool
    where
        T: Serialize,
    {
        self.set(key, value, self.config.policy.ttl_for(class)).await
    }

    async fn set_raw(&self, full_key: &str, bytes: Vec<u8>, options: CacheOptions) -> bool {
        let options = self.write_options(options);
        let start = Instant::now();
        let stored = self.store.set(full_key, bytes, &options).await;
        if !stored {
            self.metrics.record_backend_error(CacheOperation::Set);
        }
        self.metrics
            .record_latency(CacheOperation::Set, start.elapsed());
        stored
    }

    /// Get a value, or compute and cache it on a miss
    ///
    /// Concurrent callers for the same key share one producer run. The
    /// producer's error is returned to all of them and nothing is cached.
    pub async fn get_or_compute<T, F, Fut, E>(
        &self,
        key: impl CacheKey,
        class: ResourceClass,
        producer: F,
    ) -> Result<Cached<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let ttl = self.config.policy.ttl_for(class);
        self.compute(key, ttl, producer, false).await
    }

    /// Like [`get_or_compute`](Self::get_or_compute), but when the producer
    /// fails and an expired entry is still within the stale grace, that
    /// entry is returned marked [`Freshness::Stale`](crate::Freshness::Stale)
    ///
    /// Requires [`CacheManagerConfig::stale_grace`]; without it expired
    /// entries are gone and this behaves like `get_or_compute`.
    pub async fn get_or_compute_or_stale<T, F, Fut, E>(
        &self,
        key: impl CacheKey,
        class: ResourceClass,
        producer: F,
    ) -> Result<Cached<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let ttl = self.config.policy.ttl_for(class);
        self.compute(key, ttl, producer, true).await
    }

    pub(crate) async fn compute<T, F, Fut, E>(
        &self,
        key: impl CacheKey,
        ttl: Duration,
        producer: F,
        serve_stale: bool,
    ) -> Result<Cached<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let full_key = self.full_key(&key.full_key());
        // Callers willing to take stale data must not inherit a strict error
        let flight_key = if serve_stale {
            format!("{}\u{0}stale", full_key)
        } else {
            full_key.clone()
        };

        let start = Instant::now();
        let key_ref = full_key.as_str();
        let cached = self
            .coalescer
            .do_request(&flight_key, move || {
                self.load_or_compute::<T, F, Fut, E>(key_ref, ttl, producer, serve_stale)
            })
            .await?;
        self.metrics
            .record_latency(CacheOperation::Compute, start.elapsed());

        let value = self.serializer.deserialize(&cached.value)?;
        Ok(Cached {
            value,
            age: cached.age,
            freshness: cached.freshness,
        })
    }

    async fn load_or_compute<T, F, Fut, E>(
        &self,
        full_key: &str,
        ttl: Duration,
        producer: F,
        serve_stale: bool,
    ) -> Result<Cached<Vec<u8>>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let now = self.clock.now_millis();
        let mut stale = None;

        if let Some(entry) = self.lookup(full_key).await {
            if self.decode::<T>(full_key, &entry.value).await.is_some() {
                if !entry.is_expired_at(now) {
                    self.record_hit(full_key);
                    let age = entry.age_at(now);
                    return Ok(Cached::fresh(entry.value, age));
                }
                if entry.is_stale_at(now) {
                    stale = Some(entry);
                }
            }
        }
        self.record_miss(full_key);

        match producer().await {
            Ok(value) => {
                let bytes = self.serializer.serialize(&value)?;
                self.set_raw(full_key, bytes.clone(), CacheOptions::from(ttl))
                    .await;
                Ok(Cached::fresh(bytes, Duration::ZERO))
            }
            Err(e) => match stale {
                Some(entry) if serve_stale => {
                    warn!(target: "tale_cache", key = %full_key, error = %e, "Producer failed, serving stale entry");
                    self.metrics.record_stale_served(full_key);
                    let age = entry.age_at(self.clock.now_millis());
                    Ok(Cached::stale(entry.value, age))
                }
                _ => Err(CacheError::Producer(e.to_string())),
            },
        }
    }

    /// Bump the shared generation and broadcast `event`
    async fn raise_signal(&self, event: InvalidationEvent) {
        let generation = self
            .store
            .increment(&self.full_key(GENERATION_COUNTER))
            .await;
        self.signal.raise(event, generation);
    }

    /// Answer a client invalidation poll
    ///
    /// Reads the generation from the store, so every instance sharing it
    /// gives the same answer. When the store cannot answer the response is
    /// unsuccessful, which clients treat as "no invalidation".
    pub async fn instructions_since(&self, since: Option<u64>) -> SignalResponse {
        match self.store.counter(&self.full_key(GENERATION_COUNTER)).await {
            Some(current) => {
                self.signal.observe(current);
                instructions_for(current, since)
            }
            None => SignalResponse::failed(),
        }
    }

    /// Remove one entry, returning whether it existed
    pub async fn invalidate(&self, key: impl CacheKey) -> bool {
        let full_key = self.full_key(&key.full_key());
        let start = Instant::now();

        let removed = self.store.delete(&full_key).await;
        self.metrics
            .record_invalidation(&full_key, u64::from(removed));
        self.metrics
            .record_latency(CacheOperation::Invalidate, start.elapsed());
        self.raise_signal(InvalidationEvent::Key(full_key)).await;
        removed
    }

    /// Remove every entry whose key matches `pattern`
    ///
    /// Glob syntax is that of Redis `MATCH`: `*`, `?`, `[...]` and `\`
    /// escapes. Returns how many entries were removed.
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        let start = Instant::now();
        let full_pattern = self.full_pattern(pattern);

        let keys = self.store.scan(&full_pattern).await;
        let removed = self.store.delete_many(&keys).await;

        debug!(target: "tale_cache", pattern = %full_pattern, matched = keys.len(), removed, "Pattern invalidated");
        self.metrics.record_invalidation(&full_pattern, removed);
        self.metrics
            .record_latency(CacheOperation::Invalidate, start.elapsed());
        self.raise_signal(InvalidationEvent::Pattern(full_pattern))
            .await;
        removed
    }

    /// Remove every variant of a resource family
    pub async fn invalidate_class(&self, class: ResourceClass) -> u64 {
        self.invalidate_pattern(&class.pattern()).await
    }

    /// Remove every cached statistics variant
    pub async fn invalidate_stats(&self) -> u64 {
        self.invalidate_class(ResourceClass::Stats).await
    }

    /// Remove every cached user listing
    pub async fn invalidate_users(&self) -> u64 {
        self.invalidate_class(ResourceClass::Users).await
    }

    /// Remove every cached story listing
    pub async fn invalidate_stories(&self) -> u64 {
        self.invalidate_class(ResourceClass::Stories).await
    }

    /// Clear all entries
    ///
    /// With a namespace configured only that namespace is removed, since a
    /// shared store may hold other tenants' keys.
    pub async fn clear(&self) -> bool {
        let start = Instant::now();
        let cleared = match &self.config.namespace {
            Some(_) => {
                let keys = self.store.scan(&self.full_pattern("*")).await;
                self.store.delete_many(&keys).await;
                true
            }
            None => self.store.clear().await,
        };
        if !cleared {
            self.metrics.record_backend_error(CacheOperation::Clear);
        }
        self.metrics
            .record_latency(CacheOperation::Clear, start.elapsed());
        self.raise_signal(InvalidationEvent::Clear).await;
        cleared
    }

    /// Hit and miss counts of this manager plus the store's size
    ///
    /// `entry_count` counts physically retained entries, so with a stale
    /// grace configured it includes expired entries until the grace ends.
    pub async fn get_stats(&self) -> ManagerStats {
        ManagerStats {
            hit_count: self.counters.hits.load(Ordering::Relaxed),
            miss_count: self.counters.misses.load(Ordering::Relaxed),
            backend: self.store.kind(),
            entry_count: self.store.len().await,
        }
    }

    /// Raw store counters
    pub async fn store_stats(&self) -> CacheStats {
        self.store.stats().await
    }

    /// Check store reachability
    pub async fn health_check(&self) -> StoreHealth {
        self.store.health_check().await
    }
}

impl<B, S, M> Clone for CacheManager<B, S, M>
where
    B: KeyValueStore,
    S: Serializer,
    M: CacheMetrics,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            serializer: self.serializer.clone(),
            metrics: self.metrics.clone(),
            config: self.config.clone(),
            coalescer: self.coalescer.clone(),
            counters: self.counters.clone(),
            signal: self.signal.clone(),
            clock: self.clock.clone(),
        }
    }
}
