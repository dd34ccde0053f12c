use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, warn};

use tale_cache_core::{
    BackendKind, CacheEntry, CacheError, CacheOptions, CacheStats, KeyValueStore, Result,
    StoreHealth,
};

use super::bus::{InvalidationBus, TierEvent};
use super::circuit_breaker::CircuitBreaker;
use crate::memory::MemoryStore;

/// A process-local [`MemoryStore`] in front of a shared remote store
///
/// The remote tier is authoritative. Reads fall through to it on an L1 miss
/// and backfill L1 with the remote entry's own timestamps, so both copies
/// expire together. While the [`CircuitBreaker`] is open reads and writes
/// degrade to L1 only, and deletes fail: the remote copy would otherwise
/// outlive the invalidation.
///
/// Several instances sharing one remote tier must be joined by an
/// [`InvalidationBus`] (see [`with_bus`](Self::with_bus)); each then drops
/// its local copies of keys the others wrote or deleted.
pub struct TieredStore<L2> {
    l1: MemoryStore,
    l2: L2,
    circuit_breaker: CircuitBreaker,
    sync: Option<TierSync>,
}

struct TierSync {
    bus: Arc<dyn InvalidationBus>,
    events: Mutex<broadcast::Receiver<TierEvent>>,
    origin: u64,
}

impl<L2> TieredStore<L2> {
    /// Create a new tiered store for a single instance
    pub fn new(l1: MemoryStore, l2: L2, circuit_breaker: CircuitBreaker) -> Self {
        Self {
            l1,
            l2,
            circuit_breaker,
            sync: None,
        }
    }

    /// Keep L1 coherent with other instances publishing on `bus`
    pub fn with_bus(mut self, bus: impl InvalidationBus) -> Self {
        let events = Mutex::new(bus.subscribe());
        self.sync = Some(TierSync {
            bus: Arc::new(bus),
            events,
            origin: rand::random(),
        });
        self
    }

    /// The local tier
    pub fn local(&self) -> &MemoryStore {
        &self.l1
    }

    /// The remote tier
    pub fn remote(&self) -> &L2 {
        &self.l2
    }

    /// The breaker guarding the remote tier
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }
}

impl<L2: KeyValueStore> TieredStore<L2> {
    /// Run `op` against L2 if the breaker allows it
    ///
    /// `None` means the call was short-circuited.
    async fn call_remote<'a, T, F>(&'a self, op: impl FnOnce(&'a L2) -> F) -> Option<Result<T>>
    where
        F: std::future::Future<Output = Result<T>> + 'a,
    {
        if !self.circuit_breaker.allow_request() {
            return None;
        }
        let result = op(&self.l2).await;
        self.circuit_breaker.observe(&result);
        Some(result)
    }

    /// Drop L1 copies of keys other instances changed
    async fn apply_peer_events(&self) -> Result<()> {
        let Some(sync) = &self.sync else {
            return Ok(());
        };

        let mut stale_keys = Vec::new();
        let mut clear = false;
        {
            let mut events = sync.events.lock();
            loop {
                match events.try_recv() {
                    Ok(event) if event.origin() == sync.origin => {}
                    Ok(TierEvent::Keys { keys, .. }) => stale_keys.extend(keys),
                    Ok(TierEvent::Clear { .. }) => clear = true,
                    Err(TryRecvError::Lagged(missed)) => {
                        // Unknown keys changed: nothing local can be trusted
                        warn!(target: "tale_cache", missed, "Tier invalidations lagged, dropping local tier");
                        clear = true;
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }
        }

        if clear {
            return self.l1.clear().await;
        }
        if !stale_keys.is_empty() {
            let dropped = self.l1.delete_many(&stale_keys).await?;
            debug!(target: "tale_cache", keys = stale_keys.len(), dropped, "Applied peer invalidations");
        }
        Ok(())
    }

    /// Tell the other instances; a failure only leaves their copies to expire
    async fn announce(&self, event: impl FnOnce(u64) -> TierEvent) {
        let Some(sync) = &self.sync else {
            return;
        };
        if let Err(e) = sync.bus.publish(&event(sync.origin)).await {
            warn!(target: "tale_cache", error = %e, "Tier invalidation not published");
        }
    }
}

fn remote_unavailable() -> CacheError {
    CacheError::Unavailable("remote tier circuit open".to_string())
}

#[async_trait]
impl<L2: KeyValueStore> KeyValueStore for TieredStore<L2> {
    fn kind(&self) -> BackendKind {
        self.l2.kind()
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry<Vec<u8>>>> {
        self.apply_peer_events().await?;
        if let Some(entry) = self.l1.get(key).await? {
            return Ok(Some(entry));
        }

        match self.call_remote(|l2| l2.get(key)).await {
            // Circuit open: degraded mode, L1 only
            None => Ok(None),
            Some(Ok(Some(entry))) => {
                self.l1.insert_entry(key, entry.clone());
                Ok(Some(entry))
            }
            Some(other) => other,
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, options: &CacheOptions) -> Result<()> {
        match self.call_remote(|l2| l2.set(key, value.clone(), options)).await {
            Some(Err(e)) => {
                // Remote holds the old value; do not let L1 disagree with it
                self.l1.delete(key).await?;
                Err(e)
            }
            Some(Ok(())) => {
                self.l1.set(key, value, options).await?;
                self.announce(|origin| TierEvent::Keys {
                    origin,
                    keys: vec![key.to_string()],
                })
                .await;
                Ok(())
            }
            None => self.l1.set(key, value, options).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let local = self.l1.delete(key).await?;
        let remote = self
            .call_remote(|l2| l2.delete(key))
            .await
            .unwrap_or_else(|| Err(remote_unavailable()))?;
        self.announce(|origin| TierEvent::Keys {
            origin,
            keys: vec![key.to_string()],
        })
        .await;
        Ok(remote || local)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        let local = self.l1.delete_many(keys).await?;
        let remote = self
            .call_remote(|l2| l2.delete_many(keys))
            .await
            .unwrap_or_else(|| Err(remote_unavailable()))?;
        self.announce(|origin| TierEvent::Keys {
            origin,
            keys: keys.to_vec(),
        })
        .await;
        Ok(remote.max(local))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.apply_peer_events().await?;
        if self.l1.exists(key).await? {
            return Ok(true);
        }
        self.call_remote(|l2| l2.exists(key)).await.unwrap_or(Ok(false))
    }

    async fn scan_by_pattern(&self, pattern: &str) -> Result<Vec<String>> {
        self.apply_peer_events().await?;
        // Union: a backfilled L1 copy must be found even if L2 already lost it
        let mut keys = self.l1.scan_by_pattern(pattern).await?;
        if let Some(remote) = self.call_remote(|l2| l2.scan_by_pattern(pattern)).await {
            keys.extend(remote?);
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn clear(&self) -> Result<()> {
        self.l1.clear().await?;
        self.call_remote(|l2| l2.clear())
            .await
            .unwrap_or_else(|| Err(remote_unavailable()))?;
        self.announce(|origin| TierEvent::Clear { origin }).await;
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        match self.call_remote(|l2| l2.len()).await {
            Some(result) => result,
            None => self.l1.len().await,
        }
    }

    async fn increment(&self, counter: &str) -> Result<u64> {
        self.call_remote(|l2| l2.increment(counter))
            .await
            .unwrap_or_else(|| Err(remote_unavailable()))
    }

    async fn counter(&self, counter: &str) -> Result<u64> {
        self.call_remote(|l2| l2.counter(counter))
            .await
            .unwrap_or_else(|| Err(remote_unavailable()))
    }

    async fn stats(&self) -> Result<CacheStats> {
        let mut stats = self.l1.stats().await?;
        let remote = match self.call_remote(|l2| l2.stats()).await {
            Some(Ok(stats)) => stats,
            Some(Err(e)) => {
                warn!(target: "tale_cache", error = %e, "Remote tier stats unavailable");
                CacheStats::default()
            }
            None => CacheStats::default(),
        };
        stats.merge(&remote);
        Ok(stats)
    }

    async fn health_check(&self) -> StoreHealth {
        let health = self.l2.health_check().await;
        if !health.reachable {
            debug!(target: "tale_cache", "Remote tier unreachable, serving from L1");
        }
        health
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConfig;
    use crate::multitier::LocalBus;
    use parking_lot::RwLock;
    use std::sync::Arc;
    use std::time::Duration;
    use tale_cache_core::{CacheError, CacheOpts, ManualClock};

    fn tiered(clock: &ManualClock) -> (MemoryStore, MemoryStore, TieredStore<MemoryStore>) {
        let l1 = MemoryStore::with_clock(MemoryConfig::default(), clock.shared());
        let l2 = MemoryStore::with_clock(MemoryConfig::default(), clock.shared());
        let store = TieredStore::new(
            l1.clone(),
            l2.clone(),
            CircuitBreaker::new(3, Duration::from_secs(10)),
        );
        (l1, l2, store)
    }

    #[tokio::test]
    async fn test_write_through_and_backfill() {
        let clock = ManualClock::new(0);
        let (l1, l2, store) = tiered(&clock);
        let opts = CacheOpts::new().ttl_secs(60).build();

        store.set("key", b"val".to_vec(), &opts).await.unwrap();
        assert!(l1.exists("key").await.unwrap());
        assert!(l2.exists("key").await.unwrap());

        l1.delete("key").await.unwrap();
        clock.advance(Duration::from_secs(10));

        let entry = store.get("key").await.unwrap().unwrap();
        assert_eq!(entry.value, b"val".to_vec());

        // Backfilled copy keeps the remote write time
        let local = l1.get("key").await.unwrap().unwrap();
        assert_eq!(local.stored_at, 0);
    }

    #[tokio::test]
    async fn test_pattern_scan_covers_both_tiers() {
        let clock = ManualClock::new(0);
        let (l1, l2, store) = tiered(&clock);
        let opts = CacheOptions::default();

        l1.set("users:local", b"1".to_vec(), &opts).await.unwrap();
        l2.set("users:remote", b"2".to_vec(), &opts).await.unwrap();
        store.set("stats:p1", b"3".to_vec(), &opts).await.unwrap();

        let keys = store.scan_by_pattern("users:*").await.unwrap();
        assert_eq!(keys, vec!["users:local", "users:remote"]);
    }

    #[derive(Clone)]
    struct FailingStore {
        calls: Arc<RwLock<usize>>,
    }

    impl FailingStore {
        fn fail<T>(&self) -> Result<T> {
            *self.calls.write() += 1;
            Err(CacheError::Connection("refused".to_string()))
        }
    }

    #[async_trait]
    impl KeyValueStore for FailingStore {
        fn kind(&self) -> BackendKind {
            BackendKind::External
        }
        async fn get(&self, _key: &str) -> Result<Option<CacheEntry<Vec<u8>>>> {
            self.fail()
        }
        async fn set(&self, _key: &str, _value: Vec<u8>, _opts: &CacheOptions) -> Result<()> {
            self.fail()
        }
        async fn delete(&self, _key: &str) -> Result<bool> {
            self.fail()
        }
        async fn delete_many(&self, _keys: &[String]) -> Result<u64> {
            self.fail()
        }
        async fn exists(&self, _key: &str) -> Result<bool> {
            self.fail()
        }
        async fn scan_by_pattern(&self, _pattern: &str) -> Result<Vec<String>> {
            self.fail()
        }
        async fn clear(&self) -> Result<()> {
            self.fail()
        }
        async fn len(&self) -> Result<usize> {
            self.fail()
        }
        async fn increment(&self, _counter: &str) -> Result<u64> {
            self.fail()
        }
        async fn counter(&self, _counter: &str) -> Result<u64> {
            self.fail()
        }
        async fn stats(&self) -> Result<CacheStats> {
            self.fail()
        }
        async fn health_check(&self) -> StoreHealth {
            StoreHealth::unreachable(BackendKind::External, 0)
        }
    }

    #[tokio::test]
    async fn test_circuit_breaker_short_circuits_remote() {
        let calls = Arc::new(RwLock::new(0));
        let l2 = FailingStore {
            calls: calls.clone(),
        };
        let store = TieredStore::new(
            MemoryStore::with_defaults(),
            l2,
            CircuitBreaker::new(2, Duration::from_secs(60)),
        );

        assert!(store.get("key").await.is_err());
        assert!(store.get("key").await.is_err());
        assert!(store.circuit_breaker().is_open());

        // Open: degraded to L1, remote not called
        assert!(store.get("key").await.unwrap().is_none());
        assert_eq!(*calls.read(), 2);

        store
            .set("key", b"v".to_vec(), &CacheOptions::default())
            .await
            .unwrap();
        assert_eq!(*calls.read(), 2);
        assert!(store.get("key").await.unwrap().is_some());

        // The remote copy would survive, so the delete must not succeed
        assert!(matches!(
            store.delete("key").await,
            Err(CacheError::Unavailable(_))
        ));
        assert!(store.delete_many(&["key".to_string()]).await.is_err());
        assert!(store.clear().await.is_err());
        assert_eq!(*calls.read(), 2);
    }

    fn instance(l2: &MemoryStore, bus: &LocalBus) -> TieredStore<MemoryStore> {
        TieredStore::new(
            MemoryStore::with_defaults(),
            l2.clone(),
            CircuitBreaker::new(3, Duration::from_secs(10)),
        )
        .with_bus(bus.clone())
    }

    #[tokio::test]
    async fn test_invalidation_reaches_other_instances() {
        let shared = MemoryStore::with_defaults();
        let bus = LocalBus::default();
        let a = instance(&shared, &bus);
        let b = instance(&shared, &bus);
        let opts = CacheOpts::new().ttl_secs(60).build();

        a.set("users:all", b"old".to_vec(), &opts).await.unwrap();
        assert_eq!(b.get("users:all").await.unwrap().unwrap().value, b"old".to_vec());
        assert!(b.local().exists("users:all").await.unwrap());

        let keys = a.scan_by_pattern("users:*").await.unwrap();
        assert_eq!(a.delete_many(&keys).await.unwrap(), 1);

        assert!(b.get("users:all").await.unwrap().is_none());
        assert!(!b.local().exists("users:all").await.unwrap());
    }

    #[tokio::test]
    async fn test_writes_replace_peer_copies() {
        let shared = MemoryStore::with_defaults();
        let bus = LocalBus::default();
        let a = instance(&shared, &bus);
        let b = instance(&shared, &bus);
        let opts = CacheOpts::new().ttl_secs(60).build();

        a.set("stats:all", b"1".to_vec(), &opts).await.unwrap();
        b.get("stats:all").await.unwrap();

        a.set("stats:all", b"2".to_vec(), &opts).await.unwrap();
        assert_eq!(b.get("stats:all").await.unwrap().unwrap().value, b"2".to_vec());

        // Own events do not evict own copies
        assert!(a.local().exists("stats:all").await.unwrap());
        a.get("stats:all").await.unwrap();
        assert!(a.local().exists("stats:all").await.unwrap());

        b.clear().await.unwrap();
        assert!(a.get("stats:all").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lagging_instance_drops_local_tier() {
        let shared = MemoryStore::with_defaults();
        let bus = LocalBus::new(2);
        let a = instance(&shared, &bus);
        let b = instance(&shared, &bus);
        let opts = CacheOpts::new().ttl_secs(60).build();

        b.local().set("stories:all", b"cached".to_vec(), &opts).await.unwrap();
        for i in 0..5 {
            a.set(&format!("stats:{}", i), b"x".to_vec(), &opts).await.unwrap();
        }

        b.get("stats:0").await.unwrap();
        assert!(!b.local().exists("stories:all").await.unwrap());
    }

    #[tokio::test]
    async fn test_counters_live_in_remote_tier() {
        let shared = MemoryStore::with_defaults();
        let bus = LocalBus::default();
        let a = instance(&shared, &bus);
        let b = instance(&shared, &bus);

        assert_eq!(a.increment("generation").await.unwrap(), 1);
        assert_eq!(b.increment("generation").await.unwrap(), 2);
        assert_eq!(a.counter("generation").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_remote_write_drops_local_copy() {
        let l1 = MemoryStore::with_defaults();
        let store = TieredStore::new(
            l1.clone(),
            FailingStore {
                calls: Arc::new(RwLock::new(0)),
            },
            CircuitBreaker::new(10, Duration::from_secs(60)),
        );
        let opts = CacheOptions::default();

        l1.set("key", b"old".to_vec(), &opts).await.unwrap();
        assert!(store.set("key", b"new".to_vec(), &opts).await.is_err());
        assert!(!l1.exists("key").await.unwrap());
    }
}
