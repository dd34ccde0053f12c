//! Periodic check for server-raised invalidations

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use tale_cache_core::{Result, SignalResponse};

use crate::cache::ClientStatsCache;
use crate::storage::PersistentStorage;

/// Where the poller asks whether cached data must be dropped
///
/// Usually an HTTP call to the server's invalidation-signal endpoint.
#[async_trait]
pub trait SignalSource: Send + Sync + 'static {
    /// Ask for invalidations raised after generation `since`
    async fn fetch_signal(&self, since: Option<u64>) -> Result<SignalResponse>;
}

/// Clears a [`ClientStatsCache`] whenever the server says so
///
/// Eventually consistent: cached data may outlive a server-side
/// invalidation by up to one poll interval.
pub struct InvalidationPoller<Src, S>
where
    Src: SignalSource,
    S: PersistentStorage,
{
    source: Arc<Src>,
    cache: Arc<ClientStatsCache<S>>,
    interval: Duration,
    last_generation: Arc<Mutex<Option<u64>>>,
}

impl<Src, S> Clone for InvalidationPoller<Src, S>
where
    Src: SignalSource,
    S: PersistentStorage,
{
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            cache: self.cache.clone(),
            interval: self.interval,
            last_generation: self.last_generation.clone(),
        }
    }
}

impl<Src, S> InvalidationPoller<Src, S>
where
    Src: SignalSource,
    S: PersistentStorage,
{
    /// Poll at the cache's configured interval
    pub fn new(source: Src, cache: Arc<ClientStatsCache<S>>) -> Self {
        let interval = cache.config().poll_interval;
        Self {
            source: Arc::new(source),
            cache,
            interval,
            last_generation: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The last generation the server reported
    pub fn last_generation(&self) -> Option<u64> {
        *self.last_generation.lock()
    }

    /// Ask once, clearing the cache if instructed
    ///
    /// A failed or unsuccessful poll counts as "no invalidation". Returns
    /// whether the cache was cleared.
    pub async fn poll_once(&self) -> bool {
        let since = self.last_generation();
        let response = match self.source.fetch_signal(since).await {
            Ok(response) if response.success => response,
            Ok(_) => {
                debug!(target: "tale_cache", "Invalidation signal unsuccessful, ignoring");
                return false;
            }
            Err(e) => {
                debug!(target: "tale_cache", error = %e, "Invalidation signal unreachable");
                return false;
            }
        };

        *self.last_generation.lock() = Some(response.generation);
        if !response.should_clear() {
            return false;
        }
        let removed = self.cache.clear_all_cache();
        info!(target: "tale_cache", generation = response.generation, removed, "Cleared client cache on server signal");
        true
    }
}

impl<Src, S> InvalidationPoller<Src, S>
where
    Src: SignalSource,
    S: PersistentStorage + 'static,
{
    /// Run [`poll_once`](Self::poll_once) every interval until the handle
    /// is aborted
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(&self) -> JoinHandle<()> {
        let poller = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poller.interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                poller.poll_once().await;
            }
        })
    }
}
