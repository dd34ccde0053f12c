//! In-flight request deduplication
//!
//! Identical requests issued while one is outstanding share its outcome,
//! and a successful outcome is replayed for a short TTL afterwards.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use tale_cache_core::{Clock, SharedClock, SystemClock};

mod client;
pub use client::{DedupClient, Transport};

/// Failure of a deduplicated operation, delivered to every awaiter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The server answered with a non-success status
    #[error("request to {url} failed with status {status}")]
    Status { status: u16, url: String },

    /// The request never produced a response
    #[error("transport error: {0}")]
    Transport(String),

    /// The caller running the request went away before it settled
    #[error("in-flight request abandoned")]
    Abandoned,
}

/// Configuration for RequestDeduplicator
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// How long a successful result is replayed
    pub result_ttl: Duration,
    /// Interval of the background result sweep
    pub sweep_interval: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            result_ttl: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// The identity of a request for deduplication
///
/// Two requests are the same iff method, URL and serialized body match
/// exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchRequest {
    pub method: String,
    pub url: String,
    pub body: Option<String>,
}

impl FetchRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new("POST", url).with_body(body)
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// `METHOD:url:body`
    pub fn dedup_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.method,
            self.url,
            self.body.as_deref().unwrap_or("")
        )
    }
}

type Outcome<V> = Result<V, FetchError>;

struct StoredResult<V> {
    value: V,
    stored_at: u64,
    ttl: Duration,
}

impl<V> StoredResult<V> {
    fn is_valid_at(&self, now: u64) -> bool {
        Duration::from_millis(now.saturating_sub(self.stored_at)) < self.ttl
    }
}

/// Both maps sit behind one lock so that check-and-register and
/// settle-and-cache are each a single critical section
struct State<V> {
    pending: HashMap<String, broadcast::Sender<Outcome<V>>>,
    results: HashMap<String, StoredResult<V>>,
}

enum Role<V> {
    Cached(V),
    Follower(broadcast::Receiver<Outcome<V>>),
    Leader(broadcast::Sender<Outcome<V>>),
}

/// Collapses identical concurrent requests into one execution
///
/// Cloning creates a new handle to the same maps.
pub struct RequestDeduplicator<V> {
    state: Arc<Mutex<State<V>>>,
    config: DedupConfig,
    clock: SharedClock,
}

impl<V> Clone for RequestDeduplicator<V> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            config: self.config.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<V: Clone> Default for RequestDeduplicator<V> {
    fn default() -> Self {
        Self::new(DedupConfig::default())
    }
}

impl<V: Clone> RequestDeduplicator<V> {
    pub fn new(config: DedupConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    pub fn with_clock(config: DedupConfig, clock: SharedClock) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                pending: HashMap::new(),
                results: HashMap::new(),
            })),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Run `op` for `request` unless an identical request is in flight or
    /// recently succeeded
    ///
    /// `ttl` overrides how long a success is replayed.
    pub async fn fetch<F, Fut>(
        &self,
        request: &FetchRequest,
        ttl: Option<Duration>,
        op: F,
    ) -> Outcome<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome<V>>,
    {
        self.fetch_keyed(&request.dedup_key(), ttl, op).await
    }

    /// [`fetch`](Self::fetch) with a caller-built key
    pub async fn fetch_keyed<F, Fut>(&self, key: &str, ttl: Option<Duration>, op: F) -> Outcome<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome<V>>,
    {
        let ttl = ttl.unwrap_or(self.config.result_ttl);

        // Check and register without yielding
        let role = {
            let mut state = self.state.lock();
            let now = self.clock.now_millis();

            let replay = match state.results.get(key) {
                Some(stored) if stored.is_valid_at(now) => Some(stored.value.clone()),
                _ => None,
            };

            if let Some(value) = replay {
                Role::Cached(value)
            } else {
                state.results.remove(key);
                let follower = state.pending.get(key).map(|tx| tx.subscribe());
                match follower {
                    Some(rx) => Role::Follower(rx),
                    None => {
                        let (tx, _rx) = broadcast::channel(1);
                        state.pending.insert(key.to_string(), tx.clone());
                        Role::Leader(tx)
                    }
                }
            }
        };

        match role {
            Role::Cached(value) => {
                trace!(target: "tale_cache", key = %key, "Replaying deduplicated result");
                Ok(value)
            }
            Role::Follower(mut rx) => {
                trace!(target: "tale_cache", key = %key, "Joining in-flight request");
                rx.recv().await.unwrap_or(Err(FetchError::Abandoned))
            }
            Role::Leader(tx) => {
                let guard = PendingGuard {
                    state: &self.state,
                    key,
                    tx: &tx,
                };
                let outcome = op().await;

                {
                    let mut state = self.state.lock();
                    if state
                        .pending
                        .get(key)
                        .is_some_and(|registered| registered.same_channel(&tx))
                    {
                        state.pending.remove(key);
                    }
                    if let Ok(value) = &outcome {
                        state.results.insert(
                            key.to_string(),
                            StoredResult {
                                value: value.clone(),
                                stored_at: self.clock.now_millis(),
                                ttl,
                            },
                        );
                    }
                }
                drop(guard);

                if tx.receiver_count() > 0 {
                    let _ = tx.send(outcome.clone());
                }
                outcome
            }
        }
    }

    /// Drop replayable results past their TTL, returning how many
    ///
    /// In-flight requests are untouched; they leave when they settle.
    pub fn clear_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        let before = state.results.len();
        state.results.retain(|_, stored| stored.is_valid_at(now));
        let removed = before - state.results.len();
        if removed > 0 {
            debug!(target: "tale_cache", removed, "Swept expired deduplicated results");
        }
        removed
    }

    /// Forget everything, in flight or settled
    ///
    /// Requests already running still deliver to their current awaiters.
    pub fn clear_all(&self) {
        let mut state = self.state.lock();
        state.pending.clear();
        state.results.clear();
    }

    /// Number of requests currently in flight
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Number of results held for replay, including expired ones not yet
    /// swept
    pub fn cached_count(&self) -> usize {
        self.state.lock().results.len()
    }
}

impl<V: Clone + Send + 'static> RequestDeduplicator<V> {
    /// Run [`clear_expired`](Self::clear_expired) every
    /// `config.sweep_interval` until the handle is aborted
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let dedup = self.clone();
        let period = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                dedup.clear_expired();
            }
        })
    }
}

/// Removes the leader's pending entry if the leader is dropped mid-flight
struct PendingGuard<'a, V> {
    state: &'a Mutex<State<V>>,
    key: &'a str,
    tx: &'a broadcast::Sender<Outcome<V>>,
}

impl<V> Drop for PendingGuard<'_, V> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if state
            .pending
            .get(self.key)
            .is_some_and(|registered| registered.same_channel(self.tx))
        {
            state.pending.remove(self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tale_cache_core::ManualClock;

    fn dedup_at(clock: &ManualClock) -> RequestDeduplicator<String> {
        RequestDeduplicator::with_clock(DedupConfig::default(), clock.shared())
    }

    #[test]
    fn test_dedup_key() {
        assert_eq!(FetchRequest::get("/api/x").dedup_key(), "GET:/api/x:");
        assert_eq!(
            FetchRequest::post("/api/x", r#"{"a":1}"#).dedup_key(),
            r#"POST:/api/x:{"a":1}"#
        );
        assert_ne!(
            FetchRequest::get("/api/x?page=1").dedup_key(),
            FetchRequest::get("/api/x?page=2").dedup_key()
        );
    }

    #[tokio::test]
    async fn test_back_to_back_calls_share_one_execution() {
        let dedup: RequestDeduplicator<String> = RequestDeduplicator::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let request = FetchRequest::get("/api/x");

        let call = || {
            let calls = calls.clone();
            let dedup = dedup.clone();
            let request = request.clone();
            async move {
                dedup
                    .fetch(&request, None, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok("payload".to_string())
                    })
                    .await
            }
        };

        let (a, b, c) = tokio::join!(call(), call(), call());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a, Ok("payload".to_string()));
        assert_eq!(b, a);
        assert_eq!(c, a);
        assert_eq!(dedup.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_reaches_all_and_is_not_cached() {
        let dedup: RequestDeduplicator<String> = RequestDeduplicator::default();
        let request = FetchRequest::get("/api/down");
        let failure = FetchError::Status {
            status: 503,
            url: "/api/down".into(),
        };

        let call = || {
            let dedup = dedup.clone();
            let request = request.clone();
            let failure = failure.clone();
            async move {
                dedup
                    .fetch(&request, None, || async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Err(failure)
                    })
                    .await
            }
        };

        let (a, b) = tokio::join!(call(), call());
        assert_eq!(a, Err(failure.clone()));
        assert_eq!(b, Err(failure));
        assert_eq!(dedup.cached_count(), 0);

        // Next call starts a fresh attempt
        let retried = dedup
            .fetch(&request, None, || async { Ok("back".to_string()) })
            .await;
        assert_eq!(retried, Ok("back".to_string()));
    }

    #[tokio::test]
    async fn test_result_replayed_until_ttl() {
        let clock = ManualClock::new(0);
        let dedup = dedup_at(&clock);
        let request = FetchRequest::get("/api/stats");

        let first = dedup
            .fetch(&request, None, || async { Ok("v1".to_string()) })
            .await;
        assert_eq!(first, Ok("v1".to_string()));

        clock.advance(Duration::from_secs(29));
        let replayed = dedup
            .fetch(&request, None, || async { Ok("v2".to_string()) })
            .await;
        assert_eq!(replayed, Ok("v1".to_string()));

        clock.advance(Duration::from_secs(1));
        let refreshed = dedup
            .fetch(&request, None, || async { Ok("v2".to_string()) })
            .await;
        assert_eq!(refreshed, Ok("v2".to_string()));
    }

    #[tokio::test]
    async fn test_custom_ttl() {
        let clock = ManualClock::new(0);
        let dedup = dedup_at(&clock);
        let request = FetchRequest::get("/api/x");

        dedup
            .fetch(&request, Some(Duration::from_secs(1)), || async {
                Ok("short".to_string())
            })
            .await
            .unwrap();
        clock.advance(Duration::from_secs(2));

        let next = dedup
            .fetch(&request, None, || async { Ok("fresh".to_string()) })
            .await;
        assert_eq!(next, Ok("fresh".to_string()));
    }

    #[tokio::test]
    async fn test_clear_expired_only_touches_results() {
        let clock = ManualClock::new(0);
        let dedup = dedup_at(&clock);

        for url in ["/a", "/b"] {
            dedup
                .fetch(&FetchRequest::get(url), None, || async { Ok(url.to_string()) })
                .await
                .unwrap();
        }
        dedup
            .fetch(&FetchRequest::get("/c"), Some(Duration::from_secs(600)), || async {
                Ok("c".to_string())
            })
            .await
            .unwrap();

        clock.advance(Duration::from_secs(31));
        assert_eq!(dedup.clear_expired(), 2);
        assert_eq!(dedup.cached_count(), 1);
    }

    #[tokio::test]
    async fn test_clear_all() {
        let dedup: RequestDeduplicator<String> = RequestDeduplicator::default();
        dedup
            .fetch(&FetchRequest::get("/a"), None, || async { Ok("a".to_string()) })
            .await
            .unwrap();
        assert_eq!(dedup.cached_count(), 1);

        dedup.clear_all();
        assert_eq!(dedup.cached_count(), 0);
        assert_eq!(dedup.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_leader() {
        let dedup: RequestDeduplicator<String> = RequestDeduplicator::default();
        let request = FetchRequest::get("/slow");

        let leader = {
            let dedup = dedup.clone();
            let request = request.clone();
            tokio::spawn(async move {
                dedup
                    .fetch(&request, None, || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok("never".to_string())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let follower = {
            let dedup = dedup.clone();
            let request = request.clone();
            tokio::spawn(async move {
                dedup
                    .fetch(&request, None, || async { Ok("unused".to_string()) })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        leader.abort();
        assert_eq!(follower.await.unwrap(), Err(FetchError::Abandoned));
        assert_eq!(dedup.pending_count(), 0);
    }
}
