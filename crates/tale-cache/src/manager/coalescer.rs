use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

use tale_cache_core::{CacheError, Result};

type Inflight<V> = Arc<DashMap<String, broadcast::Sender<Result<V>>>>;

/// Runs at most one computation per key at a time
///
/// The first caller for a key becomes the leader and runs the computation;
/// callers arriving while it runs wait for the leader's outcome instead of
/// starting their own.
pub(crate) struct Coalescer<V> {
    inflight: Inflight<V>,
}

impl<V> Clone for Coalescer<V> {
    fn clone(&self) -> Self {
        Self {
            inflight: self.inflight.clone(),
        }
    }
}

impl<V: Clone> Coalescer<V> {
    pub(crate) fn new() -> Self {
        Self {
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// Execute `f` for `key`, or join the execution already running
    pub(crate) async fn do_request<F, Fut>(&self, key: &str, f: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        // Join or register while holding the shard lock
        let action = match self.inflight.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(o) => Ok(o.get().subscribe()),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                let (tx, _rx) = broadcast::channel(1);
                v.insert(tx.clone());
                Err(tx)
            }
        };

        match action {
            Ok(mut rx) => match rx.recv().await {
                Ok(res) => res,
                // Leader was cancelled before settling
                Err(_) => Err(CacheError::Internal(
                    "in-flight computation abandoned".to_string(),
                )),
            },
            Err(tx) => {
                let guard = InflightGuard {
                    inflight: &self.inflight,
                    key,
                    tx: &tx,
                };
                let result = f().await;
                drop(guard);

                if tx.receiver_count() > 0 {
                    let _ = tx.send(result.clone());
                }
                result
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn inflight_count(&self) -> usize {
        self.inflight.len()
    }
}

/// Deregisters the leader on settlement or cancellation
///
/// Only removes the entry it registered; a later leader for the same key is
/// left alone.
struct InflightGuard<'a, V> {
    inflight: &'a Inflight<V>,
    key: &'a str,
    tx: &'a broadcast::Sender<Result<V>>,
}

impl<V> Drop for InflightGuard<'_, V> {
    fn drop(&mut self) {
        self.inflight
            .remove_if(self.key, |_, registered| registered.same_channel(self.tx));
    }
}
