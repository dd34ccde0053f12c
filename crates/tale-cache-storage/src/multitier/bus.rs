//! Cross-instance invalidation of local tiers
//!
//! Every [`TieredStore`](super::TieredStore) that writes or deletes through
//! the shared tier publishes the touched keys here. Each instance drops its
//! own L1 copies of keys other instances touched, so a write or invalidation
//! on one instance is never shadowed by a stale local copy on another.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use tale_cache_core::{CacheError, Result};

/// Keys some instance changed in the shared tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TierEvent {
    /// These keys were written or deleted
    Keys { origin: u64, keys: Vec<String> },
    /// The shared tier was cleared
    Clear { origin: u64 },
}

impl TierEvent {
    /// The instance that published the event
    pub fn origin(&self) -> u64 {
        match self {
            TierEvent::Keys { origin, .. } | TierEvent::Clear { origin } => *origin,
        }
    }

    /// Serialize event to its wire format
    pub fn to_message(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    /// Parse event from its wire format
    pub fn from_message(msg: &str) -> Option<Self> {
        serde_json::from_str(msg).ok()
    }
}

/// Transport for [`TierEvent`]s between instances
#[async_trait]
pub trait InvalidationBus: Send + Sync + 'static {
    /// Deliver `event` to every subscriber, including other processes
    async fn publish(&self, event: &TierEvent) -> Result<()>;

    /// Receive events published from now on
    fn subscribe(&self) -> broadcast::Receiver<TierEvent>;
}

/// In-process bus
///
/// Connects tiered stores living in the same process. Cloning creates a new
/// handle to the same channel.
#[derive(Debug, Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<TierEvent>,
}

impl LocalBus {
    /// Create a bus buffering up to `capacity` events per slow subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl InvalidationBus for LocalBus {
    async fn publish(&self, event: &TierEvent) -> Result<()> {
        // No subscribers is fine
        let _ = self.tx.send(event.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TierEvent> {
        self.tx.subscribe()
    }
}

#[cfg(feature = "redis")]
pub use self::redis_bus::RedisBus;

#[cfg(feature = "redis")]
mod redis_bus {
    use super::*;
    use futures_util::StreamExt;
    use redis::aio::MultiplexedConnection;
    use tokio::task::JoinHandle;
    use tracing::{debug, warn};

    /// Redis Pub/Sub bus shared by every instance on the same server
    ///
    /// A background task forwards channel messages into a local broadcast;
    /// it stops when the bus is dropped.
    pub struct RedisBus {
        conn: MultiplexedConnection,
        channel: String,
        tx: broadcast::Sender<TierEvent>,
        listener: JoinHandle<()>,
    }

    impl RedisBus {
        /// Subscribe to `channel` on the server at `url`
        ///
        /// Must be called from within a Tokio runtime.
        pub async fn connect(url: &str, channel: impl Into<String>) -> Result<Self> {
            let channel = channel.into();
            let client =
                redis::Client::open(url).map_err(|e| CacheError::Connection(e.to_string()))?;
            let conn = client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| CacheError::Connection(e.to_string()))?;

            let mut pubsub = client
                .get_async_pubsub()
                .await
                .map_err(|e| CacheError::Connection(e.to_string()))?;
            pubsub
                .subscribe(&channel)
                .await
                .map_err(|e| CacheError::Connection(e.to_string()))?;

            let (tx, _) = broadcast::channel(1024);
            let forward = tx.clone();
            let listener = tokio::spawn(async move {
                let mut messages = pubsub.into_on_message();
                while let Some(msg) = messages.next().await {
                    let payload: String = match msg.get_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(target: "tale_cache", error = %e, "Unreadable tier invalidation message");
                            continue;
                        }
                    };
                    match TierEvent::from_message(&payload) {
                        Some(event) => {
                            let _ = forward.send(event);
                        }
                        None => {
                            debug!(target: "tale_cache", payload = %payload, "Ignoring foreign tier message")
                        }
                    }
                }
                warn!(target: "tale_cache", "Tier invalidation subscription ended");
            });

            Ok(Self {
                conn,
                channel,
                tx,
                listener,
            })
        }
    }

    #[async_trait]
    impl InvalidationBus for RedisBus {
        async fn publish(&self, event: &TierEvent) -> Result<()> {
            let mut conn = self.conn.clone();
            redis::cmd("PUBLISH")
                .arg(&self.channel)
                .arg(event.to_message()?)
                .query_async::<u64>(&mut conn)
                .await
                .map(|_| ())
                .map_err(|e| CacheError::Backend(e.to_string()))
        }

        fn subscribe(&self) -> broadcast::Receiver<TierEvent> {
            self.tx.subscribe()
        }
    }

    impl Drop for RedisBus {
        fn drop(&mut self) {
            self.listener.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = TierEvent::Keys {
            origin: 7,
            keys: vec!["users:all".into(), "stats:q=a%3Ab".into()],
        };
        let msg = event.to_message().unwrap();
        assert_eq!(TierEvent::from_message(&msg), Some(event));

        let clear = TierEvent::Clear { origin: 9 };
        assert_eq!(
            TierEvent::from_message(&clear.to_message().unwrap()).map(|e| e.origin()),
            Some(9)
        );
        assert_eq!(TierEvent::from_message("clear"), None);
    }

    #[tokio::test]
    async fn test_local_bus_fans_out() {
        let bus = LocalBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.clone().subscribe();

        bus.publish(&TierEvent::Clear { origin: 1 }).await.unwrap();

        assert_eq!(first.recv().await.unwrap(), TierEvent::Clear { origin: 1 });
        assert_eq!(second.recv().await.unwrap(), TierEvent::Clear { origin: 1 });
    }
}
