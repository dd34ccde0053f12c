//! Server-side invalidation signal
//!
//! Every invalidation performed through the [`CacheManager`] raises a
//! generation counter kept in the store, so every instance sharing that
//! store answers client polls from the same number. Clients that keep their
//! own copies poll with the last generation they saw and drop everything
//! when it moved. Events are also broadcast to in-process subscribers.
//!
//! [`CacheManager`]: crate::CacheManager

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

use tale_cache_core::SignalResponse;

/// Name of the store counter holding the invalidation generation
pub const GENERATION_COUNTER: &str = "invalidation-generation";

/// Something was removed from the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationEvent {
    /// A single key
    Key(String),
    /// Every key matching a glob
    Pattern(String),
    /// Everything
    Clear,
}

/// Broadcast of invalidation events plus the last generation seen here
///
/// The authoritative generation lives in the store; this only mirrors the
/// highest value this process raised or read. Cloning creates a new handle
/// to the same signal.
#[derive(Debug, Clone)]
pub struct InvalidationSignal {
    observed: Arc<AtomicU64>,
    sender: broadcast::Sender<InvalidationEvent>,
}

impl Default for InvalidationSignal {
    fn default() -> Self {
        Self::new(100)
    }
}

impl InvalidationSignal {
    /// Create a signal buffering up to `capacity` events per slow subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            observed: Arc::new(AtomicU64::new(0)),
            sender,
        }
    }

    /// Highest store generation this process has seen
    pub fn generation(&self) -> u64 {
        self.observed.load(Ordering::Acquire)
    }

    /// Remember a generation read from or raised in the store
    pub fn observe(&self, generation: u64) {
        self.observed.fetch_max(generation, Ordering::AcqRel);
    }

    /// Broadcast an invalidation
    ///
    /// `generation` is the store counter after the increment, `None` when
    /// the store could not raise it.
    pub fn raise(&self, event: InvalidationEvent, generation: Option<u64>) {
        if let Some(generation) = generation {
            self.observe(generation);
        }
        debug!(target: "tale_cache", generation = ?generation, event = ?event, "Invalidation signal raised");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Receive future events
    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.sender.subscribe()
    }
}

/// Answer a client poll given the store's `current` generation
///
/// `since` is the generation the client last saw. A client without one only
/// learns the current generation; it has nothing cached that could be older
/// than a signal it never knew about. Any difference clears, so a counter
/// that went backwards (a wiped store) also drops client copies.
pub fn instructions_for(current: u64, since: Option<u64>) -> SignalResponse {
    let clear_all = since.is_some_and(|seen| seen != current);
    SignalResponse::new(clear_all, current)
}
