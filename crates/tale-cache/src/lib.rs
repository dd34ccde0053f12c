//! tale-cache: server-side caching for expensive aggregate queries
//!
//! # Features
//!
//! - **Deterministic resource keys** with per-family TTLs
//! - **Pattern invalidation** over Redis or the in-process store
//! - **Fail-soft reads and writes**: a store outage only costs latency
//! - **Coalesced read-through** with an optional serve-stale fallback
//! - **Request deduplication** for identical in-flight calls
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tale_cache::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = AnyStore::connect(&StoreConfig::from_env()).await;
//!     let cache = CacheManager::new(store);
//!
//!     let key = ResourceClass::Stats.key().resource("dashboard").param("page", 1);
//!     let stats = cache
//!         .get_or_compute(key, ResourceClass::Stats, || async {
//!             Ok::<_, std::io::Error>(serde_json::json!({ "total": 5 }))
//!         })
//!         .await;
//!
//!     if let Ok(cached) = stats {
//!         println!("{} ({} ms old)", cached.value, cached.age_ms());
//!     }
//!
//!     // A user changed: every cached user listing goes
//!     cache.invalidate_users().await;
//! }
//! ```

pub mod dedup;
mod manager;
mod resource;
mod signal;

// Re-export core
pub use tale_cache_core::*;

// Re-export storage
pub use tale_cache_storage::{AnyStore, FailSoft, MemoryConfig, MemoryStore, StoreConfig};

#[cfg(feature = "redis")]
pub use tale_cache_storage::{RedisConfig, RedisStore};

#[cfg(feature = "multitier")]
pub use tale_cache_storage::{CircuitBreaker, InvalidationBus, LocalBus, TierEvent, TieredStore};

#[cfg(all(feature = "redis", feature = "multitier"))]
pub use tale_cache_storage::RedisBus;

pub use dedup::{DedupClient, DedupConfig, FetchError, FetchRequest, RequestDeduplicator, Transport};
pub use manager::{CacheManager, CacheManagerConfig, ManagerStats, ResourceScope};
pub use resource::{ResourceClass, ResourceKey, ResourcePolicy};
pub use signal::{GENERATION_COUNTER, InvalidationEvent, InvalidationSignal, instructions_for};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        AnyStore, CacheError, CacheKey, CacheManager, CacheManagerConfig, CacheOpts, Cached,
        Freshness, InvalidationSignal, JsonSerializer, MemoryConfig, MemoryStore, ResourceClass,
        ResourceKey, Result, Serializer, StoreConfig,
    };

    #[cfg(feature = "redis")]
    pub use crate::{RedisConfig, RedisStore};
}
