//! tale-cache-storage: Storage backends for tale-cache
//!
//! The in-process [`MemoryStore`] is always available and is the fallback
//! whenever no external store is configured or reachable. [`AnyStore`]
//! hides that choice from callers, and [`FailSoft`] turns every backend
//! failure into a logged miss or skipped write.

mod any;
mod fail_soft;
pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "multitier")]
pub mod multitier;

pub use self::any::{AnyStore, StoreConfig};
pub use self::fail_soft::FailSoft;
pub use self::memory::{MemoryConfig, MemoryStore};

#[cfg(feature = "redis")]
pub use self::redis::{RedisConfig, RedisStore};

#[cfg(feature = "multitier")]
pub use self::multitier::{CircuitBreaker, InvalidationBus, LocalBus, TierEvent, TieredStore};

#[cfg(all(feature = "redis", feature = "multitier"))]
pub use self::multitier::RedisBus;
