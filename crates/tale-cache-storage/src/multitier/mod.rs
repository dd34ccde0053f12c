//! Local memory tier in front of a remote store

mod backend;
mod bus;
mod circuit_breaker;

pub use backend::TieredStore;
pub use bus::{InvalidationBus, LocalBus, TierEvent};
pub use circuit_breaker::CircuitBreaker;

#[cfg(feature = "redis")]
pub use bus::RedisBus;
