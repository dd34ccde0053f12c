//! Cache entry type

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A cached entry with its freshness metadata
///
/// Timestamps are epoch milliseconds taken from the store's [`Clock`], so an
/// entry written by one process can be judged by another.
///
/// [`Clock`]: crate::Clock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// The cached value
    pub value: T,
    /// When the entry was written
    pub stored_at: u64,
    /// Time-to-live; `None` never expires
    pub ttl: Option<Duration>,
    /// How long past `ttl` the entry is retained as a stale fallback
    #[serde(default)]
    pub stale_grace: Option<Duration>,
    /// Number of times read
    #[serde(default)]
    pub access_count: u64,
    /// Size of the value in bytes
    #[serde(default)]
    pub size: usize,
}

impl<T> CacheEntry<T> {
    /// Create a new entry stored at `now`
    pub fn new(value: T, size: usize, now: u64) -> Self {
        Self {
            value,
            stored_at: now,
            ttl: None,
            stale_grace: None,
            access_count: 0,
            size,
        }
    }

    /// Create entry with TTL
    pub fn with_ttl(value: T, size: usize, now: u64, ttl: Duration) -> Self {
        let mut entry = Self::new(value, size, now);
        entry.ttl = Some(ttl);
        entry
    }

    /// Time elapsed since the write
    pub fn age_at(&self, now: u64) -> Duration {
        Duration::from_millis(now.saturating_sub(self.stored_at))
    }

    /// An entry is valid iff `now - stored_at < ttl`
    pub fn is_expired_at(&self, now: u64) -> bool {
        match self.ttl {
            Some(ttl) => self.age_at(now) >= ttl,
            None => false,
        }
    }

    /// Expired, but still inside the stale-grace window
    pub fn is_stale_at(&self, now: u64) -> bool {
        if !self.is_expired_at(now) {
            return false;
        }
        match (self.ttl, self.stale_grace) {
            (Some(ttl), Some(grace)) => self.age_at(now) < ttl + grace,
            _ => false,
        }
    }

    /// Whether a store should still physically keep the entry
    pub fn is_retained_at(&self, now: u64) -> bool {
        !self.is_expired_at(now) || self.is_stale_at(now)
    }

    /// Remaining TTL, `None` when unbounded
    pub fn ttl_remaining_at(&self, now: u64) -> Option<Duration> {
        self.ttl.map(|ttl| ttl.saturating_sub(self.age_at(now)))
    }

    /// Total time the entry must be kept, TTL plus grace
    pub fn retention(&self) -> Option<Duration> {
        self.ttl.map(|ttl| ttl + self.stale_grace.unwrap_or_default())
    }

    /// Replace the value, keeping the metadata
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheEntry<U> {
        CacheEntry {
            value: f(self.value),
            stored_at: self.stored_at,
            ttl: self.ttl,
            stale_grace: self.stale_grace,
            access_count: self.access_count,
            size: self.size,
        }
    }
}
