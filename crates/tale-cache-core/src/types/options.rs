//! Write options and builder

use std::time::Duration;

/// Options applied when writing an entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOptions {
    /// Time-to-live
    pub ttl: Option<Duration>,
    /// Retention past TTL for stale fallback
    pub stale_grace: Option<Duration>,
}

impl CacheOptions {
    /// Physical lifetime a store should give the entry
    pub fn retention(&self) -> Option<Duration> {
        self.ttl
            .map(|ttl| ttl + self.stale_grace.unwrap_or_default())
    }
}

/// Builder for CacheOptions with fluent API
#[derive(Debug, Clone, Default)]
pub struct CacheOpts(CacheOptions);

impl CacheOpts {
    /// Create new options builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set TTL
    pub fn ttl(mut self, duration: Duration) -> Self {
        self.0.ttl = Some(duration);
        self
    }

    /// Set TTL in milliseconds
    pub fn ttl_millis(self, millis: u64) -> Self {
        self.ttl(Duration::from_millis(millis))
    }

    /// Set TTL in seconds
    pub fn ttl_secs(self, seconds: u64) -> Self {
        self.ttl(Duration::from_secs(seconds))
    }

    /// Set TTL in minutes
    pub fn ttl_mins(self, minutes: u64) -> Self {
        self.ttl(Duration::from_secs(minutes * 60))
    }

    /// Keep the entry for `duration` past its TTL as a stale fallback
    pub fn stale_grace(mut self, duration: Duration) -> Self {
        self.0.stale_grace = Some(duration);
        self
    }

    /// Build the options
    pub fn build(self) -> CacheOptions {
        self.0
    }
}

impl From<CacheOpts> for CacheOptions {
    fn from(opts: CacheOpts) -> Self {
        opts.0
    }
}

impl From<Duration> for CacheOptions {
    fn from(ttl: Duration) -> Self {
        CacheOptions {
            ttl: Some(ttl),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_default() {
        let opts = CacheOpts::new().build();
        assert!(opts.ttl.is_none());
        assert!(opts.retention().is_none());
    }

    #[test]
    fn test_builder_units() {
        assert_eq!(
            CacheOpts::new().ttl_mins(5).build().ttl,
            Some(Duration::from_millis(300_000))
        );
        assert_eq!(
            CacheOpts::new().ttl_millis(1_500).build().ttl,
            Some(Duration::from_millis(1_500))
        );
    }

    #[test]
    fn test_retention_includes_grace() {
        let opts = CacheOpts::new()
            .ttl_secs(60)
            .stale_grace(Duration::from_secs(30))
            .build();
        assert_eq!(opts.retention(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_from_duration() {
        let opts: CacheOptions = Duration::from_secs(300).into();
        assert_eq!(opts.ttl, Some(Duration::from_secs(300)));
        assert!(opts.stale_grace.is_none());
    }
}
