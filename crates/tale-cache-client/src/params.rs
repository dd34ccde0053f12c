use std::fmt::Display;

use tale_cache_core::{CacheKey, CompositeKey, encode_key_component};

/// Identifies one cached response: a resource plus its query parameters
///
/// Parameters are sorted, so insertion order never changes the key.
///
/// ```
/// use tale_cache_client::CacheParams;
///
/// let params = CacheParams::new("stories").param("status", "draft").param("page", 2);
/// assert_eq!(params.cache_key(), "stories:page=2:status=draft");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheParams {
    resource: String,
    inner: CompositeKey,
}

impl CacheParams {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            inner: CompositeKey::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Display) -> Self {
        self.inner = self.inner.param(name, value);
        self
    }

    /// Add a parameter only when present
    pub fn param_opt<V: Display>(mut self, name: impl Into<String>, value: Option<V>) -> Self {
        self.inner = self.inner.param_opt(name, value);
        self
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The key recorded inside the persisted entry
    pub fn cache_key(&self) -> String {
        let resource = encode_key_component(&self.resource);
        let params = self.inner.cache_key();
        if params.is_empty() {
            resource
        } else {
            format!("{}:{}", resource, params)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_resource() {
        assert_eq!(CacheParams::new("dashboard").cache_key(), "dashboard");
    }

    #[test]
    fn test_params_order_independent() {
        let a = CacheParams::new("users").param("page", 1).param("role", "admin");
        let b = CacheParams::new("users").param("role", "admin").param("page", 1);
        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), CacheParams::new("users").param("page", 2).cache_key());
    }

    #[test]
    fn test_separator_values_keep_keys_distinct() {
        let search = CacheParams::new("stories").param("q", "x:r=1");
        let filtered = CacheParams::new("stories").param("q", "x").param("r", 1);
        assert_ne!(search.cache_key(), filtered.cache_key());

        let nested = CacheParams::new("users:page=1");
        let paged = CacheParams::new("users").param("page", 1);
        assert_ne!(nested.cache_key(), paged.cache_key());
    }

    #[test]
    fn test_absent_param_skipped() {
        let key = CacheParams::new("stories").param_opt("status", None::<&str>);
        assert_eq!(key.cache_key(), "stories");
    }
}
