//! Resource families, their TTL policy and key construction

use std::fmt::{self, Display};
use std::time::Duration;

use tale_cache_core::{CacheKey, CompositeKey};

/// A family of cached resources that is invalidated as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    /// Dashboard and aggregate statistics
    Stats,
    /// User listings
    Users,
    /// Story listings
    Stories,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 3] = [Self::Stats, Self::Users, Self::Stories];

    /// Key prefix shared by every entry of the family
    pub fn family(&self) -> &'static str {
        match self {
            ResourceClass::Stats => "stats",
            ResourceClass::Users => "users",
            ResourceClass::Stories => "stories",
        }
    }

    /// Glob selecting every variant of the family
    pub fn pattern(&self) -> String {
        format!("{}:*", self.family())
    }

    /// Built-in TTL
    pub fn default_ttl(&self) -> Duration {
        match self {
            ResourceClass::Stats => Duration::from_secs(5 * 60),
            ResourceClass::Users => Duration::from_secs(10 * 60),
            ResourceClass::Stories => Duration::from_secs(15 * 60),
        }
    }

    /// Key builder for this family
    pub fn key(self) -> ResourceKey {
        ResourceKey::new(self)
    }
}

impl Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.family())
    }
}

/// TTL per resource class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePolicy {
    pub stats_ttl: Duration,
    pub users_ttl: Duration,
    pub stories_ttl: Duration,
}

impl Default for ResourcePolicy {
    fn default() -> Self {
        Self {
            stats_ttl: ResourceClass::Stats.default_ttl(),
            users_ttl: ResourceClass::Users.default_ttl(),
            stories_ttl: ResourceClass::Stories.default_ttl(),
        }
    }
}

impl ResourcePolicy {
    pub fn ttl_for(&self, class: ResourceClass) -> Duration {
        match class {
            ResourceClass::Stats => self.stats_ttl,
            ResourceClass::Users => self.users_ttl,
            ResourceClass::Stories => self.stories_ttl,
        }
    }

    /// Override one class
    pub fn with_ttl(mut self, class: ResourceClass, ttl: Duration) -> Self {
        match class {
            ResourceClass::Stats => self.stats_ttl = ttl,
            ResourceClass::Users => self.users_ttl = ttl,
            ResourceClass::Stories => self.stories_ttl = ttl,
        }
        self
    }
}

/// Deterministic key for one variant of a resource
///
/// Renders as `<family>[:<resource>]:<name>=<value>...` with parameters
/// sorted by name, or `<family>[:<resource>]:all` when there are none. The
/// same parameter set always yields the same key; different sets never
/// collide, since separators inside names and values are percent-encoded.
///
/// ```
/// use tale_cache::{CacheKey, ResourceClass};
///
/// let key = ResourceClass::Stories.key().param("status", "published").param("page", 2);
/// assert_eq!(key.full_key(), "stories:page=2:status=published");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceKey {
    class: ResourceClass,
    inner: CompositeKey,
    has_params: bool,
}

impl ResourceKey {
    pub fn new(class: ResourceClass) -> Self {
        Self {
            class,
            inner: CompositeKey::new().with_namespace(class.family()),
            has_params: false,
        }
    }

    /// Name a specific resource within the family, e.g. `dashboard`
    pub fn resource(mut self, name: impl Display) -> Self {
        self.inner = self.inner.part(name);
        self
    }

    /// Add a query parameter
    pub fn param(mut self, name: impl Into<String>, value: impl Display) -> Self {
        self.inner = self.inner.param(name, value);
        self.has_params = true;
        self
    }

    /// Add a query parameter only when present
    pub fn param_opt<V: Display>(self, name: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.param(name, v),
            None => self,
        }
    }

    pub fn class(&self) -> ResourceClass {
        self.class
    }
}

impl CacheKey for ResourceKey {
    fn cache_key(&self) -> String {
        let key = self.inner.cache_key();
        match (key.is_empty(), self.has_params) {
            (true, _) => "all".to_string(),
            (false, true) => key,
            (false, false) => format!("{}:all", key),
        }
    }

    fn namespace(&self) -> Option<&str> {
        Some(self.class.family())
    }
}
