//! Cache key trait and implementations

use std::collections::BTreeMap;
use std::fmt::Display;

/// Trait for types that can be used as cache keys
pub trait CacheKey: Send + Sync {
    /// Generate the key string
    fn cache_key(&self) -> String;

    /// Optional namespace for the key
    fn namespace(&self) -> Option<&str> {
        None
    }

    /// Get the full key including namespace
    fn full_key(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{}:{}", ns, self.cache_key()),
            None => self.cache_key(),
        }
    }
}

impl CacheKey for String {
    fn cache_key(&self) -> String {
        self.clone()
    }
}

impl CacheKey for &str {
    fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl CacheKey for &String {
    fn cache_key(&self) -> String {
        (*self).clone()
    }
}

impl<T1: Display + Send + Sync, T2: Display + Send + Sync> CacheKey for (T1, T2) {
    fn cache_key(&self) -> String {
        format!("{}:{}", self.0, self.1)
    }
}

impl<T1: Display + Send + Sync, T2: Display + Send + Sync, T3: Display + Send + Sync> CacheKey
    for (T1, T2, T3)
{
    fn cache_key(&self) -> String {
        format!("{}:{}:{}", self.0, self.1, self.2)
    }
}

/// Percent-encode the key separators (`:`, `=`) and `%` itself
///
/// Applied to every component of a [`CompositeKey`], so a value containing a
/// separator can never be mistaken for two components.
pub fn encode_key_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '=' => out.push_str("%3D"),
            _ => out.push(c),
        }
    }
    out
}

/// Composite key builder
///
/// Positional parts keep their order; named parameters are sorted by name so
/// that the same parameter set always produces the same key regardless of
/// the order callers supplied it in. Parts, names and values are encoded
/// with [`encode_key_component`] before joining.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositeKey {
    parts: Vec<String>,
    params: BTreeMap<String, String>,
    ns: Option<String>,
}

impl CompositeKey {
    /// Create a new composite key builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the namespace
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.ns = Some(ns.into());
        self
    }

    /// Add a positional part
    pub fn part(mut self, part: impl Display) -> Self {
        self.parts.push(part.to_string());
        self
    }

    /// Add a named parameter, rendered as `name=value`
    ///
    /// Setting the same name twice keeps the last value.
    pub fn param(mut self, name: impl Into<String>, value: impl Display) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    /// Add a parameter only when present
    pub fn param_opt<V: Display>(self, name: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.param(name, v),
            None => self,
        }
    }

    /// Get the namespace
    pub fn get_namespace(&self) -> Option<&str> {
        self.ns.as_deref()
    }
}

impl CacheKey for CompositeKey {
    fn cache_key(&self) -> String {
        self.parts
            .iter()
            .map(|part| encode_key_component(part))
            .chain(self.params.iter().map(|(k, v)| {
                format!("{}={}", encode_key_component(k), encode_key_component(v))
            }))
            .collect::<Vec<_>>()
            .join(":")
    }

    fn namespace(&self) -> Option<&str> {
        self.ns.as_deref()
    }
}
