//! Lookup outcomes

use std::time::Duration;

use crate::CacheError;

/// Outcome of reading from a store through the fail-soft boundary
///
/// Callers treat [`Lookup::BackendError`] exactly like [`Lookup::Miss`]; the
/// variant exists so the failure is visible (and logged) where it happens.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    /// Value present and valid
    Found(T),
    /// Nothing stored, or expired
    Miss,
    /// The store failed; counts as a miss
    BackendError(CacheError),
}

impl<T> Lookup<T> {
    /// Check if this is a hit
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    /// Miss or backend error
    pub fn is_miss(&self) -> bool {
        !self.is_found()
    }

    /// Check if the store failed
    pub fn is_backend_error(&self) -> bool {
        matches!(self, Lookup::BackendError(_))
    }

    /// Collapse to an `Option`, discarding the failure detail
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::Miss | Lookup::BackendError(_) => None,
        }
    }

    /// Map the value if present
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(value) => Lookup::Found(f(value)),
            Lookup::Miss => Lookup::Miss,
            Lookup::BackendError(e) => Lookup::BackendError(e),
        }
    }
}

impl<T> From<crate::Result<Option<T>>> for Lookup<T> {
    fn from(result: crate::Result<Option<T>>) -> Self {
        match result {
            Ok(Some(value)) => Lookup::Found(value),
            Ok(None) => Lookup::Miss,
            Err(e) => Lookup::BackendError(e),
        }
    }
}

/// Whether a returned value is within its TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    /// Past TTL, served only because recomputation failed
    Stale,
}

/// A value handed back by the cache manager
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    /// Time since the value was computed
    pub age: Duration,
    pub freshness: Freshness,
}

impl<T> Cached<T> {
    pub fn fresh(value: T, age: Duration) -> Self {
        Self {
            value,
            age,
            freshness: Freshness::Fresh,
        }
    }

    pub fn stale(value: T, age: Duration) -> Self {
        Self {
            value,
            age,
            freshness: Freshness::Stale,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.freshness == Freshness::Stale
    }

    /// Age in whole milliseconds
    pub fn age_ms(&self) -> u64 {
        self.age.as_millis() as u64
    }
}
