use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tale_cache_core::CacheError;

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Closed,
    Open(Instant),
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: State,
    failures: u32,
}

/// Stops calling a failing remote tier for `reset_timeout`
///
/// After `failure_threshold` consecutive backend failures the breaker opens.
/// Once the timeout has elapsed requests are let through again as trial requests;
/// one success closes it, one failure reopens it.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    inner: Arc<RwLock<Inner>>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                state: State::Closed,
                failures: 0,
            })),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
        }
    }

    /// Check if we can execute a request
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.write();
        match inner.state {
            State::Closed | State::HalfOpen => true,
            State::Open(opened_at) => {
                if opened_at.elapsed() >= self.reset_timeout {
                    inner.state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Whether requests are currently being short-circuited
    pub fn is_open(&self) -> bool {
        matches!(self.inner.read().state, State::Open(_))
    }

    /// Report success
    pub fn report_success(&self) {
        let mut inner = self.inner.write();
        if !matches!(inner.state, State::Open(_)) {
            inner.state = State::Closed;
            inner.failures = 0;
        }
    }

    /// Report failure
    pub fn report_failure(&self) {
        let mut inner = self.inner.write();
        match inner.state {
            State::Closed => {
                inner.failures += 1;
                if inner.failures >= self.failure_threshold {
                    inner.state = State::Open(Instant::now());
                }
            }
            State::HalfOpen => {
                inner.state = State::Open(Instant::now());
            }
            State::Open(_) => {}
        }
    }

    /// Record the outcome of a remote call
    ///
    /// Only transport-level failures count against the breaker; a value that
    /// fails to decode says nothing about the remote's health.
    pub fn observe<T>(&self, result: &Result<T, CacheError>) {
        match result {
            Ok(_) => self.report_success(),
            Err(e) if e.is_backend_failure() => self.report_failure(),
            Err(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        assert!(breaker.allow_request());

        breaker.report_failure();
        assert!(!breaker.is_open());
        breaker.report_failure();
        assert!(breaker.is_open());
        assert!(!breaker.allow_request());
    }

    #[test]
    fn test_success_resets_count() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.report_failure();
        breaker.report_success();
        breaker.report_failure();
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_half_open_trial_request() {
        let breaker = CircuitBreaker::new(1, Duration::ZERO);
        breaker.report_failure();
        assert!(breaker.is_open());

        // Timeout elapsed: one trial allowed
        assert!(breaker.allow_request());
        breaker.report_success();
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_decode_errors_do_not_trip() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.observe::<()>(&Err(CacheError::Deserialization("bad".into())));
        assert!(!breaker.is_open());
        breaker.observe::<()>(&Err(CacheError::Connection("refused".into())));
        assert!(breaker.is_open());
    }
}
