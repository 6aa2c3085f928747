//! Per-upstream failure-isolation FSM. Registry follows the reference crate's
//! `Lazy<DashMap<...>>` singleton idiom (`http_client_pool.rs`), generalized from a
//! client-pool cache to a process-wide `CircuitBreaker` cache keyed by provider name.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<DateTime<Utc>>,
    last_state_change_at: DateTime<Utc>,
    half_open_probe_in_flight: bool,
}

/// A single upstream's breaker. Transitions are serialized behind a `Mutex`; reads
/// that would also transition state (HALF_OPEN admission) go through `try_acquire`.
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<Inner>,
}

/// What a caller should do after an `execute()`/`try_acquire()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        CircuitBreaker {
            failure_threshold,
            recovery_timeout,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
                last_state_change_at: Utc::now(),
                half_open_probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Atomically reads and, if necessary, transitions state to honor HALF_OPEN
    /// admission: exactly one probe is let through per recovery window.
    pub fn try_acquire(&self) -> Admission {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::HalfOpen => {
                if inner.half_open_probe_in_flight {
                    Admission::Rejected
                } else {
                    inner.half_open_probe_in_flight = true;
                    Admission::Allowed
                }
            }
            CircuitState::Open => {
                let elapsed_since_open = Utc::now() - inner.last_state_change_at;
                let recovery = chrono::Duration::from_std(self.recovery_timeout)
                    .unwrap_or_else(|_| chrono::Duration::seconds(30));
                if elapsed_since_open >= recovery {
                    inner.state = CircuitState::HalfOpen;
                    inner.last_state_change_at = Utc::now();
                    inner.half_open_probe_in_flight = true;
                    Admission::Allowed
                } else {
                    Admission::Rejected
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures = 0;
        inner.half_open_probe_in_flight = false;
        if inner.state != CircuitState::Closed {
            inner.state = CircuitState::Closed;
            inner.last_state_change_at = Utc::now();
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.half_open_probe_in_flight = false;
        inner.last_failure_at = Some(Utc::now());

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.last_state_change_at = Utc::now();
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.last_state_change_at = Utc::now();
                }
            }
            CircuitState::Open => {}
        }
    }
}

/// Process-wide registry of breakers, one per upstream provider name. Mirrors the
/// reference crate's `Lazy<DashMap<...>>` connection-pool idiom but caches FSMs
/// instead of `reqwest::Client`s.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, std::sync::Arc<CircuitBreaker>>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl CircuitBreakerRegistry {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        CircuitBreakerRegistry { breakers: DashMap::new(), failure_threshold, recovery_timeout }
    }

    /// Returns the breaker for `provider`, creating it on first use.
    pub fn breaker_for(&self, provider: &str) -> std::sync::Arc<CircuitBreaker> {
        self.breakers
            .entry(provider.to_string())
            .or_insert_with(|| {
                std::sync::Arc::new(CircuitBreaker::new(self.failure_threshold, self.recovery_timeout))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_allows_until_threshold_reached() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        for _ in 0..2 {
            assert_eq!(breaker.try_acquire(), Admission::Allowed);
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.try_acquire(), Admission::Allowed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn open_rejects_before_recovery_timeout() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.try_acquire(), Admission::Rejected);
    }

    #[test]
    fn half_open_allows_exactly_one_probe() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record_failure();
        assert_eq!(breaker.try_acquire(), Admission::Allowed);
        assert_eq!(breaker.try_acquire(), Admission::Rejected);
    }

    #[test]
    fn half_open_success_closes_and_resets_counters() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record_failure();
        assert_eq!(breaker.try_acquire(), Admission::Allowed);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.try_acquire(), Admission::Allowed);
    }

    #[test]
    fn half_open_failure_reopens_and_restarts_timer() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record_failure();
        assert_eq!(breaker.try_acquire(), Admission::Allowed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn registry_returns_same_breaker_for_same_provider() {
        let registry = CircuitBreakerRegistry::new(5, Duration::from_secs(30));
        let a = registry.breaker_for("openai");
        let b = registry.breaker_for("openai");
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    }
}
