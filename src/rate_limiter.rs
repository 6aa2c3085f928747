//! Per-client token-bucket admission. Same `DashMap`-singleton-registry idiom
//! as the circuit breaker and the reference crate's HTTP client pool; per-key state
//! is additionally behind a `Mutex` so refill-then-decrement is atomic under
//! concurrent access from the same client key.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Mutex;

struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    tokens: f64,
    last_refill_at: DateTime<Utc>,
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_second: f64) -> Self {
        TokenBucket { capacity, refill_per_second, tokens: capacity, last_refill_at: Utc::now() }
    }

    /// Refills based on elapsed time, then attempts to decrement by one token.
    /// Returns `Ok(())` if admitted, `Err(retry_after_seconds)` otherwise.
    fn try_admit(&mut self) -> Result<(), u64> {
        let now = Utc::now();
        let elapsed_seconds = (now - self.last_refill_at).num_milliseconds().max(0) as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed_seconds * self.refill_per_second).min(self.capacity);
        self.last_refill_at = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            let seconds_needed = if self.refill_per_second > 0.0 {
                (deficit / self.refill_per_second).ceil().max(1.0) as u64
            } else {
                60
            };
            Err(seconds_needed)
        }
    }

    fn remaining(&self) -> u32 {
        self.tokens.floor().max(0.0) as u32
    }
}

pub struct AdmissionResult {
    pub admitted: bool,
    pub retry_after_seconds: u64,
    pub remaining: u32,
    pub limit: u32,
}

/// Process-wide registry of per-client-key buckets.
pub struct RateLimiter {
    buckets: DashMap<String, Mutex<TokenBucket>>,
    capacity: f64,
    refill_per_second: f64,
}

impl RateLimiter {
    /// `burst` is the bucket capacity; `rpm` is the refill rate expressed per minute,
    /// matching the `RATE_LIMIT_RPM`/`RATE_LIMIT_BURST` env vars.
    pub fn new(burst: f64, rpm: f64) -> Self {
        RateLimiter { buckets: DashMap::new(), capacity: burst, refill_per_second: rpm / 60.0 }
    }

    pub fn check(&self, client_key: &str) -> AdmissionResult {
        let entry = self
            .buckets
            .entry(client_key.to_string())
            .or_insert_with(|| Mutex::new(TokenBucket::new(self.capacity, self.refill_per_second)));
        let mut bucket = entry.lock().unwrap();
        match bucket.try_admit() {
            Ok(()) => AdmissionResult {
                admitted: true,
                retry_after_seconds: 0,
                remaining: bucket.remaining(),
                limit: self.capacity as u32,
            },
            Err(retry_after_seconds) => AdmissionResult {
                admitted: false,
                retry_after_seconds,
                remaining: bucket.remaining(),
                limit: self.capacity as u32,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_equals_capacity_admits_first_n_rejects_next() {
        let limiter = RateLimiter::new(3.0, 60.0);
        for _ in 0..3 {
            assert!(limiter.check("client-a").admitted);
        }
        let fourth = limiter.check("client-a");
        assert!(!fourth.admitted);
        assert!(fourth.retry_after_seconds > 0);
    }

    #[test]
    fn distinct_client_keys_have_independent_buckets() {
        let limiter = RateLimiter::new(1.0, 60.0);
        assert!(limiter.check("client-a").admitted);
        assert!(!limiter.check("client-a").admitted);
        assert!(limiter.check("client-b").admitted);
    }

    #[test]
    fn bucket_refill_never_exceeds_capacity() {
        let mut bucket = TokenBucket::new(5.0, 100.0);
        bucket.last_refill_at = Utc::now() - chrono::Duration::seconds(3600);
        let _ = bucket.try_admit();
        assert!(bucket.tokens <= 5.0);
    }

    #[test]
    fn monotonicity_at_least_one_token_removed_between_two_admitted_requests() {
        let limiter = RateLimiter::new(10.0, 0.0);
        let before = limiter.check("client-a").remaining;
        let after = limiter.check("client-a").remaining;
        assert!(after <= before);
        assert!(before - after >= 1);
    }
}
