//! Memory/queue-depth admission control. Process-wide counters behind atomics;
//! memory is sampled on an interval by a background task rather than computed per
//! request, per the explicit "memory estimation is sampled" requirement.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct BackpressureGate {
    in_flight: AtomicI64,
    queue_depth: AtomicI64,
    memory_rss_estimate_mb: AtomicU64,
    max_concurrent: i64,
    memory_soft_limit_mb: f64,
    queue_depth_warning_threshold: i64,
}

pub struct Admission {
    pub admitted: bool,
    pub retry_after_seconds: u64,
}

/// RAII guard decrementing `in_flight` on drop, preventing the double-counting of
/// completion that would otherwise be possible under early return/panic.
pub struct InFlightGuard<'a> {
    gate: &'a BackpressureGate,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BackpressureGate {
    pub fn new(max_concurrent: usize, memory_soft_limit_mb: f64) -> Self {
        BackpressureGate {
            in_flight: AtomicI64::new(0),
            queue_depth: AtomicI64::new(0),
            memory_rss_estimate_mb: AtomicU64::new(0),
            max_concurrent: max_concurrent as i64,
            memory_soft_limit_mb,
            queue_depth_warning_threshold: max_concurrent as i64 * 2,
        }
    }

    /// Read-then-check admission (over-admission by one under contention is
    /// acceptable). On admission, returns a guard that must be held for the request's
    /// duration and decrements `in_flight` on drop.
    pub fn try_admit(&self) -> (Admission, Option<InFlightGuard<'_>>) {
        let in_flight = self.in_flight.load(Ordering::SeqCst);
        let memory_mb = f64::from_bits(self.memory_rss_estimate_mb.load(Ordering::SeqCst));

        if in_flight >= self.max_concurrent {
            return (Admission { admitted: false, retry_after_seconds: 1 }, None);
        }
        if memory_mb >= self.memory_soft_limit_mb {
            return (Admission { admitted: false, retry_after_seconds: 2 }, None);
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let queue_depth = self.queue_depth.load(Ordering::SeqCst);
        if queue_depth > self.queue_depth_warning_threshold {
            log::warn!("queue_depth {queue_depth} crossed warning threshold");
        }
        (Admission { admitted: true, retry_after_seconds: 0 }, Some(InFlightGuard { gate: self }))
    }

    pub fn set_memory_estimate_mb(&self, mb: f64) {
        self.memory_rss_estimate_mb.store(mb.to_bits(), Ordering::SeqCst);
    }

    pub fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Spawns a background task that periodically refreshes the sampled memory estimate
/// by reading `/proc/self/status` (Linux). On non-Linux or read failure the estimate
/// is left unchanged, matching the memory sampling being advisory rather than exact.
pub fn spawn_memory_sampler(gate: Arc<BackpressureGate>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Some(mb) = sample_rss_mb() {
                gate.set_memory_estimate_mb(mb);
            }
        }
    })
}

#[cfg(target_os = "linux")]
fn sample_rss_mb() -> Option<f64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: f64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
            return Some(kb / 1024.0);
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn sample_rss_mb() -> Option<f64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_while_under_max_concurrent() {
        let gate = BackpressureGate::new(2, 1024.0);
        let (a1, _guard1) = gate.try_admit();
        let (a2, _guard2) = gate.try_admit();
        assert!(a1.admitted);
        assert!(a2.admitted);
    }

    #[test]
    fn rejects_at_max_concurrent() {
        let gate = BackpressureGate::new(1, 1024.0);
        let (a1, _guard1) = gate.try_admit();
        assert!(a1.admitted);
        let (a2, _guard2) = gate.try_admit();
        assert!(!a2.admitted);
        assert!(a2.retry_after_seconds > 0);
    }

    #[test]
    fn guard_drop_releases_in_flight_slot() {
        let gate = BackpressureGate::new(1, 1024.0);
        {
            let (a1, _guard1) = gate.try_admit();
            assert!(a1.admitted);
            assert_eq!(gate.in_flight(), 1);
        }
        assert_eq!(gate.in_flight(), 0);
        let (a2, _guard2) = gate.try_admit();
        assert!(a2.admitted);
    }

    #[test]
    fn rejects_when_memory_estimate_exceeds_soft_limit() {
        let gate = BackpressureGate::new(50, 1000.0);
        gate.set_memory_estimate_mb(999.0);
        assert!(gate.try_admit().0.admitted);
        gate.set_memory_estimate_mb(1001.0);
        assert!(!gate.try_admit().0.admitted);
    }
}
