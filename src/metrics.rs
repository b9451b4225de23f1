use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::response::StatsResponse;

#[derive(Debug)]
struct Counters {
    total_requests: AtomicU64,
    allowed_requests: AtomicU64,
    denied_requests: AtomicU64,
    failed_requests: AtomicU64,
    started_at: Instant,
}

/// Process-local decision counters reported by `/admin/stats`.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    counters: Arc<Counters>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Counters {
                total_requests: AtomicU64::new(0),
                allowed_requests: AtomicU64::new(0),
                denied_requests: AtomicU64::new(0),
                failed_requests: AtomicU64::new(0),
                started_at: Instant::now(),
            }),
        }
    }

    pub fn record_decision(&self, allowed: bool) {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        if allowed {
            self.counters.allowed_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.denied_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A check that failed before a decision was made. Counted as total and
    /// failed, never as allowed.
    pub fn record_failure(&self) {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        self.counters.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsResponse {
        StatsResponse {
            requests_total: self.counters.total_requests.load(Ordering::Relaxed),
            requests_allowed: self.counters.allowed_requests.load(Ordering::Relaxed),
            requests_denied: self.counters.denied_requests.load(Ordering::Relaxed),
            requests_failed: self.counters.failed_requests.load(Ordering::Relaxed),
            uptime_seconds: self.counters.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_decisions_and_failures() {
        let metrics = MetricsCollector::new();
        metrics.record_decision(true);
        metrics.record_decision(true);
        metrics.record_decision(false);
        metrics.record_failure();

        let stats = metrics.snapshot();
        assert_eq!(stats.requests_total, 4);
        assert_eq!(stats.requests_allowed, 2);
        assert_eq!(stats.requests_denied, 1);
        assert_eq!(stats.requests_failed, 1);
        assert!(stats.uptime_seconds >= 0.0);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = MetricsCollector::new();
        let clone = metrics.clone();
        clone.record_decision(false);
        assert_eq!(metrics.snapshot().requests_denied, 1);
    }
}
