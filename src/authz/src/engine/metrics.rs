//! Decision and reload counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Point-in-time copy of the engine counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineMetrics {
    /// Total number of authorization checks
    pub total_requests: u64,

    /// Checks that evaluated to `true`
    pub allowed_decisions: u64,

    /// Checks that evaluated to `false`, unknown policies included
    pub denied_decisions: u64,

    /// Checks whose policy name matched nothing
    pub unknown_policies: u64,

    /// Checks that ended in an error
    pub error_count: u64,

    pub reloads_succeeded: u64,
    pub reloads_failed: u64,

    /// Mean evaluation latency
    pub avg_latency_us: f64,
}

impl EngineMetrics {
    /// Share of decided checks that were allowed
    pub fn allow_rate(&self) -> f64 {
        let total = self.allowed_decisions + self.denied_decisions;
        if total == 0 {
            0.0
        } else {
            self.allowed_decisions as f64 / total as f64
        }
    }

    /// Share of all checks that ended in an error
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.error_count as f64 / self.total_requests as f64
        }
    }
}

/// Lock-free metrics collector shared by the evaluator, loader and watcher
#[derive(Debug, Default)]
pub struct MetricsCollector {
    total_requests: AtomicU64,
    allowed_decisions: AtomicU64,
    denied_decisions: AtomicU64,
    unknown_policies: AtomicU64,
    error_count: AtomicU64,
    reloads_succeeded: AtomicU64,
    reloads_failed: AtomicU64,
    latency_total_us: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a boolean decision
    pub fn record_decision(&self, allowed: bool, latency: Duration) {
        self.record_request(latency);
        if allowed {
            self.allowed_decisions.fetch_add(1, Ordering::Relaxed);
        } else {
            self.denied_decisions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a check whose policy name matched nothing (denied)
    pub fn record_unknown_policy(&self, latency: Duration) {
        self.record_decision(false, latency);
        self.unknown_policies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, latency: Duration) {
        self.record_request(latency);
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reload(&self, succeeded: bool) {
        if succeeded {
            self.reloads_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reloads_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_request(&self, latency: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.latency_total_us.fetch_add(micros, Ordering::Relaxed);
    }

    /// Current counter values
    pub fn snapshot(&self) -> EngineMetrics {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let latency_total = self.latency_total_us.load(Ordering::Relaxed);

        EngineMetrics {
            total_requests,
            allowed_decisions: self.allowed_decisions.load(Ordering::Relaxed),
            denied_decisions: self.denied_decisions.load(Ordering::Relaxed),
            unknown_policies: self.unknown_policies.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            reloads_succeeded: self.reloads_succeeded.load(Ordering::Relaxed),
            reloads_failed: self.reloads_failed.load(Ordering::Relaxed),
            avg_latency_us: if total_requests == 0 {
                0.0
            } else {
                latency_total as f64 / total_requests as f64
            },
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        for counter in [
            &self.total_requests,
            &self.allowed_decisions,
            &self.denied_decisions,
            &self.unknown_policies,
            &self.error_count,
            &self.reloads_succeeded,
            &self.reloads_failed,
            &self.latency_total_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
