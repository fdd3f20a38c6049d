//! Request counters, logged and reset periodically by the server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// How a request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Custom,
    Cached,
    Upstream,
    AdBlocked,
    Failed,
}

/// Atomic per-engine statistics.
#[derive(Default)]
pub struct Stats {
    requests: AtomicU64,
    custom: AtomicU64,
    cached: AtomicU64,
    upstream: AtomicU64,
    adblocked: AtomicU64,
    failed: AtomicU64,
    /// Cumulative response time in microseconds for averaging.
    total_response_time_us: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: Outcome, elapsed: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            Outcome::Custom => &self.custom,
            Outcome::Cached => &self.cached,
            Outcome::Upstream => &self.upstream,
            Outcome::AdBlocked => &self.adblocked,
            Outcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        let requests = self.requests.swap(0, Ordering::Relaxed);
        let total_us = self.total_response_time_us.swap(0, Ordering::Relaxed);

        let avg_response_ms = if requests > 0 {
            (total_us as f64 / requests as f64) / 1000.0
        } else {
            0.0
        };

        StatsSnapshot {
            requests,
            custom: self.custom.swap(0, Ordering::Relaxed),
            cached: self.cached.swap(0, Ordering::Relaxed),
            upstream: self.upstream.swap(0, Ordering::Relaxed),
            adblocked: self.adblocked.swap(0, Ordering::Relaxed),
            failed: self.failed.swap(0, Ordering::Relaxed),
            avg_response_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub custom: u64,
    pub cached: u64,
    pub upstream: u64,
    pub adblocked: u64,
    pub failed: u64,
    pub avg_response_ms: f64,
}
