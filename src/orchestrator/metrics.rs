//! Per-run performance accounting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Live counters for one orchestrated run. Shared with the rate-limited
/// handler wrapper as `Arc<RunMetrics>`.
#[derive(Debug)]
pub struct RunMetrics {
    run_id: Uuid,
    chunk_calls: AtomicU64,
    chunk_failures: AtomicU64,
    wait_ms: AtomicU64,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            chunk_calls: AtomicU64::new(0),
            chunk_failures: AtomicU64::new(0),
            wait_ms: AtomicU64::new(0),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn record_call(&self, success: bool) {
        self.chunk_calls.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.chunk_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_wait(&self, waited: Duration) {
        self.wait_ms
            .fetch_add(waited.as_millis() as u64, Ordering::Relaxed);
    }

    /// Fold the counters into a final summary for a finished run.
    pub fn summarize(
        &self,
        elapsed: Duration,
        items_total: u64,
        items_succeeded: u64,
        items_failed: u64,
    ) -> PerformanceSummary {
        let elapsed_secs = elapsed.as_secs_f64();
        let throughput_per_sec = if elapsed_secs > 0.0 {
            items_succeeded as f64 / elapsed_secs
        } else {
            0.0
        };
        let success_rate = if items_total > 0 {
            items_succeeded as f64 / items_total as f64
        } else {
            1.0
        };
        let wait_ms = self.wait_ms.load(Ordering::Relaxed);
        let elapsed_ms = elapsed.as_millis() as u64;
        // Fraction of wall time spent doing work rather than waiting on
        // the rate limiter.
        let efficiency = if elapsed_ms > 0 {
            (elapsed_ms.saturating_sub(wait_ms) as f64 / elapsed_ms as f64).clamp(0.0, 1.0)
        } else {
            1.0
        };

        PerformanceSummary {
            run_id: self.run_id,
            duration_ms: elapsed_ms,
            items_total,
            items_succeeded,
            items_failed,
            chunk_calls: self.chunk_calls.load(Ordering::Relaxed),
            chunk_failures: self.chunk_failures.load(Ordering::Relaxed),
            wait_ms,
            throughput_per_sec,
            success_rate,
            efficiency,
        }
    }
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Final report for one orchestrated run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub run_id: Uuid,
    pub duration_ms: u64,
    pub items_total: u64,
    pub items_succeeded: u64,
    pub items_failed: u64,
    /// Handler invocations, including retries.
    pub chunk_calls: u64,
    pub chunk_failures: u64,
    /// Cumulative time spent waiting on the rate limiter.
    pub wait_ms: u64,
    pub throughput_per_sec: f64,
    pub success_rate: f64,
    /// `(duration - wait) / duration`, in `[0, 1]`.
    pub efficiency: f64,
}
