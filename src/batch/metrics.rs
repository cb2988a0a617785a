//! Run-scoped batch processing counters.
//!
//! Shared across workers as `Arc<BatchMetrics>`; counters are atomic, the
//! timing aggregates sit behind a short-lived mutex.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
struct ChunkTimings {
    total: Duration,
    min: Option<Duration>,
    max: Option<Duration>,
}

#[derive(Debug, Default)]
struct MemorySamples {
    peak_mb: u64,
    total_mb: u64,
    count: u64,
}

/// Live counters for one batch run.
#[derive(Debug, Default)]
pub struct BatchMetrics {
    items_succeeded: AtomicU64,
    items_failed: AtomicU64,
    chunks_processed: AtomicU64,
    chunks_failed: AtomicU64,
    retries: AtomicU64,
    size_adjustments: AtomicU64,
    timings: Mutex<ChunkTimings>,
    memory: Mutex<MemorySamples>,
}

impl BatchMetrics {
    /// Record one finished chunk: per-item tallies, terminal chunk failure,
    /// and retry count beyond the first attempt.
    pub fn record_chunk(&self, succeeded: u64, failed: u64, attempts: u32, elapsed: Duration) {
        self.items_succeeded.fetch_add(succeeded, Ordering::Relaxed);
        self.items_failed.fetch_add(failed, Ordering::Relaxed);
        self.chunks_processed.fetch_add(1, Ordering::Relaxed);
        if failed > 0 && succeeded == 0 {
            self.chunks_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.retries
            .fetch_add(attempts.saturating_sub(1) as u64, Ordering::Relaxed);

        let mut timings = self.timings.lock();
        timings.total += elapsed;
        timings.min = Some(timings.min.map_or(elapsed, |m| m.min(elapsed)));
        timings.max = Some(timings.max.map_or(elapsed, |m| m.max(elapsed)));
    }

    /// Record items that never reached a handler (cancellation, fail-fast).
    pub fn record_skipped(&self, count: u64) {
        self.items_failed.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a chunk-size change (memory pressure or adaptive resize).
    pub fn record_resize(&self) {
        self.size_adjustments.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a memory reading taken before scheduling a chunk.
    pub fn record_memory_sample(&self, used_mb: u64) {
        let mut memory = self.memory.lock();
        memory.peak_mb = memory.peak_mb.max(used_mb);
        memory.total_mb += used_mb;
        memory.count += 1;
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> BatchMetricsSnapshot {
        let timings = self.timings.lock();
        let chunks = self.chunks_processed.load(Ordering::Relaxed);
        let average_chunk_ms = if chunks > 0 {
            (timings.total.as_millis() as u64) / chunks
        } else {
            0
        };
        let memory = self.memory.lock();
        BatchMetricsSnapshot {
            items_succeeded: self.items_succeeded.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            chunks_processed: chunks,
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            size_adjustments: self.size_adjustments.load(Ordering::Relaxed),
            average_chunk_ms,
            min_chunk_ms: timings.min.map(|d| d.as_millis() as u64),
            max_chunk_ms: timings.max.map(|d| d.as_millis() as u64),
            peak_memory_mb: (memory.count > 0).then_some(memory.peak_mb),
            average_memory_mb: (memory.count > 0).then(|| memory.total_mb / memory.count),
        }
    }
}

/// Serializable point-in-time view, suitable for run-end reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMetricsSnapshot {
    pub items_succeeded: u64,
    pub items_failed: u64,
    pub chunks_processed: u64,
    pub chunks_failed: u64,
    pub retries: u64,
    pub size_adjustments: u64,
    pub average_chunk_ms: u64,
    pub min_chunk_ms: Option<u64>,
    pub max_chunk_ms: Option<u64>,
    pub peak_memory_mb: Option<u64>,
    pub average_memory_mb: Option<u64>,
}

impl BatchMetricsSnapshot {
    /// Fraction of items that succeeded, in `[0, 1]`.
    pub fn success_rate(&self) -> f64 {
        let total = self.items_succeeded + self.items_failed;
        if total == 0 {
            return 1.0;
        }
        self.items_succeeded as f64 / total as f64
    }
}
