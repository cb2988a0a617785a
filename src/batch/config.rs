//! # Batch Processor Configuration
//!
//! Sizing, concurrency, and strategy selection for batch runs. Validated
//! once when the processor is constructed; every violated constraint is
//! reported together.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{self, MAX_BATCH_SIZE, MIN_BATCH_SIZE, MIN_WORKER_COUNT};
use crate::error::{ConstraintViolation, Result, TransitError};
use crate::retry::RetryConfig;

/// Chunk scheduling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStrategy {
    /// One chunk at a time, in input order.
    Sequential,
    /// Chunks fan out across a bounded worker pool.
    Parallel,
    /// Sequential, shrinking the chunk size under memory pressure.
    MemoryAware,
    /// Sequential, resizing chunks from observed throughput.
    Adaptive,
    /// Parallel for small inputs, memory-aware otherwise.
    Hybrid,
}

impl BatchStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            BatchStrategy::Sequential => "sequential",
            BatchStrategy::Parallel => "parallel",
            BatchStrategy::MemoryAware => "memory_aware",
            BatchStrategy::Adaptive => "adaptive",
            BatchStrategy::Hybrid => "hybrid",
        }
    }
}

/// Configuration for a [`BatchProcessor`](crate::batch::BatchProcessor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Scheduling strategy.
    pub strategy: BatchStrategy,
    /// Floor for adaptive and memory-aware shrinking.
    pub min_batch_size: usize,
    /// Starting chunk size for every strategy.
    pub base_batch_size: usize,
    /// Ceiling for adaptive growth.
    pub max_batch_size: usize,
    /// Concurrent chunk workers (Parallel and small-input Hybrid).
    pub worker_count: usize,
    /// Per-attempt deadline for one chunk; also the shared pool deadline
    /// for parallel runs.
    pub batch_timeout: Duration,
    /// Retry policy applied to each chunk.
    pub chunk_retry: RetryConfig,
    /// Memory-aware shrinking kicks in above this usage.
    pub memory_threshold_mb: u64,
    /// Trailing chunk count the adaptive strategy averages over.
    pub adaptive_window: usize,
    /// Fractional resize step for the adaptive strategy.
    pub resize_step: f64,
    /// Stop scheduling new chunks after a chunk fails terminally.
    pub fail_fast: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            strategy: BatchStrategy::Sequential,
            min_batch_size: 10,
            base_batch_size: 100,
            max_batch_size: MAX_BATCH_SIZE,
            // The ceiling is 2 x available cores, so the default must bend
            // on small hosts.
            worker_count: 4.min(constants::max_worker_count()),
            batch_timeout: Duration::from_secs(30),
            chunk_retry: RetryConfig::default(),
            memory_threshold_mb: 1024,
            adaptive_window: constants::DEFAULT_ADAPTIVE_WINDOW,
            resize_step: 0.2,
            fail_fast: false,
        }
    }
}

impl BatchConfig {
    /// Validate every constraint, collecting all violations. Chunk retry
    /// violations are folded into the same report.
    pub fn validate(&self) -> Result<()> {
        let mut violations = Vec::new();

        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&self.min_batch_size) {
            violations.push(ConstraintViolation::new(
                "batch.min_batch_size",
                self.min_batch_size,
                format!("{MIN_BATCH_SIZE}..={MAX_BATCH_SIZE}"),
            ));
        }
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&self.max_batch_size) {
            violations.push(ConstraintViolation::new(
                "batch.max_batch_size",
                self.max_batch_size,
                format!("{MIN_BATCH_SIZE}..={MAX_BATCH_SIZE}"),
            ));
        }
        if self.min_batch_size > self.max_batch_size {
            violations.push(ConstraintViolation::new(
                "batch.min_batch_size",
                self.min_batch_size,
                format!("<= max_batch_size ({})", self.max_batch_size),
            ));
        } else if !(self.min_batch_size..=self.max_batch_size).contains(&self.base_batch_size) {
            violations.push(ConstraintViolation::new(
                "batch.base_batch_size",
                self.base_batch_size,
                format!("{}..={}", self.min_batch_size, self.max_batch_size),
            ));
        }

        let worker_ceiling = constants::max_worker_count();
        if !(MIN_WORKER_COUNT..=worker_ceiling).contains(&self.worker_count) {
            violations.push(ConstraintViolation::new(
                "batch.worker_count",
                self.worker_count,
                format!("{MIN_WORKER_COUNT}..={worker_ceiling} (2 x available cores)"),
            ));
        }

        if self.batch_timeout.is_zero() || self.batch_timeout > Duration::from_secs(3600) {
            violations.push(ConstraintViolation::new(
                "batch.batch_timeout",
                format!("{:?}", self.batch_timeout),
                "positive, at most 1h",
            ));
        }

        if self.memory_threshold_mb == 0 {
            violations.push(ConstraintViolation::new(
                "batch.memory_threshold_mb",
                self.memory_threshold_mb,
                ">= 1",
            ));
        }

        if self.adaptive_window == 0 {
            violations.push(ConstraintViolation::new(
                "batch.adaptive_window",
                self.adaptive_window,
                ">= 1",
            ));
        }

        if !(self.resize_step > 0.0 && self.resize_step < 1.0) {
            violations.push(ConstraintViolation::new(
                "batch.resize_step",
                self.resize_step,
                "0.0 < step < 1.0",
            ));
        }

        if let Err(TransitError::Configuration {
            violations: retry_violations,
        }) = self.chunk_retry.validate()
        {
            violations.extend(retry_violations);
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(TransitError::Configuration { violations })
        }
    }
}
