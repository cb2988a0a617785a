//! # Performance Orchestrator
//!
//! Top-level coordinator tying the rate limiter, retry policy, and batch
//! processor together for a full migration run. Callers hand over items and
//! a [`ChunkHandler`]; the orchestrator wraps the handler so every chunk
//! attempt first waits on the endpoint's rate limiter and afterwards feeds
//! the response signal back into it.
//!
//! One orchestrator serves many runs; limiter state and the shutdown flag
//! are shared across them, so pressure learned in one run carries into the
//! next.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::batch::{
    BatchMetricsSnapshot, BatchProcessor, CancellationFlag, ChunkHandler, ItemOutcome,
    ProgressCallback,
};
use crate::config::PerformanceConfig;
use crate::error::{ProcessingError, Result, TransitError};
use crate::orchestrator::metrics::{PerformanceSummary, RunMetrics};
use crate::rate_limiter::{RateLimitHeaders, RateLimiter, RateLimiterRegistry, RateLimiterSnapshot};

/// Everything a finished run produced: per-item outcomes in input order
/// plus the accounting needed for the run report.
#[derive(Debug)]
pub struct RunReport<R> {
    pub run_id: Uuid,
    pub outcomes: Vec<ItemOutcome<R>>,
    pub summary: PerformanceSummary,
    pub batch_metrics: BatchMetricsSnapshot,
    pub rate_limiter: RateLimiterSnapshot,
}

/// Coordinates rate limiting, retries, and batching for migration runs.
pub struct PerformanceOrchestrator {
    config: PerformanceConfig,
    registry: RateLimiterRegistry,
    shutdown: CancellationFlag,
    progress: Option<ProgressCallback>,
}

impl PerformanceOrchestrator {
    /// Create an orchestrator, failing fast if any section of the
    /// configuration is invalid.
    pub fn new(config: PerformanceConfig) -> Result<Self> {
        config.validate()?;
        let registry = RateLimiterRegistry::new(config.rate_limiter.clone())?;
        Ok(Self {
            config,
            registry,
            shutdown: CancellationFlag::new(),
            progress: None,
        })
    }

    /// Install a per-chunk progress callback applied to every run.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn config(&self) -> &PerformanceConfig {
        &self.config
    }

    /// The shared per-endpoint limiter registry.
    pub fn rate_limiters(&self) -> &RateLimiterRegistry {
        &self.registry
    }

    /// Raise the shutdown signal: in-flight runs stop scheduling new
    /// chunks, future runs are rejected.
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Run `items` against `endpoint` through `handler`.
    ///
    /// Per-item failures are reported inside the [`RunReport`]; an `Err`
    /// here means the run could not start at all.
    pub async fn process_batch<T, R>(
        &self,
        endpoint: &str,
        items: Vec<T>,
        handler: Arc<dyn ChunkHandler<T, R>>,
    ) -> Result<RunReport<R>>
    where
        T: Clone + Send + Sync + 'static,
        R: Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(TransitError::Shutdown);
        }

        let metrics = Arc::new(RunMetrics::new());
        let run_id = metrics.run_id();
        let limiter = self.registry.for_endpoint(endpoint);
        let total = items.len() as u64;

        info!(
            %run_id,
            endpoint,
            items = total,
            "Starting orchestrated run"
        );

        let mut batch_config = self.config.batch.clone();
        batch_config.chunk_retry = self.config.retry.clone();
        let mut processor: BatchProcessor<T, R> = BatchProcessor::new(batch_config)?;
        if let Some(progress) = &self.progress {
            processor = processor.with_progress(Arc::clone(progress));
        }

        let wrapped: Arc<dyn ChunkHandler<T, R>> = Arc::new(RateLimitedHandler {
            inner: handler,
            limiter: Arc::clone(&limiter),
            metrics: Arc::clone(&metrics),
        });

        let started = Instant::now();
        let (outcomes, batch_metrics) = processor.process(items, wrapped, &self.shutdown).await;
        let elapsed = started.elapsed();

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count() as u64;
        let failed = total - succeeded;
        let summary = metrics.summarize(elapsed, total, succeeded, failed);

        info!(
            %run_id,
            endpoint,
            succeeded,
            failed,
            duration_ms = summary.duration_ms,
            wait_ms = summary.wait_ms,
            "Run finished"
        );

        Ok(RunReport {
            run_id,
            outcomes,
            summary,
            batch_metrics,
            rate_limiter: limiter.snapshot(),
        })
    }
}

/// Wraps the caller's handler with rate-limiter admission and feedback.
/// Retries happen outside this wrapper, in the batch processor, so every
/// attempt pays the limiter toll and reports its result.
struct RateLimitedHandler<T, R> {
    inner: Arc<dyn ChunkHandler<T, R>>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<RunMetrics>,
}

#[async_trait]
impl<T, R> ChunkHandler<T, R> for RateLimitedHandler<T, R>
where
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    async fn process_chunk(
        &self,
        chunk: Vec<T>,
    ) -> std::result::Result<Vec<R>, ProcessingError> {
        let waited = self.limiter.wait_if_needed(1).await;
        self.metrics.record_wait(waited);

        let started = Instant::now();
        let result = self.inner.process_chunk(chunk).await;
        let latency = started.elapsed();

        match &result {
            Ok(_) => {
                self.metrics.record_call(true);
                self.limiter
                    .record_response(latency, 200, &RateLimitHeaders::empty())
                    .await;
            }
            Err(error) => {
                self.metrics.record_call(false);
                match error {
                    ProcessingError::RateLimited { retry_after } => {
                        let headers = (*retry_after)
                            .map(RateLimitHeaders::retry_after)
                            .unwrap_or_default();
                        self.limiter.record_response(latency, 429, &headers).await;
                    }
                    other => {
                        if let Some(status) = other.status_code() {
                            self.limiter
                                .record_response(latency, status, &RateLimitHeaders::empty())
                                .await;
                        }
                        // Network-level failures carry no HTTP status and
                        // produce no limiter feedback.
                    }
                }
            }
        }

        result
    }
}
