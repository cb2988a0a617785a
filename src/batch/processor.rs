//! # Batch Processor
//!
//! Splits a flat item list into chunks, drives each chunk through a
//! caller-supplied [`ChunkHandler`] under the configured retry policy, and
//! returns one outcome per input item in input order.
//!
//! ## Architecture
//!
//! - Sequential, memory-aware, and adaptive strategies share one loop that
//!   differs only in how the next chunk size is chosen
//! - Parallel fans chunks out over a semaphore-bounded worker pool with a
//!   shared deadline; stragglers are aborted and their items time out
//! - Hybrid picks parallel when the whole input fits the worker pool in one
//!   wave, memory-aware otherwise
//!
//! A chunk-level failure fans out to every item in the chunk; a failed chunk
//! never aborts the run unless `fail_fast` is set.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::batch::config::{BatchConfig, BatchStrategy};
use crate::batch::memory::{MemoryMonitor, SystemMemoryMonitor};
use crate::batch::metrics::{BatchMetrics, BatchMetricsSnapshot};
use crate::constants::{ADAPTIVE_THROUGHPUT_TOLERANCE, MEMORY_SHRINK_FACTOR};
use crate::error::{ProcessingError, Result};
use crate::retry::RetryExecutor;

/// Processes one chunk of items. Implementations wrap the remote service
/// call; they must return exactly one result per input item.
#[async_trait]
pub trait ChunkHandler<T, R>: Send + Sync {
    async fn process_chunk(&self, chunk: Vec<T>)
        -> std::result::Result<Vec<R>, ProcessingError>;
}

/// Run-scoped cooperative cancellation signal. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Terminal outcome for one input item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome<R> {
    Succeeded(R),
    Failed {
        error: ProcessingError,
        /// Handler attempts made for the owning chunk; 0 if the item was
        /// never scheduled.
        attempts: u32,
    },
}

impl<R> ItemOutcome<R> {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Succeeded(_))
    }

    pub fn value(&self) -> Option<&R> {
        match self {
            ItemOutcome::Succeeded(value) => Some(value),
            ItemOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ProcessingError> {
        match self {
            ItemOutcome::Succeeded(_) => None,
            ItemOutcome::Failed { error, .. } => Some(error),
        }
    }
}

/// Snapshot delivered to the progress callback after every finished chunk.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub processed: usize,
    pub total: usize,
    pub succeeded: u64,
    pub failed: u64,
    pub current_batch_size: usize,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SizingMode {
    Fixed,
    MemoryAware,
    Adaptive,
}

/// Chunked batch executor. Generic over the item and result types; the
/// handler owns all domain knowledge.
pub struct BatchProcessor<T, R> {
    config: BatchConfig,
    retry: RetryExecutor,
    memory: Arc<dyn MemoryMonitor>,
    progress: Option<ProgressCallback>,
    _marker: PhantomData<fn(T) -> R>,
}

impl<T, R> BatchProcessor<T, R>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    /// Create a processor, failing fast on invalid configuration.
    pub fn new(config: BatchConfig) -> Result<Self> {
        config.validate()?;
        let retry = RetryExecutor::new(config.chunk_retry.clone())?;
        Ok(Self {
            config,
            retry,
            memory: Arc::new(SystemMemoryMonitor::new()),
            progress: None,
            _marker: PhantomData,
        })
    }

    /// Swap in a different memory probe (tests, containerized limits).
    pub fn with_memory_monitor(mut self, monitor: Arc<dyn MemoryMonitor>) -> Self {
        self.memory = monitor;
        self
    }

    /// Install a per-chunk progress callback.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Process `items`, returning one outcome per item in input order plus
    /// the metrics for this call. Metrics start from zero on every call;
    /// they are never carried over from a previous run.
    ///
    /// Cancellation is cooperative: chunks already running finish, items
    /// not yet scheduled fail with [`ProcessingError::Cancelled`].
    pub async fn process(
        &self,
        items: Vec<T>,
        handler: Arc<dyn ChunkHandler<T, R>>,
        cancel: &CancellationFlag,
    ) -> (Vec<ItemOutcome<R>>, BatchMetricsSnapshot) {
        info!(
            strategy = self.config.strategy.name(),
            total_items = items.len(),
            base_batch_size = self.config.base_batch_size,
            "Starting batch run"
        );

        let metrics = BatchMetrics::default();
        let outcomes = match self.config.strategy {
            BatchStrategy::Sequential => {
                self.run_sequential(items, handler, cancel, SizingMode::Fixed, &metrics)
                    .await
            }
            BatchStrategy::MemoryAware => {
                self.run_sequential(items, handler, cancel, SizingMode::MemoryAware, &metrics)
                    .await
            }
            BatchStrategy::Adaptive => {
                self.run_sequential(items, handler, cancel, SizingMode::Adaptive, &metrics)
                    .await
            }
            BatchStrategy::Parallel => self.run_parallel(items, handler, cancel, &metrics).await,
            BatchStrategy::Hybrid => {
                let waves = items.len().div_ceil(self.config.base_batch_size.max(1));
                if waves <= self.config.worker_count {
                    self.run_parallel(items, handler, cancel, &metrics).await
                } else {
                    self.run_sequential(items, handler, cancel, SizingMode::MemoryAware, &metrics)
                        .await
                }
            }
        };
        (outcomes, metrics.snapshot())
    }

    async fn run_sequential(
        &self,
        items: Vec<T>,
        handler: Arc<dyn ChunkHandler<T, R>>,
        cancel: &CancellationFlag,
        mode: SizingMode,
        metrics: &BatchMetrics,
    ) -> Vec<ItemOutcome<R>> {
        let total = items.len();
        let mut remaining: VecDeque<T> = items.into();
        let mut outcomes: Vec<ItemOutcome<R>> = Vec::with_capacity(total);
        let mut size = self.config.base_batch_size;
        let mut throughput_window: VecDeque<f64> = VecDeque::new();
        let mut succeeded = 0u64;
        let mut failed = 0u64;

        while !remaining.is_empty() {
            if cancel.is_cancelled() {
                failed += drain_cancelled(metrics, &mut remaining, &mut outcomes);
                break;
            }

            if mode == SizingMode::MemoryAware {
                size = self.memory_adjusted_size(size, metrics);
            }

            let take = size.min(remaining.len());
            let chunk: Vec<T> = remaining.drain(..take).collect();

            let started = Instant::now();
            let (chunk_outcomes, attempts) =
                run_chunk(&self.retry, &handler, chunk, self.config.batch_timeout).await;
            let elapsed = started.elapsed();

            let chunk_ok = chunk_outcomes.iter().filter(|o| o.is_success()).count() as u64;
            let chunk_failed = take as u64 - chunk_ok;
            let terminal_failure = chunk_ok == 0 && chunk_failed > 0;
            metrics.record_chunk(chunk_ok, chunk_failed, attempts, elapsed);
            succeeded += chunk_ok;
            failed += chunk_failed;
            outcomes.extend(chunk_outcomes);

            self.emit_progress(outcomes.len(), total, succeeded, failed, size);

            if mode == SizingMode::Adaptive {
                size = self.adaptive_size(size, take, elapsed, &mut throughput_window, metrics);
            }

            if terminal_failure && self.config.fail_fast {
                warn!(
                    unscheduled = remaining.len(),
                    "Chunk failed terminally with fail-fast enabled, stopping run"
                );
                failed += drain_cancelled(metrics, &mut remaining, &mut outcomes);
                break;
            }
        }

        outcomes
    }

    async fn run_parallel(
        &self,
        items: Vec<T>,
        handler: Arc<dyn ChunkHandler<T, R>>,
        cancel: &CancellationFlag,
        metrics: &BatchMetrics,
    ) -> Vec<ItemOutcome<R>> {
        let total = items.len();
        let size = self.config.base_batch_size.max(1);
        let deadline = Instant::now() + self.config.batch_timeout;
        let semaphore = Arc::new(Semaphore::new(self.config.worker_count));

        let mut chunks: Vec<Vec<T>> = Vec::with_capacity(total.div_ceil(size));
        let mut remaining: VecDeque<T> = items.into();
        while !remaining.is_empty() {
            let take = size.min(remaining.len());
            chunks.push(remaining.drain(..take).collect());
        }

        let mut handles = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let semaphore = Arc::clone(&semaphore);
            let handler = Arc::clone(&handler);
            let retry = self.retry.clone();
            let timeout = self.config.batch_timeout;
            let cancel = cancel.clone();
            let len = chunk.len();

            let handle = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (cancelled_fan_out(len), 0, Duration::ZERO);
                };
                if cancel.is_cancelled() {
                    return (cancelled_fan_out(len), 0, Duration::ZERO);
                }
                let started = Instant::now();
                let (outcomes, attempts) = run_chunk(&retry, &handler, chunk, timeout).await;
                (outcomes, attempts, started.elapsed())
            });
            handles.push((len, handle));
        }

        let mut outcomes: Vec<ItemOutcome<R>> = Vec::with_capacity(total);
        let mut succeeded = 0u64;
        let mut failed = 0u64;

        // Joining in submission order keeps outcomes aligned with input.
        for (len, mut handle) in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok((chunk_outcomes, attempts, elapsed))) => {
                    let chunk_ok =
                        chunk_outcomes.iter().filter(|o| o.is_success()).count() as u64;
                    let chunk_failed = len as u64 - chunk_ok;
                    if attempts == 0 {
                        metrics.record_skipped(len as u64);
                    } else {
                        metrics.record_chunk(chunk_ok, chunk_failed, attempts, elapsed);
                    }
                    succeeded += chunk_ok;
                    failed += chunk_failed;
                    outcomes.extend(chunk_outcomes);
                }
                Ok(Err(join_error)) => {
                    warn!(error = %join_error, "Chunk worker panicked");
                    let error =
                        ProcessingError::ResourceExhausted("chunk worker panicked".to_string());
                    metrics.record_chunk(0, len as u64, 1, Duration::ZERO);
                    failed += len as u64;
                    outcomes.extend((0..len).map(|_| ItemOutcome::Failed {
                        error: error.clone(),
                        attempts: 1,
                    }));
                }
                Err(_) => {
                    // Pool deadline passed; the straggler is abandoned and
                    // its items reported as timed out.
                    handle.abort();
                    let error = ProcessingError::Timeout(self.config.batch_timeout);
                    metrics.record_chunk(0, len as u64, 1, self.config.batch_timeout);
                    failed += len as u64;
                    outcomes.extend((0..len).map(|_| ItemOutcome::Failed {
                        error: error.clone(),
                        attempts: 1,
                    }));
                }
            }
            self.emit_progress(outcomes.len(), total, succeeded, failed, size);
        }

        outcomes
    }

    fn memory_adjusted_size(&self, size: usize, metrics: &BatchMetrics) -> usize {
        let used_mb = self.memory.used_memory_mb();
        metrics.record_memory_sample(used_mb);
        if used_mb <= self.config.memory_threshold_mb {
            return size;
        }
        let shrunk =
            (((size as f64) * MEMORY_SHRINK_FACTOR).floor() as usize).max(self.config.min_batch_size);
        if shrunk < size {
            metrics.record_resize();
            debug!(
                used_mb,
                threshold_mb = self.config.memory_threshold_mb,
                from = size,
                to = shrunk,
                "Memory pressure, shrinking chunk size"
            );
        }
        shrunk
    }

    fn adaptive_size(
        &self,
        size: usize,
        items: usize,
        elapsed: Duration,
        window: &mut VecDeque<f64>,
        metrics: &BatchMetrics,
    ) -> usize {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return size;
        }
        let throughput = items as f64 / secs;

        let next = if window.is_empty() {
            size
        } else {
            let average = window.iter().sum::<f64>() / window.len() as f64;
            if throughput > average * (1.0 + ADAPTIVE_THROUGHPUT_TOLERANCE) {
                ((size as f64) * (1.0 + self.config.resize_step)).ceil() as usize
            } else if throughput < average * (1.0 - ADAPTIVE_THROUGHPUT_TOLERANCE) {
                ((size as f64) * (1.0 - self.config.resize_step)).floor() as usize
            } else {
                size
            }
        };

        window.push_back(throughput);
        if window.len() > self.config.adaptive_window {
            window.pop_front();
        }

        let clamped = next.clamp(self.config.min_batch_size, self.config.max_batch_size);
        if clamped != size {
            metrics.record_resize();
            debug!(
                throughput,
                from = size,
                to = clamped,
                "Adaptive chunk resize"
            );
        }
        clamped
    }

    fn emit_progress(
        &self,
        processed: usize,
        total: usize,
        succeeded: u64,
        failed: u64,
        current_batch_size: usize,
    ) {
        if let Some(callback) = &self.progress {
            callback(ProgressUpdate {
                processed,
                total,
                succeeded,
                failed,
                current_batch_size,
            });
        }
    }
}

fn drain_cancelled<T, R>(
    metrics: &BatchMetrics,
    remaining: &mut VecDeque<T>,
    outcomes: &mut Vec<ItemOutcome<R>>,
) -> u64 {
    let skipped = remaining.len() as u64;
    metrics.record_skipped(skipped);
    outcomes.extend(remaining.drain(..).map(|_| ItemOutcome::Failed {
        error: ProcessingError::Cancelled,
        attempts: 0,
    }));
    skipped
}

fn cancelled_fan_out<R>(len: usize) -> Vec<ItemOutcome<R>> {
    (0..len)
        .map(|_| ItemOutcome::Failed {
            error: ProcessingError::Cancelled,
            attempts: 0,
        })
        .collect()
}

/// Drive one chunk through the handler under the retry policy, applying the
/// per-attempt deadline. A result-count mismatch is a permanent failure;
/// retrying it would only burn quota on a broken handler.
async fn run_chunk<T, R>(
    retry: &RetryExecutor,
    handler: &Arc<dyn ChunkHandler<T, R>>,
    chunk: Vec<T>,
    timeout: Duration,
) -> (Vec<ItemOutcome<R>>, u32)
where
    T: Clone + Send + Sync,
    R: Send,
{
    let len = chunk.len();
    let outcome = retry
        .run(|| {
            let handler = Arc::clone(handler);
            let chunk = chunk.clone();
            async move {
                match tokio::time::timeout(timeout, handler.process_chunk(chunk)).await {
                    Ok(result) => result,
                    Err(_) => Err(ProcessingError::Timeout(timeout)),
                }
            }
        })
        .await;

    let attempts = outcome.attempts;
    match outcome.result {
        Ok(results) if results.len() == len => (
            results.into_iter().map(ItemOutcome::Succeeded).collect(),
            attempts,
        ),
        Ok(results) => {
            let error = ProcessingError::Validation(format!(
                "handler returned {} results for {len} items",
                results.len()
            ));
            (failure_fan_out(len, error, attempts), attempts)
        }
        Err(error) => (failure_fan_out(len, error, attempts), attempts),
    }
}

fn failure_fan_out<R>(len: usize, error: ProcessingError, attempts: u32) -> Vec<ItemOutcome<R>> {
    (0..len)
        .map(|_| ItemOutcome::Failed {
            error: error.clone(),
            attempts,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::memory::testing::FakeMemoryMonitor;
    use crate::retry::{BackoffStrategy, RetryConfig};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU32;

    fn no_jitter_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            strategy: BackoffStrategy::Fixed,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: false,
            ..RetryConfig::default()
        }
    }

    fn config(strategy: BatchStrategy, base: usize) -> BatchConfig {
        BatchConfig {
            strategy,
            min_batch_size: 1,
            base_batch_size: base,
            max_batch_size: 500,
            worker_count: 4.min(crate::constants::max_worker_count()),
            chunk_retry: no_jitter_retry(1),
            ..BatchConfig::default()
        }
    }

    /// Echoes items back, recording each chunk's size.
    #[derive(Debug, Default)]
    struct RecordingHandler {
        chunk_sizes: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl ChunkHandler<u32, u32> for RecordingHandler {
        async fn process_chunk(
            &self,
            chunk: Vec<u32>,
        ) -> std::result::Result<Vec<u32>, ProcessingError> {
            self.chunk_sizes.lock().push(chunk.len());
            Ok(chunk)
        }
    }

    #[tokio::test]
    async fn test_sequential_chunking_covers_all_items_in_order() {
        let processor = BatchProcessor::new(config(BatchStrategy::Sequential, 5)).unwrap();
        let handler = Arc::new(RecordingHandler::default());
        let items: Vec<u32> = (0..23).collect();

        let (outcomes, snap) = processor
            .process(items.clone(), handler.clone(), &CancellationFlag::new())
            .await;

        assert_eq!(*handler.chunk_sizes.lock(), vec![5, 5, 5, 5, 3]);
        assert_eq!(outcomes.len(), 23);
        for (item, outcome) in items.iter().zip(&outcomes) {
            assert_eq!(outcome.value(), Some(item));
        }
        assert_eq!(snap.items_succeeded, 23);
        assert_eq!(snap.chunks_processed, 5);
    }

    #[tokio::test]
    async fn test_metrics_reset_between_calls() {
        let processor = BatchProcessor::new(config(BatchStrategy::Sequential, 5)).unwrap();
        let handler = Arc::new(RecordingHandler::default());

        let (_, first) = processor
            .process((0..10).collect(), handler.clone(), &CancellationFlag::new())
            .await;
        let (_, second) = processor
            .process((0..10).collect(), handler, &CancellationFlag::new())
            .await;

        // Each call reports its own run, never an accumulation.
        assert_eq!(first.items_succeeded, 10);
        assert_eq!(second.items_succeeded, 10);
        assert_eq!(second.chunks_processed, 2);
    }

    /// Doubles items after a value-dependent sleep, scrambling completion
    /// order across workers.
    #[derive(Debug)]
    struct ScramblingHandler;

    #[async_trait]
    impl ChunkHandler<u32, u32> for ScramblingHandler {
        async fn process_chunk(
            &self,
            chunk: Vec<u32>,
        ) -> std::result::Result<Vec<u32>, ProcessingError> {
            let delay = 50u64.saturating_sub(u64::from(chunk[0]));
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(chunk.into_iter().map(|n| n * 2).collect())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_preserves_input_order() {
        let processor = BatchProcessor::new(config(BatchStrategy::Parallel, 10)).unwrap();
        let items: Vec<u32> = (0..50).collect();

        let (outcomes, _) = processor
            .process(items.clone(), Arc::new(ScramblingHandler), &CancellationFlag::new())
            .await;

        assert_eq!(outcomes.len(), 50);
        for (item, outcome) in items.iter().zip(&outcomes) {
            assert_eq!(outcome.value(), Some(&(item * 2)));
        }
    }

    /// Fails the first N calls with a transient error, then succeeds.
    #[derive(Debug)]
    struct FlakyHandler {
        failures_remaining: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakyHandler {
        fn failing(n: u32) -> Self {
            Self {
                failures_remaining: AtomicU32::new(n),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ChunkHandler<u32, u32> for FlakyHandler {
        async fn process_chunk(
            &self,
            chunk: Vec<u32>,
        ) -> std::result::Result<Vec<u32>, ProcessingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ProcessingError::Network("connection reset".into()));
            }
            Ok(chunk)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_retry_recovers_transient_failure() {
        let mut cfg = config(BatchStrategy::Sequential, 10);
        cfg.chunk_retry = no_jitter_retry(3);
        let processor = BatchProcessor::new(cfg).unwrap();
        let handler = Arc::new(FlakyHandler::failing(1));

        let (outcomes, snap) = processor
            .process((0..10).collect(), handler.clone(), &CancellationFlag::new())
            .await;

        assert!(outcomes.iter().all(ItemOutcome::is_success));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(snap.retries, 1);
    }

    /// Always rejects with a deterministic client error.
    #[derive(Debug, Default)]
    struct RejectingHandler {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ChunkHandler<u32, u32> for RejectingHandler {
        async fn process_chunk(
            &self,
            _chunk: Vec<u32>,
        ) -> std::result::Result<Vec<u32>, ProcessingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProcessingError::Client {
                status: 400,
                message: "bad payload".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_permanent_failure_fans_out_without_retry() {
        let mut cfg = config(BatchStrategy::Sequential, 10);
        cfg.chunk_retry = no_jitter_retry(5);
        let processor = BatchProcessor::new(cfg).unwrap();
        let handler = Arc::new(RejectingHandler::default());

        let (outcomes, _) = processor
            .process((0..10).collect(), handler.clone(), &CancellationFlag::new())
            .await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcomes.len(), 10);
        for outcome in &outcomes {
            match outcome {
                ItemOutcome::Failed { error, attempts } => {
                    assert_eq!(*attempts, 1);
                    assert!(matches!(error, ProcessingError::Client { status: 400, .. }));
                }
                other => panic!("expected failure, got {other:?}"),
            }
        }
    }

    /// Drops the last result from every chunk.
    #[derive(Debug)]
    struct ShortChangingHandler;

    #[async_trait]
    impl ChunkHandler<u32, u32> for ShortChangingHandler {
        async fn process_chunk(
            &self,
            mut chunk: Vec<u32>,
        ) -> std::result::Result<Vec<u32>, ProcessingError> {
            chunk.pop();
            Ok(chunk)
        }
    }

    #[tokio::test]
    async fn test_result_count_mismatch_is_permanent_failure() {
        let processor = BatchProcessor::new(config(BatchStrategy::Sequential, 5)).unwrap();

        let (outcomes, _) = processor
            .process(
                (0..5).collect(),
                Arc::new(ShortChangingHandler),
                &CancellationFlag::new(),
            )
            .await;

        assert_eq!(outcomes.len(), 5);
        assert!(outcomes
            .iter()
            .all(|o| matches!(o.error(), Some(ProcessingError::Validation(_)))));
    }

    /// Cancels the shared flag while processing its first chunk.
    #[derive(Debug)]
    struct CancellingHandler {
        flag: CancellationFlag,
    }

    #[async_trait]
    impl ChunkHandler<u32, u32> for CancellingHandler {
        async fn process_chunk(
            &self,
            chunk: Vec<u32>,
        ) -> std::result::Result<Vec<u32>, ProcessingError> {
            self.flag.cancel();
            Ok(chunk)
        }
    }

    #[tokio::test]
    async fn test_cancellation_fails_unscheduled_items() {
        let processor = BatchProcessor::new(config(BatchStrategy::Sequential, 5)).unwrap();
        let flag = CancellationFlag::new();
        let handler = Arc::new(CancellingHandler { flag: flag.clone() });

        let (outcomes, _) = processor.process((0..20).collect(), handler, &flag).await;

        assert_eq!(outcomes.len(), 20);
        assert!(outcomes[..5].iter().all(ItemOutcome::is_success));
        for outcome in &outcomes[5..] {
            assert_eq!(outcome.error(), Some(&ProcessingError::Cancelled));
        }
    }

    /// Rejects any chunk containing the poison value.
    #[derive(Debug)]
    struct PoisonHandler {
        poison: u32,
    }

    #[async_trait]
    impl ChunkHandler<u32, u32> for PoisonHandler {
        async fn process_chunk(
            &self,
            chunk: Vec<u32>,
        ) -> std::result::Result<Vec<u32>, ProcessingError> {
            if chunk.contains(&self.poison) {
                return Err(ProcessingError::Validation("poisoned chunk".into()));
            }
            Ok(chunk)
        }
    }

    #[tokio::test]
    async fn test_fail_fast_stops_after_terminal_chunk_failure() {
        let mut cfg = config(BatchStrategy::Sequential, 5);
        cfg.fail_fast = true;
        let processor = BatchProcessor::new(cfg).unwrap();

        let (outcomes, _) = processor
            .process(
                (0..15).collect(),
                Arc::new(PoisonHandler { poison: 7 }),
                &CancellationFlag::new(),
            )
            .await;

        assert!(outcomes[..5].iter().all(ItemOutcome::is_success));
        assert!(outcomes[5..10]
            .iter()
            .all(|o| matches!(o.error(), Some(ProcessingError::Validation(_)))));
        for outcome in &outcomes[10..] {
            assert_eq!(outcome.error(), Some(&ProcessingError::Cancelled));
        }
    }

    #[tokio::test]
    async fn test_memory_pressure_shrinks_chunk_sizes() {
        let mut cfg = config(BatchStrategy::MemoryAware, 100);
        cfg.memory_threshold_mb = 512;
        let monitor = Arc::new(FakeMemoryMonitor::reporting(2048));
        let processor = BatchProcessor::new(cfg)
            .unwrap()
            .with_memory_monitor(monitor);
        let handler = Arc::new(RecordingHandler::default());

        processor
            .process((0..200).collect(), handler.clone(), &CancellationFlag::new())
            .await;

        let sizes = handler.chunk_sizes.lock().clone();
        // Every chunk runs at 80% of the previous size while pressure holds.
        assert_eq!(sizes[0], 80);
        assert_eq!(sizes[1], 64);
        assert!(sizes.windows(2).all(|w| w[1] <= w[0]));
    }

    /// Per-chunk latency drops after the first two chunks, making larger
    /// chunks look more productive.
    #[derive(Debug, Default)]
    struct AcceleratingHandler {
        chunks_seen: AtomicU32,
        chunk_sizes: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl ChunkHandler<u32, u32> for AcceleratingHandler {
        async fn process_chunk(
            &self,
            chunk: Vec<u32>,
        ) -> std::result::Result<Vec<u32>, ProcessingError> {
            self.chunk_sizes.lock().push(chunk.len());
            let n = self.chunks_seen.fetch_add(1, Ordering::SeqCst);
            let delay = if n < 2 {
                Duration::from_secs(1)
            } else {
                Duration::from_millis(250)
            };
            tokio::time::sleep(delay).await;
            Ok(chunk)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_adaptive_grows_when_throughput_improves() {
        let mut cfg = config(BatchStrategy::Adaptive, 4);
        cfg.max_batch_size = 16;
        cfg.adaptive_window = 3;
        cfg.resize_step = 0.5;
        let processor = BatchProcessor::new(cfg).unwrap();
        let handler = Arc::new(AcceleratingHandler::default());

        let (outcomes, _) = processor
            .process((0..60).collect(), handler.clone(), &CancellationFlag::new())
            .await;

        assert!(outcomes.iter().all(ItemOutcome::is_success));
        let sizes = handler.chunk_sizes.lock().clone();
        assert!(
            sizes.iter().any(|&s| s > 4),
            "expected growth beyond base size, saw {sizes:?}"
        );
    }

    /// Sleeps long enough that only the first chunk beats the pool deadline
    /// when workers run one at a time.
    #[derive(Debug)]
    struct SlowHandler;

    #[async_trait]
    impl ChunkHandler<u32, u32> for SlowHandler {
        async fn process_chunk(
            &self,
            chunk: Vec<u32>,
        ) -> std::result::Result<Vec<u32>, ProcessingError> {
            tokio::time::sleep(Duration::from_millis(800)).await;
            Ok(chunk)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_pool_deadline_times_out_stragglers() {
        let mut cfg = config(BatchStrategy::Parallel, 5);
        cfg.worker_count = 1;
        cfg.batch_timeout = Duration::from_secs(1);
        let processor = BatchProcessor::new(cfg).unwrap();

        let (outcomes, _) = processor
            .process((0..15).collect(), Arc::new(SlowHandler), &CancellationFlag::new())
            .await;

        // First chunk completes at 800ms; the rest miss the 1s deadline.
        assert!(outcomes[..5].iter().all(ItemOutcome::is_success));
        for outcome in &outcomes[5..] {
            assert!(matches!(outcome.error(), Some(ProcessingError::Timeout(_))));
        }
    }

    #[tokio::test]
    async fn test_hybrid_picks_memory_aware_for_large_inputs() {
        let mut cfg = config(BatchStrategy::Hybrid, 5);
        cfg.worker_count = 4.min(crate::constants::max_worker_count());
        cfg.memory_threshold_mb = 512;
        let monitor = Arc::new(FakeMemoryMonitor::reporting(2048));
        let processor = BatchProcessor::new(cfg)
            .unwrap()
            .with_memory_monitor(monitor);
        let handler = Arc::new(RecordingHandler::default());

        // 100 items at base 5 is 20 waves, more than the worker pool, so
        // the memory-aware path runs and shrinks under pressure.
        processor
            .process((0..100).collect(), handler.clone(), &CancellationFlag::new())
            .await;
        assert!(handler.chunk_sizes.lock().iter().all(|&s| s < 5));
    }

    #[tokio::test]
    async fn test_hybrid_picks_parallel_for_small_inputs() {
        let mut cfg = config(BatchStrategy::Hybrid, 5);
        cfg.worker_count = 4.min(crate::constants::max_worker_count());
        cfg.memory_threshold_mb = 512;
        let monitor = Arc::new(FakeMemoryMonitor::reporting(2048));
        let processor = BatchProcessor::new(cfg)
            .unwrap()
            .with_memory_monitor(monitor);
        let handler = Arc::new(RecordingHandler::default());

        // 10 items at base 5 is 2 waves; parallel ignores memory pressure.
        processor
            .process((0..10).collect(), handler.clone(), &CancellationFlag::new())
            .await;
        assert_eq!(*handler.chunk_sizes.lock(), vec![5, 5]);
    }

    #[tokio::test]
    async fn test_progress_callback_sees_every_chunk() {
        let updates: Arc<Mutex<Vec<ProgressUpdate>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&updates);
        let processor = BatchProcessor::new(config(BatchStrategy::Sequential, 5))
            .unwrap()
            .with_progress(Arc::new(move |update| sink.lock().push(update)));

        processor
            .process(
                (0..12).collect(),
                Arc::new(RecordingHandler::default()),
                &CancellationFlag::new(),
            )
            .await;

        let updates = updates.lock();
        assert_eq!(updates.len(), 3);
        assert_eq!(updates.last().map(|u| u.processed), Some(12));
        assert_eq!(updates.last().map(|u| u.total), Some(12));
    }
}
