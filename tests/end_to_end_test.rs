//! End-to-end runs through the orchestrator: rate limiting, retries, and
//! batching working together against a simulated flaky remote service.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use transit_core::batch::{BatchStrategy, ChunkHandler, ItemOutcome};
use transit_core::error::ProcessingError;
use transit_core::retry::{BackoffStrategy, RetryConfig};
use transit_core::{PerformanceConfig, PerformanceOrchestrator};

fn migration_config() -> PerformanceConfig {
    let mut config = PerformanceConfig::default();
    config.batch.strategy = BatchStrategy::Sequential;
    config.batch.min_batch_size = 1;
    config.batch.base_batch_size = 100;
    config.retry = RetryConfig {
        max_attempts: 3,
        strategy: BackoffStrategy::Fixed,
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_secs(5),
        jitter: false,
        ..RetryConfig::default()
    };
    config
}

/// Simulated service that drops every fifth call with a transient network
/// error; the retry of such a call always lands on a good one.
struct FlakyService {
    calls: AtomicU32,
}

#[async_trait]
impl ChunkHandler<u64, u64> for FlakyService {
    async fn process_chunk(&self, chunk: Vec<u64>) -> Result<Vec<u64>, ProcessingError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n % 5 == 3 {
            return Err(ProcessingError::Network("connection reset".into()));
        }
        Ok(chunk.into_iter().map(|item| item + 1_000_000).collect())
    }
}

#[tokio::test(start_paused = true)]
async fn test_thousand_items_survive_transient_failures() {
    let orchestrator = PerformanceOrchestrator::new(migration_config()).unwrap();
    let handler = Arc::new(FlakyService {
        calls: AtomicU32::new(0),
    });
    let items: Vec<u64> = (0..1000).collect();

    let report = orchestrator
        .process_batch("records", items.clone(), handler.clone())
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 1000);
    assert!(report.outcomes.iter().all(ItemOutcome::is_success));
    for (item, outcome) in items.iter().zip(&report.outcomes) {
        assert_eq!(outcome.value(), Some(&(item + 1_000_000)));
    }

    // 10 chunks plus at least two retried calls.
    assert!(handler.calls.load(Ordering::SeqCst) > 10);
    assert!(report.batch_metrics.retries > 0);
    assert_eq!(report.summary.items_total, 1000);
    assert_eq!(report.summary.items_succeeded, 1000);
    assert_eq!(report.summary.success_rate, 1.0);
    assert!(report.summary.chunk_failures > 0);
}

/// Doubles items after a value-dependent delay so chunks finish out of
/// submission order.
struct ScramblingService;

#[async_trait]
impl ChunkHandler<u64, u64> for ScramblingService {
    async fn process_chunk(&self, chunk: Vec<u64>) -> Result<Vec<u64>, ProcessingError> {
        let delay = 100u64.saturating_sub(chunk[0]);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(chunk.into_iter().map(|item| item * 2).collect())
    }
}

#[tokio::test(start_paused = true)]
async fn test_parallel_run_preserves_input_order() {
    let mut config = migration_config();
    config.batch.strategy = BatchStrategy::Parallel;
    config.batch.base_batch_size = 10;
    config.batch.worker_count = 4.min(transit_core::constants::max_worker_count());
    let orchestrator = PerformanceOrchestrator::new(config).unwrap();
    let items: Vec<u64> = (0..100).collect();

    let report = orchestrator
        .process_batch("records", items.clone(), Arc::new(ScramblingService))
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 100);
    for (item, outcome) in items.iter().zip(&report.outcomes) {
        assert_eq!(outcome.value(), Some(&(item * 2)));
    }
}

/// Always fails with a 500 so the limiter's circuit breaker opens.
struct BrokenService;

#[async_trait]
impl ChunkHandler<u64, u64> for BrokenService {
    async fn process_chunk(&self, _chunk: Vec<u64>) -> Result<Vec<u64>, ProcessingError> {
        Err(ProcessingError::Server {
            status: 500,
            message: "internal error".into(),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_sustained_server_errors_trip_the_circuit_breaker() {
    let mut config = migration_config();
    config.batch.base_batch_size = 5;
    config.retry.max_attempts = 1;
    config.rate_limiter.circuit_breaker_threshold = 2;
    config.rate_limiter.max_delay = Duration::from_secs(2);
    let orchestrator = PerformanceOrchestrator::new(config).unwrap();

    let report = orchestrator
        .process_batch("broken", (0..20).collect(), Arc::new(BrokenService))
        .await
        .unwrap();

    assert!(report.outcomes.iter().all(|o| !o.is_success()));
    assert!(report.rate_limiter.circuit_breaker_trips >= 1);
    assert_eq!(report.summary.items_failed, 20);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_run_reports_wait_time() {
    let mut config = migration_config();
    config.batch.base_batch_size = 10;
    config.rate_limiter.max_requests = 1;
    config.rate_limiter.time_window = Duration::from_secs(1);
    let orchestrator = PerformanceOrchestrator::new(config).unwrap();

    // 50 items in chunks of 10: five permits at one per second.
    let report = orchestrator
        .process_batch("throttled", (0..50).collect(), Arc::new(ScramblingService))
        .await
        .unwrap();

    assert!(report.outcomes.iter().all(ItemOutcome::is_success));
    assert!(report.summary.wait_ms > 0);
    assert!(report.summary.efficiency < 1.0);
}
