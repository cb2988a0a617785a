//! # System Constants and Operational Boundaries
//!
//! Central definition of the numeric bounds every configuration surface is
//! validated against. Out-of-range values are rejected at construction time
//! with a [`ConstraintViolation`](crate::error::ConstraintViolation) naming
//! the parameter, the offending value, and the valid range.

use std::time::Duration;

/// Batch size bounds for chunk decomposition.
pub const MIN_BATCH_SIZE: usize = 1;
pub const MAX_BATCH_SIZE: usize = 500;

/// Minimum number of pool workers.
pub const MIN_WORKER_COUNT: usize = 1;

/// Rate limit bounds, expressed as requests per minute.
pub const MIN_REQUESTS_PER_MINUTE: u32 = 1;
pub const MAX_REQUESTS_PER_MINUTE: u32 = 6000;

/// Delay bounds shared by rate-limiter and retry configuration.
pub const MIN_DELAY: Duration = Duration::from_millis(1);
pub const MAX_DELAY: Duration = Duration::from_secs(300);

/// `max_delay` may never exceed `base_delay` by more than this factor;
/// prevents a misconfiguration from blocking a run indefinitely.
pub const MAX_DELAY_RATIO: u32 = 1000;

/// Fixed capacity of the per-limiter response-time history; the oldest
/// sample is evicted first.
pub const RESPONSE_HISTORY_CAPACITY: usize = 100;

/// Consecutive successes required before the adaptive strategy grows its
/// effective capacity.
pub const ADAPTIVE_SUCCESS_RUN: u32 = 10;

/// `X-RateLimit-Remaining` below this value forces an immediate halving of
/// effective capacity.
pub const REMAINING_HEADER_FLOOR: u32 = 5;

/// Memory-aware batching shrinks the next chunk by this factor when the
/// pressure threshold is exceeded.
pub const MEMORY_SHRINK_FACTOR: f64 = 0.8;

/// Throughput must move by at least this fraction before the adaptive batch
/// strategy resizes.
pub const ADAPTIVE_THROUGHPUT_TOLERANCE: f64 = 0.10;

/// Default rolling window (in chunks) for adaptive throughput comparison.
pub const DEFAULT_ADAPTIVE_WINDOW: usize = 5;

/// Default base delay for cache refresh retries (0.5s, doubled per attempt).
pub const CACHE_REFRESH_BASE_DELAY: Duration = Duration::from_millis(500);

/// Maximum worker count: twice the detected CPU core count.
///
/// Core detection is best-effort; a detection failure falls back to a single
/// core rather than blocking startup.
pub fn max_worker_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1);
    cores * 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_bounds_are_ordered() {
        assert!(MIN_DELAY < MAX_DELAY);
    }

    #[test]
    fn test_max_worker_count_is_positive_and_even() {
        let max = max_worker_count();
        assert!(max >= 2);
        assert_eq!(max % 2, 0);
    }

    #[test]
    fn test_batch_bounds() {
        assert!(MIN_BATCH_SIZE <= MAX_BATCH_SIZE);
        assert_eq!(MAX_BATCH_SIZE, 500);
    }
}
