//! # Retry Executor
//!
//! The attempt loop: runs an operation up to `max_attempts` times, sleeping
//! the computed backoff delay between attempts. Retry is gated on the
//! failure's [`ErrorKind`] against the configured retryable/non-retryable
//! sets; an optional result predicate can force a retry even when the
//! operation returned `Ok` (a 200-status response whose body signals a soft
//! failure).
//!
//! No delay is issued after the final attempt, and on exhaustion the last
//! failure is returned verbatim, never swallowed or rewrapped.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::constants::{MAX_DELAY, MAX_DELAY_RATIO, MIN_DELAY};
use crate::error::{ConstraintViolation, ErrorKind, ProcessingError, Result, TransitError};
use crate::retry::backoff::{apply_jitter, compute_delay, BackoffStrategy};

/// Retry configuration. Plain data; validated once at construction of the
/// component that owns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (>= 0). Zero means the operation is never
    /// invoked and the outcome is an immediate validation failure.
    pub max_attempts: u32,
    /// Backoff algorithm for inter-attempt delays.
    pub strategy: BackoffStrategy,
    /// Base delay fed into the backoff formula.
    pub base_delay: Duration,
    /// Upper bound on any single inter-attempt delay.
    pub max_delay: Duration,
    /// Multiplier for the exponential strategy.
    pub backoff_multiplier: f64,
    /// Whether to jitter computed delays.
    pub jitter: bool,
    /// Jitter magnitude as a fraction of the computed delay.
    pub jitter_factor: f64,
    /// Failure kinds eligible for retry. Empty means "all kinds".
    pub retryable_kinds: Vec<ErrorKind>,
    /// Failure kinds never retried, checked after `retryable_kinds`.
    pub non_retryable_kinds: Vec<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            jitter: true,
            jitter_factor: 0.1,
            retryable_kinds: vec![ErrorKind::Transient],
            non_retryable_kinds: vec![ErrorKind::Permanent, ErrorKind::Configuration],
        }
    }
}

impl RetryConfig {
    /// Validate every constraint, collecting all violations.
    pub fn validate(&self) -> Result<()> {
        let mut violations = Vec::new();

        if self.base_delay < MIN_DELAY || self.base_delay > MAX_DELAY {
            violations.push(ConstraintViolation::new(
                "retry.base_delay",
                format!("{:?}", self.base_delay),
                format!("{MIN_DELAY:?}..={MAX_DELAY:?}"),
            ));
        }
        if self.max_delay < self.base_delay {
            violations.push(ConstraintViolation::new(
                "retry.max_delay",
                format!("{:?}", self.max_delay),
                format!(">= base_delay ({:?})", self.base_delay),
            ));
        }
        if self.max_delay > self.base_delay * MAX_DELAY_RATIO {
            violations.push(ConstraintViolation::new(
                "retry.max_delay",
                format!("{:?}", self.max_delay),
                format!("<= {MAX_DELAY_RATIO} x base_delay"),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            violations.push(ConstraintViolation::new(
                "retry.backoff_multiplier",
                self.backoff_multiplier,
                ">= 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            violations.push(ConstraintViolation::new(
                "retry.jitter_factor",
                self.jitter_factor,
                "0.0..=1.0",
            ));
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(TransitError::Configuration { violations })
        }
    }

    /// Whether a failure of this kind may be retried.
    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        let allowed = self.retryable_kinds.is_empty() || self.retryable_kinds.contains(&kind);
        allowed && !self.non_retryable_kinds.contains(&kind)
    }
}

/// Terminal outcome of a retried operation.
///
/// Created fresh per invocation; never shared across tasks.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Final value or the last failure, verbatim.
    pub result: std::result::Result<T, ProcessingError>,
    /// Attempts actually made (1-based count; 0 if `max_attempts` was 0).
    pub attempts: u32,
    /// Cumulative inter-attempt delay issued.
    pub total_delay: Duration,
}

impl<T> RetryOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> std::result::Result<T, ProcessingError> {
        self.result
    }
}

/// Executes operations under the configured retry policy.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create an executor, failing fast on invalid configuration.
    pub fn new(config: RetryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` under the retry policy.
    ///
    /// `operation` is invoked once per attempt and must therefore be
    /// re-invocable (`FnMut` producing a fresh future each call).
    pub async fn run<T, F, Fut>(&self, operation: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ProcessingError>>,
    {
        self.run_with_result_check(operation, |_: &T| false).await
    }

    /// Like [`run`](Self::run), but a successful result for which
    /// `should_retry` returns `true` is treated as retryable anyway. Used
    /// when the remote service hides failures inside 200-status bodies.
    pub async fn run_with_result_check<T, F, Fut, P>(
        &self,
        mut operation: F,
        should_retry: P,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ProcessingError>>,
        P: Fn(&T) -> bool,
    {
        let max_attempts = self.config.max_attempts;
        if max_attempts == 0 {
            return RetryOutcome {
                result: Err(ProcessingError::Validation(
                    "max_attempts is 0: no attempts permitted".to_string(),
                )),
                attempts: 0,
                total_delay: Duration::ZERO,
            };
        }

        let mut total_delay = Duration::ZERO;
        let mut last_success: Option<T> = None;

        for attempt in 0..max_attempts {
            let is_final = attempt + 1 == max_attempts;

            match operation().await {
                Ok(value) => {
                    if !is_final && should_retry(&value) {
                        debug!(
                            attempt = attempt + 1,
                            "Result-based predicate requested retry of a successful response"
                        );
                        last_success = Some(value);
                        total_delay += self.sleep_before_next(attempt).await;
                        continue;
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt + 1,
                        total_delay,
                    };
                }
                Err(error) => {
                    let kind = error.kind();
                    if is_final || !self.config.is_retryable(kind) {
                        if !is_final {
                            debug!(
                                attempt = attempt + 1,
                                kind = ?kind,
                                error = %error,
                                "Failure is not retryable, surfacing immediately"
                            );
                        } else {
                            warn!(
                                attempts = max_attempts,
                                error = %error,
                                "Retry attempts exhausted"
                            );
                        }
                        return RetryOutcome {
                            result: Err(error),
                            attempts: attempt + 1,
                            total_delay,
                        };
                    }

                    debug!(
                        attempt = attempt + 1,
                        max_attempts,
                        kind = ?kind,
                        error = %error,
                        "Attempt failed, backing off before retry"
                    );
                    total_delay += self.sleep_before_next(attempt).await;
                }
            }
        }

        // Only reachable when the predicate kept rejecting successful
        // results through the final attempt; the last success stands.
        match last_success {
            Some(value) => RetryOutcome {
                result: Ok(value),
                attempts: max_attempts,
                total_delay,
            },
            None => RetryOutcome {
                result: Err(ProcessingError::Validation(
                    "retry loop ended without an outcome".to_string(),
                )),
                attempts: max_attempts,
                total_delay,
            },
        }
    }

    async fn sleep_before_next(&self, attempt: u32) -> Duration {
        let mut delay = compute_delay(&self.config, attempt);
        if self.config.jitter {
            delay = apply_jitter(delay, self.config.jitter_factor, self.config.max_delay);
        }
        tokio::time::sleep(delay).await;
        delay
    }
}
