//! # Rate Limiter Configuration
//!
//! All bounds are validated once at limiter construction; call sites never
//! revalidate. Validation collects every violated constraint so one pass
//! over the error fixes the deployment.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    MAX_DELAY, MAX_DELAY_RATIO, MAX_REQUESTS_PER_MINUTE, MIN_DELAY, MIN_REQUESTS_PER_MINUTE,
};
use crate::error::{ConstraintViolation, Result, TransitError};

/// Rate limiting algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    /// Tokens refill continuously at `max_requests / time_window`.
    TokenBucket,
    /// Timestamp log pruned to the trailing window before counting.
    SlidingWindow,
    /// Counter reset at fixed window boundaries.
    FixedWindow,
    /// Token bucket whose effective capacity shrinks on failures and grows
    /// back after sustained success.
    Adaptive,
    /// Secondary burst pool drained first, recovering linearly.
    Burst,
}

impl RateLimitStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            RateLimitStrategy::TokenBucket => "token_bucket",
            RateLimitStrategy::SlidingWindow => "sliding_window",
            RateLimitStrategy::FixedWindow => "fixed_window",
            RateLimitStrategy::Adaptive => "adaptive",
            RateLimitStrategy::Burst => "burst",
        }
    }
}

/// Configuration for a single endpoint's rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Algorithm to apply.
    pub strategy: RateLimitStrategy,
    /// Delay applied when computing 429 backoff without a `Retry-After`.
    pub base_delay: Duration,
    /// Lower clamp on any wait issued by `wait_if_needed`.
    pub min_delay: Duration,
    /// Upper clamp on waits; also the circuit-breaker cooldown.
    pub max_delay: Duration,
    /// Steady-state permit budget per `time_window`.
    pub max_requests: u32,
    /// Window the permit budget applies to.
    pub time_window: Duration,
    /// Capacity of the secondary burst pool (Burst strategy).
    pub burst_capacity: u32,
    /// Burst pool recovery in tokens per second (Burst strategy).
    pub burst_recovery_rate: f64,
    /// Consecutive 5xx responses that open the circuit breaker.
    pub circuit_breaker_threshold: u32,
    /// Multiplicative capacity shrink on failure (Adaptive strategy).
    pub adaptive_factor: f64,
    /// Multiplicative capacity growth after a success run (Adaptive).
    pub recovery_factor: f64,
    /// Rolling average latency above this shrinks adaptive capacity.
    pub latency_threshold: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            strategy: RateLimitStrategy::TokenBucket,
            base_delay: Duration::from_millis(100),
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(30),
            max_requests: 100,
            time_window: Duration::from_secs(60),
            burst_capacity: 10,
            burst_recovery_rate: 1.0,
            circuit_breaker_threshold: 5,
            adaptive_factor: 0.5,
            recovery_factor: 1.5,
            latency_threshold: Duration::from_secs(2),
        }
    }
}

impl RateLimiterConfig {
    /// Validate every constraint, collecting all violations.
    pub fn validate(&self) -> Result<()> {
        let mut violations = Vec::new();

        if self.min_delay < MIN_DELAY || self.min_delay > MAX_DELAY {
            violations.push(ConstraintViolation::new(
                "rate_limiter.min_delay",
                format!("{:?}", self.min_delay),
                format!("{MIN_DELAY:?}..={MAX_DELAY:?}"),
            ));
        }
        if self.base_delay < self.min_delay {
            violations.push(ConstraintViolation::new(
                "rate_limiter.base_delay",
                format!("{:?}", self.base_delay),
                format!(">= min_delay ({:?})", self.min_delay),
            ));
        }
        if self.max_delay < self.base_delay {
            violations.push(ConstraintViolation::new(
                "rate_limiter.max_delay",
                format!("{:?}", self.max_delay),
                format!(">= base_delay ({:?})", self.base_delay),
            ));
        }
        if self.max_delay > self.base_delay * MAX_DELAY_RATIO {
            violations.push(ConstraintViolation::new(
                "rate_limiter.max_delay",
                format!("{:?}", self.max_delay),
                format!("<= {MAX_DELAY_RATIO} x base_delay"),
            ));
        }
        if self.time_window.is_zero() || self.time_window > Duration::from_secs(3600) {
            violations.push(ConstraintViolation::new(
                "rate_limiter.time_window",
                format!("{:?}", self.time_window),
                "positive, at most 1h",
            ));
        } else {
            let per_minute = self.requests_per_minute();
            if !(MIN_REQUESTS_PER_MINUTE..=MAX_REQUESTS_PER_MINUTE).contains(&per_minute) {
                violations.push(ConstraintViolation::new(
                    "rate_limiter.max_requests",
                    format!("{} per {:?} ({per_minute}/min)", self.max_requests, self.time_window),
                    format!("{MIN_REQUESTS_PER_MINUTE}..={MAX_REQUESTS_PER_MINUTE} requests/minute"),
                ));
            }
        }

        if self.strategy == RateLimitStrategy::Burst {
            if self.burst_capacity == 0 {
                violations.push(ConstraintViolation::new(
                    "rate_limiter.burst_capacity",
                    self.burst_capacity,
                    ">= 1",
                ));
            }
            if self.burst_recovery_rate <= 0.0 {
                violations.push(ConstraintViolation::new(
                    "rate_limiter.burst_recovery_rate",
                    self.burst_recovery_rate,
                    "> 0.0 tokens/second",
                ));
            }
        }

        if self.strategy == RateLimitStrategy::Adaptive {
            if !(0.0..1.0).contains(&self.adaptive_factor) || self.adaptive_factor == 0.0 {
                violations.push(ConstraintViolation::new(
                    "rate_limiter.adaptive_factor",
                    self.adaptive_factor,
                    "0.0 < factor < 1.0",
                ));
            }
            if self.recovery_factor < 1.0 {
                violations.push(ConstraintViolation::new(
                    "rate_limiter.recovery_factor",
                    self.recovery_factor,
                    ">= 1.0",
                ));
            }
        }

        if self.circuit_breaker_threshold == 0 {
            violations.push(ConstraintViolation::new(
                "rate_limiter.circuit_breaker_threshold",
                self.circuit_breaker_threshold,
                ">= 1",
            ));
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(TransitError::Configuration { violations })
        }
    }

    /// Steady-state permit budget normalized to a per-minute rate.
    pub fn requests_per_minute(&self) -> u32 {
        let window_secs = self.time_window.as_secs_f64();
        if window_secs <= 0.0 {
            return 0;
        }
        ((self.max_requests as f64) * 60.0 / window_secs).round() as u32
    }

    /// Steady-state refill rate in permits per second.
    pub fn refill_rate(&self) -> f64 {
        self.max_requests as f64 / self.time_window.as_secs_f64()
    }
}
