//! # Backoff Algorithms
//!
//! Pure delay computation for retry attempts. All strategies cap at the
//! configured `max_delay`; jitter is applied afterwards and re-clamped so a
//! perturbed delay never goes negative or above the cap.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::executor::RetryConfig;

/// Selectable backoff algorithm for inter-attempt delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `base * multiplier^attempt`
    Exponential,
    /// `base * (attempt + 1)`
    Linear,
    /// `base` for every attempt
    Fixed,
    /// `base * fib(attempt + 1)` with `fib(1) = fib(2) = 1`
    Fibonacci,
}

/// Compute the delay to sleep after attempt `attempt` (0-indexed), before
/// the next attempt starts. Capped at `config.max_delay`; jitter is NOT
/// applied here (see [`apply_jitter`]).
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.base_delay;
    let raw = match config.strategy {
        BackoffStrategy::Exponential => {
            // Computed in f64 seconds; large exponents would overflow a
            // Duration multiply long before the cap applies.
            let secs = base.as_secs_f64() * config.backoff_multiplier.powi(attempt as i32);
            if secs.is_finite() && secs < config.max_delay.as_secs_f64() {
                Duration::from_secs_f64(secs)
            } else {
                config.max_delay
            }
        }
        BackoffStrategy::Linear => base.saturating_mul(attempt + 1),
        BackoffStrategy::Fixed => base,
        BackoffStrategy::Fibonacci => base.saturating_mul(fibonacci(attempt + 1)),
    };
    raw.min(config.max_delay)
}

/// Perturb `delay` by up to ±(delay × jitter_factor), clamped to the
/// `[0, max_delay]` range. Jitter desynchronizes retry storms across many
/// concurrent callers.
pub fn apply_jitter(delay: Duration, jitter_factor: f64, max_delay: Duration) -> Duration {
    if jitter_factor <= 0.0 {
        return delay;
    }
    // fastrand::f64 is in [0, 1); shift to [-1, 1).
    let perturbation = (fastrand::f64() * 2.0 - 1.0) * jitter_factor;
    let factor = (1.0 + perturbation).max(0.0);
    delay.mul_f64(factor).min(max_delay)
}

/// `fib(1) = fib(2) = 1`, computed iteratively. Saturates rather than
/// overflowing for absurd attempt counts.
fn fibonacci(n: u32) -> u32 {
    match n {
        0 => 0,
        1 | 2 => 1,
        _ => {
            let (mut prev, mut curr) = (1u32, 1u32);
            for _ in 2..n {
                let next = prev.saturating_add(curr);
                prev = curr;
                curr = next;
            }
            curr
        }
    }
}
