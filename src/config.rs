//! Aggregate configuration for the migration core.
//!
//! One [`PerformanceConfig`] carries the rate-limiter, retry, and batch
//! sections; validation folds every section's violations into a single
//! report so an operator fixes a bad deployment in one pass.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::batch::BatchConfig;
use crate::error::{ConstraintViolation, Result, TransitError};
use crate::rate_limiter::RateLimiterConfig;
use crate::retry::RetryConfig;

/// Top-level configuration consumed by the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub rate_limiter: RateLimiterConfig,
    pub retry: RetryConfig,
    pub batch: BatchConfig,
}

impl PerformanceConfig {
    /// Validate every section, collecting all violations.
    pub fn validate(&self) -> Result<()> {
        let mut violations = Vec::new();
        for result in [
            self.rate_limiter.validate(),
            self.retry.validate(),
            self.batch.validate(),
        ] {
            if let Err(TransitError::Configuration {
                violations: section,
            }) = result
            {
                violations.extend(section);
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(TransitError::Configuration { violations })
        }
    }

    /// Defaults overridden from `TRANSIT_*` environment variables. The
    /// result is validated before being returned.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(max_requests) = parse_var("TRANSIT_MAX_REQUESTS")? {
            config.rate_limiter.max_requests = max_requests;
        }
        if let Some(window_secs) = parse_var::<u64>("TRANSIT_TIME_WINDOW_SECS")? {
            config.rate_limiter.time_window = Duration::from_secs(window_secs);
        }
        if let Some(max_attempts) = parse_var("TRANSIT_MAX_ATTEMPTS")? {
            config.retry.max_attempts = max_attempts;
        }
        if let Some(batch_size) = parse_var("TRANSIT_BATCH_SIZE")? {
            config.batch.base_batch_size = batch_size;
        }
        if let Some(worker_count) = parse_var("TRANSIT_WORKER_COUNT")? {
            config.batch.worker_count = worker_count;
        }
        if let Some(timeout_secs) = parse_var::<u64>("TRANSIT_BATCH_TIMEOUT_SECS")? {
            config.batch.batch_timeout = Duration::from_secs(timeout_secs);
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse().map(Some).map_err(|e| {
            TransitError::configuration(ConstraintViolation::new(
                name,
                raw,
                format!("parseable value ({e})"),
            ))
        }),
        Err(_) => Ok(None),
    }
}
