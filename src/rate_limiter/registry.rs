//! # Rate Limiter Registry
//!
//! Explicit per-endpoint registry of limiters. Owned by whoever coordinates
//! the migration run; nothing in this crate keeps ambient global state.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::Result;
use crate::rate_limiter::config::RateLimiterConfig;
use crate::rate_limiter::limiter::{RateLimiter, RateLimiterSnapshot};

/// Concurrent map of endpoint name to limiter. Cloning the registry is cheap
/// and shares the underlying limiters.
#[derive(Debug, Clone)]
pub struct RateLimiterRegistry {
    default_config: RateLimiterConfig,
    limiters: Arc<DashMap<String, Arc<RateLimiter>>>,
}

impl RateLimiterRegistry {
    /// Registry whose lazily created limiters use `default_config`. The
    /// config is validated once here rather than on every endpoint miss.
    pub fn new(default_config: RateLimiterConfig) -> Result<Self> {
        default_config.validate()?;
        Ok(Self {
            default_config,
            limiters: Arc::new(DashMap::new()),
        })
    }

    /// Fetch the limiter for `endpoint`, creating one from the default
    /// config on first use.
    pub fn for_endpoint(&self, endpoint: &str) -> Arc<RateLimiter> {
        if let Some(existing) = self.limiters.get(endpoint) {
            return Arc::clone(existing.value());
        }

        // Entry API keeps a concurrent first-use race from producing two
        // live limiters for the same endpoint.
        self.limiters
            .entry(endpoint.to_string())
            .or_insert_with(|| {
                debug!(endpoint, "Creating rate limiter from default config");
                // Config was validated in `new`, construction cannot fail.
                Arc::new(
                    RateLimiter::new(endpoint, self.default_config.clone())
                        .unwrap_or_else(|_| unreachable!("default config validated at registry construction")),
                )
            })
            .value()
            .clone()
    }

    /// Register an endpoint with its own tuned configuration, replacing any
    /// limiter created earlier for that endpoint.
    pub fn register(&self, endpoint: &str, config: RateLimiterConfig) -> Result<Arc<RateLimiter>> {
        let limiter = Arc::new(RateLimiter::new(endpoint, config)?);
        self.limiters
            .insert(endpoint.to_string(), Arc::clone(&limiter));
        Ok(limiter)
    }

    /// Snapshots for every registered endpoint, for run-end reporting.
    pub fn snapshots(&self) -> Vec<RateLimiterSnapshot> {
        self.limiters
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}
