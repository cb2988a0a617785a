#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Transit Core
//!
//! Resilience and throughput engine for bulk data migration against
//! rate-limited remote services.
//!
//! ## Overview
//!
//! Transit Core provides the machinery a migration tool needs to move large
//! item sets through a hostile network environment: adaptive rate limiting
//! with circuit breaking, multi-strategy retry with backoff and jitter,
//! chunked batch processing with ordered results, and staleness-aware
//! caching of slowly-changing lookup data.
//!
//! ## Architecture
//!
//! The [`PerformanceOrchestrator`] is the front door: it wraps a
//! caller-supplied chunk handler so every attempt first waits on the
//! endpoint's rate limiter and afterwards feeds the response signal back
//! into it, while the batch processor handles chunking, retries, and
//! ordered result collection.
//!
//! ## Module Organization
//!
//! - [`rate_limiter`] - Per-endpoint adaptive rate limiting and circuit breaking
//! - [`retry`] - Backoff strategies and the retry executor
//! - [`batch`] - Chunked batch processing with adaptive sizing
//! - [`cache`] - Staleness-aware read-through caching with fallbacks
//! - [`orchestrator`] - Run coordination and performance summaries
//! - [`config`] - Aggregate configuration management
//! - [`error`] - Structured error handling and the failure taxonomy
//! - [`logging`] - Structured console and file logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use transit_core::{PerformanceConfig, PerformanceOrchestrator};
//! use transit_core::batch::ChunkHandler;
//! use transit_core::error::ProcessingError;
//!
//! struct Uploader;
//!
//! #[async_trait::async_trait]
//! impl ChunkHandler<String, String> for Uploader {
//!     async fn process_chunk(
//!         &self,
//!         chunk: Vec<String>,
//!     ) -> Result<Vec<String>, ProcessingError> {
//!         // Call the remote service here.
//!         Ok(chunk)
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = PerformanceOrchestrator::new(PerformanceConfig::default())?;
//! let report = orchestrator
//!     .process_batch("users", vec!["a".into(), "b".into()], Arc::new(Uploader))
//!     .await?;
//! println!("succeeded: {}", report.summary.items_succeeded);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod rate_limiter;
pub mod retry;

pub use batch::{
    BatchConfig, BatchProcessor, BatchStrategy, CancellationFlag, ChunkHandler, ItemOutcome,
    ProgressUpdate,
};
pub use cache::{
    EntryRefresher, FallbackKind, FallbackPolicy, LookupOutcome, StalenessCache,
    StalenessCacheConfig,
};
pub use config::PerformanceConfig;
pub use error::{ConstraintViolation, ErrorKind, ProcessingError, Result, TransitError};
pub use orchestrator::{PerformanceOrchestrator, PerformanceSummary, RunReport};
pub use rate_limiter::{
    RateLimitHeaders, RateLimitStrategy, RateLimiter, RateLimiterConfig, RateLimiterRegistry,
};
pub use retry::{BackoffStrategy, RetryConfig, RetryExecutor, RetryOutcome};
