//! # Run Orchestration
//!
//! Ties the rate limiter, retry policy, and batch processor into one
//! entry point for migration runs, and folds their accounting into a
//! per-run performance summary.

pub mod metrics;
pub mod performance;

pub use metrics::{PerformanceSummary, RunMetrics};
pub use performance::{PerformanceOrchestrator, RunReport};
