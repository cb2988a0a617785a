//! # Retry Management
//!
//! Wraps a single operation with a bounded number of attempts, computing the
//! inter-attempt delay from a selectable backoff algorithm and consulting a
//! retryability classification before each retry.
//!
//! ## Architecture
//!
//! - [`BackoffStrategy`] + [`compute_delay`]: pure delay math (exponential,
//!   linear, fixed, fibonacci) with a `max_delay` cap and optional jitter
//! - [`RetryConfig`]: plain-data configuration, validated at construction
//! - [`RetryExecutor`]: the attempt loop; surfaces the terminal outcome in a
//!   [`RetryOutcome`] that carries the attempt count and cumulative delay

pub mod backoff;
pub mod executor;

pub use backoff::{apply_jitter, compute_delay, BackoffStrategy};
pub use executor::{RetryConfig, RetryExecutor, RetryOutcome};
