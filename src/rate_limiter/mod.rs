//! # Adaptive Rate Limiting
//!
//! Decides, per logical endpoint, whether a call may proceed now or must
//! wait, and adapts its effective rate from live response signals: observed
//! latencies, HTTP status codes, and rate-limit response headers.
//!
//! ## Architecture
//!
//! - [`RateLimiterConfig`] / [`RateLimitStrategy`]: validated-at-construction
//!   configuration selecting token-bucket, sliding-window, fixed-window,
//!   adaptive, or burst behavior
//! - [`RateLimiter`]: the per-endpoint limiter with `try_acquire`,
//!   `wait_if_needed`, and `record_response` feedback, including a
//!   consecutive-5xx circuit breaker
//! - [`RateLimitHeaders`]: typed view over `Retry-After`,
//!   `X-RateLimit-Remaining`, and `X-RateLimit-Reset`
//! - [`RateLimiterRegistry`]: explicit per-endpoint registry owned by the
//!   orchestrator; there is no process-wide ambient state

pub mod config;
pub mod headers;
pub mod limiter;
pub mod registry;

pub use config::{RateLimitStrategy, RateLimiterConfig};
pub use headers::RateLimitHeaders;
pub use limiter::{RateLimiter, RateLimiterSnapshot};
pub use registry::RateLimiterRegistry;
