//! # Staleness-Aware Caching
//!
//! Read-through TTL caching for slowly-changing lookup data, with retried
//! refresh and configurable fallback when the source of truth cannot be
//! reached.
//!
//! ## Architecture
//!
//! - [`CacheEntry`]: value plus wall-clock refresh timestamp and metadata
//! - [`EntryRefresher`]: injected source-of-truth lookup with optional
//!   value validation
//! - [`FallbackPolicy`]: what a caller sees after a terminal refresh
//!   failure (skip, admin substitution, tagged placeholder)
//! - [`StalenessCache`]: the cache itself, with per-key refresh coalescing

pub mod entry;
pub mod fallback;
pub mod staleness_cache;

pub use entry::CacheEntry;
pub use fallback::{
    FallbackKind, FallbackPolicy, PlaceholderFactory, FALLBACK_TAG, MANUAL_REVIEW_TAG,
};
pub use staleness_cache::{
    CacheMetricsSnapshot, EntryRefresher, LookupOutcome, StalenessCache, StalenessCacheConfig,
};
