//! # Staleness-Aware Read-Through Cache
//!
//! TTL cache over slowly-changing lookup data (owners, groups, mappings).
//! A lookup that finds a fresh entry returns it immediately; a miss or a
//! stale entry triggers a bounded, retried refresh through the injected
//! [`EntryRefresher`], with a per-key async lock so concurrent lookups of
//! the same key coalesce into one refresh.
//!
//! When a refresh fails terminally the configured [`FallbackPolicy`]
//! decides what the caller sees; substituted values are tagged so reports
//! can route them to manual review.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::entry::CacheEntry;
use crate::cache::fallback::{FallbackKind, FallbackPolicy, FALLBACK_TAG, MANUAL_REVIEW_TAG};
use crate::constants::CACHE_REFRESH_BASE_DELAY;
use crate::error::{ConstraintViolation, ProcessingError, Result, TransitError};
use crate::retry::{BackoffStrategy, RetryConfig, RetryExecutor};

/// Fetches the authoritative value for a key. Implementations wrap the
/// remote lookup; `validate` lets them reject structurally present but
/// unusable values (deactivated accounts, tombstones).
#[async_trait]
pub trait EntryRefresher<V>: Send + Sync {
    async fn refresh(&self, key: &str) -> std::result::Result<V, ProcessingError>;

    fn validate(&self, _key: &str, _value: &V) -> bool {
        true
    }
}

/// Cache tuning. The refresh retry policy is derived from these fields:
/// exponential backoff from `refresh_base_delay`, capped at
/// `refresh_max_delay`, without jitter (refreshes already serialize per
/// key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StalenessCacheConfig {
    /// Age beyond which an entry must be refreshed before use.
    pub ttl: Duration,
    /// Refresh attempts per lookup before the fallback policy applies.
    pub refresh_attempts: u32,
    pub refresh_base_delay: Duration,
    pub refresh_max_delay: Duration,
}

impl Default for StalenessCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            refresh_attempts: 3,
            refresh_base_delay: CACHE_REFRESH_BASE_DELAY,
            refresh_max_delay: Duration::from_secs(30),
        }
    }
}

impl StalenessCacheConfig {
    pub fn validate(&self) -> Result<()> {
        let mut violations = Vec::new();

        if self.ttl.is_zero() || self.ttl > Duration::from_secs(86_400) {
            violations.push(ConstraintViolation::new(
                "cache.ttl",
                format!("{:?}", self.ttl),
                "positive, at most 24h",
            ));
        }

        let retry = self.retry_config();
        if let Err(TransitError::Configuration {
            violations: retry_violations,
        }) = retry.validate()
        {
            violations.extend(retry_violations);
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(TransitError::Configuration { violations })
        }
    }

    fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.refresh_attempts,
            strategy: BackoffStrategy::Exponential,
            base_delay: self.refresh_base_delay,
            max_delay: self.refresh_max_delay,
            backoff_multiplier: 2.0,
            jitter: false,
            ..RetryConfig::default()
        }
    }
}

/// What a lookup produced, including how it got there.
#[derive(Debug, Clone)]
pub struct LookupOutcome<V> {
    /// The resolved value, possibly substituted by a fallback.
    pub value: Option<V>,
    /// Refresher attempts made for this lookup; 0 on a fresh hit.
    pub attempts: u32,
    /// Which fallback was applied, if any.
    pub fallback: Option<FallbackKind>,
    /// The terminal refresh failure, when one occurred.
    pub error: Option<ProcessingError>,
}

/// Atomic lookup counters for run-end reporting.
#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    staleness_events: AtomicU64,
    refresh_attempts: AtomicU64,
    refresh_successes: AtomicU64,
    fallbacks_applied: AtomicU64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub staleness_events: u64,
    pub refresh_attempts: u64,
    pub refresh_successes: u64,
    pub fallbacks_applied: u64,
}

impl CacheMetricsSnapshot {
    /// Fraction of lookups served without a refresh, in `[0, 1]`.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses + self.staleness_events;
        if lookups == 0 {
            return 1.0;
        }
        self.hits as f64 / lookups as f64
    }
}

/// TTL read-through cache with retried refresh and fallback substitution.
pub struct StalenessCache<V> {
    config: StalenessCacheConfig,
    retry: RetryExecutor,
    refresher: Arc<dyn EntryRefresher<V>>,
    fallback: FallbackPolicy<V>,
    entries: DashMap<String, CacheEntry<V>>,
    refresh_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    counters: CacheCounters,
}

impl<V> StalenessCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache, failing fast on invalid configuration.
    pub fn new(
        config: StalenessCacheConfig,
        refresher: Arc<dyn EntryRefresher<V>>,
        fallback: FallbackPolicy<V>,
    ) -> Result<Self> {
        config.validate()?;
        let retry = RetryExecutor::new(config.retry_config())?;
        Ok(Self {
            config,
            retry,
            refresher,
            fallback,
            entries: DashMap::new(),
            refresh_locks: DashMap::new(),
            counters: CacheCounters::default(),
        })
    }

    /// Resolve `key`, refreshing if missing or stale.
    pub async fn get(&self, key: &str) -> Option<V> {
        self.get_with_outcome(key).await.value
    }

    /// Resolve `key` with full attempt and fallback accounting.
    pub async fn get_with_outcome(&self, key: &str) -> LookupOutcome<V> {
        // Fast path: fresh entry, no lock.
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_stale(self.config.ttl) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return LookupOutcome {
                    value: entry.value.clone(),
                    attempts: 0,
                    fallback: None,
                    error: None,
                };
            }
            self.counters.staleness_events.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        }

        let lock = self
            .refresh_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();

        let outcome = {
            let _guard = lock.lock().await;

            // Another lookup may have refreshed while we waited for the
            // lock. This lookup was already counted as a miss or staleness
            // event above, so it must not count a hit too.
            let coalesced = self.entries.get(key).and_then(|entry| {
                (!entry.is_stale(self.config.ttl)).then(|| LookupOutcome {
                    value: entry.value.clone(),
                    attempts: 0,
                    fallback: None,
                    error: None,
                })
            });

            match coalesced {
                Some(outcome) => outcome,
                None => self.refresh_entry(key).await,
            }
        };

        // Drop the lock entry once no other lookup holds a clone, so the
        // map does not grow with every distinct key ever refreshed.
        drop(lock);
        self.refresh_locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);

        outcome
    }

    async fn refresh_entry(&self, key: &str) -> LookupOutcome<V> {
        let refresher = Arc::clone(&self.refresher);
        let outcome = self
            .retry
            .run_with_result_check(
                || {
                    let refresher = Arc::clone(&refresher);
                    async move { refresher.refresh(key).await }
                },
                |value: &V| !refresher.validate(key, value),
            )
            .await;

        let attempts = outcome.attempts;
        self.counters
            .refresh_attempts
            .fetch_add(attempts as u64, Ordering::Relaxed);

        // A value that survived retries but still fails validation is as
        // terminal as a hard error.
        let result = outcome.result.and_then(|value| {
            if self.refresher.validate(key, &value) {
                Ok(value)
            } else {
                Err(ProcessingError::Validation(format!(
                    "refreshed value for '{key}' failed validation"
                )))
            }
        });

        match result {
            Ok(value) => {
                self.counters
                    .refresh_successes
                    .fetch_add(1, Ordering::Relaxed);
                self.entries
                    .insert(key.to_string(), CacheEntry::fresh(value.clone()));
                debug!(key, attempts, "Cache entry refreshed");
                LookupOutcome {
                    value: Some(value),
                    attempts,
                    fallback: None,
                    error: None,
                }
            }
            Err(error) => self.apply_fallback(key, attempts, error),
        }
    }

    fn apply_fallback(
        &self,
        key: &str,
        attempts: u32,
        error: ProcessingError,
    ) -> LookupOutcome<V> {
        self.counters
            .fallbacks_applied
            .fetch_add(1, Ordering::Relaxed);
        warn!(
            key,
            attempts,
            error = %error,
            fallback = ?self.fallback.kind(),
            "Refresh failed terminally, applying fallback"
        );

        match &self.fallback {
            FallbackPolicy::Skip | FallbackPolicy::AssignAdmin { admin: None } => {
                self.entries.remove(key);
                LookupOutcome {
                    value: None,
                    attempts,
                    fallback: Some(FallbackKind::Skip),
                    error: Some(error),
                }
            }
            FallbackPolicy::AssignAdmin { admin: Some(admin) } => {
                let entry = CacheEntry::fresh(admin.clone()).tagged(FALLBACK_TAG, true);
                self.entries.insert(key.to_string(), entry);
                LookupOutcome {
                    value: Some(admin.clone()),
                    attempts,
                    fallback: Some(FallbackKind::AssignAdmin),
                    error: Some(error),
                }
            }
            FallbackPolicy::CreatePlaceholder { factory } => {
                let placeholder = factory(key);
                let entry = CacheEntry::fresh(placeholder.clone())
                    .tagged(FALLBACK_TAG, true)
                    .tagged(MANUAL_REVIEW_TAG, true);
                self.entries.insert(key.to_string(), entry);
                LookupOutcome {
                    value: Some(placeholder),
                    attempts,
                    fallback: Some(FallbackKind::Placeholder),
                    error: Some(error),
                }
            }
        }
    }

    /// Insert a value refreshed just now.
    pub fn put(&self, key: &str, value: V) {
        self.entries.insert(key.to_string(), CacheEntry::fresh(value));
    }

    /// Insert a fresh entry carrying caller-supplied metadata tags.
    pub fn put_with_metadata(
        &self,
        key: &str,
        value: V,
        metadata: impl IntoIterator<Item = (String, serde_json::Value)>,
    ) {
        let mut entry = CacheEntry::fresh(value);
        entry.metadata.extend(metadata);
        self.entries.insert(key.to_string(), entry);
    }

    /// Insert with an explicit refresh timestamp, for warm-start seeding
    /// from a previous run's dump.
    pub fn put_refreshed_at(&self, key: &str, value: V, last_refreshed: DateTime<Utc>) {
        self.entries
            .insert(key.to_string(), CacheEntry::refreshed_at(value, last_refreshed));
    }

    /// Whether `key` is absent or stale; a lookup would trigger a refresh.
    pub fn is_stale(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map_or(true, |entry| entry.is_stale(self.config.ttl))
    }

    /// Whether `key` currently holds a fallback-substituted value.
    pub fn is_fallback(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.is_fallback())
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.remove(key).and_then(|(_, entry)| entry.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            staleness_events: self.counters.staleness_events.load(Ordering::Relaxed),
            refresh_attempts: self.counters.refresh_attempts.load(Ordering::Relaxed),
            refresh_successes: self.counters.refresh_successes.load(Ordering::Relaxed),
            fallbacks_applied: self.counters.fallbacks_applied.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::AtomicU32;

    /// Returns `"<key>-resolved"` after a configurable number of failures.
    #[derive(Debug, Default)]
    struct CountingRefresher {
        calls: AtomicU32,
        failures: AtomicU32,
        reject_value: bool,
    }

    impl CountingRefresher {
        fn failing(n: u32) -> Self {
            Self {
                failures: AtomicU32::new(n),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl EntryRefresher<String> for CountingRefresher {
        async fn refresh(&self, key: &str) -> std::result::Result<String, ProcessingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ProcessingError::Network("lookup failed".into()));
            }
            Ok(format!("{key}-resolved"))
        }

        fn validate(&self, _key: &str, _value: &String) -> bool {
            !self.reject_value
        }
    }

    fn cache(
        refresher: Arc<dyn EntryRefresher<String>>,
        fallback: FallbackPolicy<String>,
    ) -> StalenessCache<String> {
        StalenessCache::new(StalenessCacheConfig::default(), refresher, fallback).unwrap()
    }

    #[tokio::test]
    async fn test_put_with_metadata_carries_tags() {
        let refresher = Arc::new(CountingRefresher::default());
        let cache = cache(refresher.clone(), FallbackPolicy::Skip);
        cache.put_with_metadata(
            "alice",
            "alice-imported".to_string(),
            [("source".to_string(), serde_json::json!("legacy-dump"))],
        );

        let outcome = cache.get_with_outcome("alice").await;
        assert_eq!(outcome.value.as_deref(), Some("alice-imported"));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
        assert!(!cache.is_fallback("alice"));
    }

    #[tokio::test]
    async fn test_fresh_hit_skips_refresher() {
        let refresher = Arc::new(CountingRefresher::default());
        let cache = cache(refresher.clone(), FallbackPolicy::Skip);
        cache.put("alice", "alice-cached".to_string());

        let outcome = cache.get_with_outcome("alice").await;
        assert_eq!(outcome.value.as_deref(), Some("alice-cached"));
        assert_eq!(outcome.attempts, 0);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.metrics().hits, 1);
    }

    #[tokio::test]
    async fn test_miss_triggers_read_through() {
        let refresher = Arc::new(CountingRefresher::default());
        let cache = cache(refresher.clone(), FallbackPolicy::Skip);

        assert_eq!(cache.get("bob").await.as_deref(), Some("bob-resolved"));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

        // Second lookup is a hit.
        assert_eq!(cache.get("bob").await.as_deref(), Some("bob-resolved"));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

        let metrics = cache.metrics();
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.refresh_successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entry_refreshed() {
        let refresher = Arc::new(CountingRefresher::default());
        let cache = cache(refresher.clone(), FallbackPolicy::Skip);
        cache.put_refreshed_at(
            "carol",
            "carol-old".to_string(),
            Utc::now() - ChronoDuration::hours(2),
        );

        assert!(cache.is_stale("carol"));
        let outcome = cache.get_with_outcome("carol").await;
        assert_eq!(outcome.value.as_deref(), Some("carol-resolved"));
        assert_eq!(outcome.attempts, 1);
        assert!(!cache.is_stale("carol"));
        assert_eq!(cache.metrics().staleness_events, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_retries_transient_failures() {
        let refresher = Arc::new(CountingRefresher::failing(2));
        let cache = cache(refresher.clone(), FallbackPolicy::Skip);

        let outcome = cache.get_with_outcome("dave").await;
        assert_eq!(outcome.value.as_deref(), Some("dave-resolved"));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.metrics().refresh_attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_fallback_surfaces_miss() {
        let refresher = Arc::new(CountingRefresher::failing(u32::MAX));
        let cache = cache(refresher, FallbackPolicy::Skip);

        let outcome = cache.get_with_outcome("erin").await;
        assert_eq!(outcome.value, None);
        assert_eq!(outcome.fallback, Some(FallbackKind::Skip));
        assert!(outcome.error.is_some());
        assert!(cache.is_empty());
        assert_eq!(cache.metrics().fallbacks_applied, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_assign_admin_substitutes_and_tags() {
        let refresher = Arc::new(CountingRefresher::failing(u32::MAX));
        let cache = cache(
            refresher,
            FallbackPolicy::AssignAdmin {
                admin: Some("admin@example.com".to_string()),
            },
        );

        let outcome = cache.get_with_outcome("frank").await;
        assert_eq!(outcome.value.as_deref(), Some("admin@example.com"));
        assert_eq!(outcome.fallback, Some(FallbackKind::AssignAdmin));
        assert!(cache.is_fallback("frank"));

        // The substituted entry is fresh; the next lookup is a hit.
        let outcome = cache.get_with_outcome("frank").await;
        assert_eq!(outcome.attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_assign_admin_without_admin_degrades_to_skip() {
        let refresher = Arc::new(CountingRefresher::failing(u32::MAX));
        let cache = cache(refresher, FallbackPolicy::AssignAdmin { admin: None });

        let outcome = cache.get_with_outcome("grace").await;
        assert_eq!(outcome.value, None);
        assert_eq!(outcome.fallback, Some(FallbackKind::Skip));
    }

    #[tokio::test(start_paused = true)]
    async fn test_placeholder_fallback_flags_manual_review() {
        let refresher = Arc::new(CountingRefresher::failing(u32::MAX));
        let cache = cache(
            refresher,
            FallbackPolicy::CreatePlaceholder {
                factory: Arc::new(|key| format!("placeholder-{key}")),
            },
        );

        let outcome = cache.get_with_outcome("heidi").await;
        assert_eq!(outcome.value.as_deref(), Some("placeholder-heidi"));
        assert_eq!(outcome.fallback, Some(FallbackKind::Placeholder));

        let entry = cache.entries.get("heidi").unwrap();
        assert_eq!(
            entry.metadata.get(MANUAL_REVIEW_TAG).and_then(|v| v.as_bool()),
            Some(true)
        );
        assert!(entry.is_fallback());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_value_treated_as_failure() {
        let refresher = Arc::new(CountingRefresher {
            reject_value: true,
            ..CountingRefresher::default()
        });
        let cache = cache(refresher.clone(), FallbackPolicy::Skip);

        let outcome = cache.get_with_outcome("ivan").await;
        assert_eq!(outcome.value, None);
        assert!(matches!(
            outcome.error,
            Some(ProcessingError::Validation(_))
        ));
        // The predicate forces a retry of each structurally-ok response.
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 3);
    }

    /// Slow refresher for coalescing tests.
    #[derive(Debug, Default)]
    struct SlowRefresher {
        calls: AtomicU32,
    }

    #[async_trait]
    impl EntryRefresher<String> for SlowRefresher {
        async fn refresh(&self, key: &str) -> std::result::Result<String, ProcessingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(format!("{key}-resolved"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_lookups_coalesce_into_one_refresh() {
        let refresher = Arc::new(SlowRefresher::default());
        let cache = Arc::new(StalenessCache::new(
            StalenessCacheConfig::default(),
            refresher.clone() as Arc<dyn EntryRefresher<String>>,
            FallbackPolicy::Skip,
        )
        .unwrap());

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get("shared").await })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().as_deref(), Some("shared-resolved"));
        }
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

        // Four lookups, each accounted exactly once: the waiters that find
        // the repopulated entry after the lock do not also count a hit.
        let metrics = cache.metrics();
        assert_eq!(metrics.hits, 0);
        assert_eq!(metrics.misses, 4);
        assert_eq!(metrics.hits + metrics.misses + metrics.staleness_events, 4);

        // The shared per-key lock is released back to the map once the
        // last waiter finishes.
        assert!(cache.refresh_locks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_lock_map_does_not_accumulate_keys() {
        let refresher = Arc::new(CountingRefresher::default());
        let cache = cache(refresher, FallbackPolicy::Skip);

        for key in ["alice", "bob", "carol"] {
            assert!(cache.get(key).await.is_some());
        }
        assert_eq!(cache.len(), 3);
        assert!(cache.refresh_locks.is_empty());

        // A failed refresh with a Skip fallback removes the entry and must
        // not strand its lock either.
        let failing = Arc::new(CountingRefresher::failing(u32::MAX));
        let cache = self::cache(failing, FallbackPolicy::Skip);
        assert!(cache.get("dave").await.is_none());
        assert!(cache.refresh_locks.is_empty());
    }

    #[test]
    fn test_config_validation() {
        let config = StalenessCacheConfig {
            ttl: Duration::ZERO,
            ..StalenessCacheConfig::default()
        };
        assert!(config.validate().is_err());

        let config = StalenessCacheConfig {
            refresh_max_delay: Duration::from_millis(100),
            ..StalenessCacheConfig::default()
        };
        // max below the 500ms base.
        assert!(config.validate().is_err());
    }
}
