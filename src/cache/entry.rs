//! Cache entry with wall-clock staleness tracking.
//!
//! Timestamps are wall-clock (`chrono`) rather than monotonic so entries
//! seeded from a previous run's dump age correctly.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::cache::fallback::FALLBACK_TAG;

/// One cached value plus refresh bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The cached value; `None` marks a key known to exist but currently
    /// unresolved.
    pub value: Option<V>,
    /// When the value was last refreshed from the source of truth.
    pub last_refreshed: DateTime<Utc>,
    /// Free-form tags (fallback markers, review flags).
    pub metadata: HashMap<String, Value>,
}

impl<V> CacheEntry<V> {
    /// Entry refreshed just now.
    pub fn fresh(value: V) -> Self {
        Self::refreshed_at(value, Utc::now())
    }

    /// Entry with an explicit refresh timestamp, for warm-start seeding.
    pub fn refreshed_at(value: V, last_refreshed: DateTime<Utc>) -> Self {
        Self {
            value: Some(value),
            last_refreshed,
            metadata: HashMap::new(),
        }
    }

    /// Stale when the value is absent or older than `ttl`. A timestamp in
    /// the future (clock adjustment) counts as fresh.
    pub fn is_stale(&self, ttl: Duration) -> bool {
        if self.value.is_none() {
            return true;
        }
        match (Utc::now() - self.last_refreshed).to_std() {
            Ok(age) => age > ttl,
            Err(_) => false,
        }
    }

    /// Attach a metadata tag, returning the entry for chaining.
    pub fn tagged(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Whether this entry was produced by a fallback policy rather than a
    /// real refresh.
    pub fn is_fallback(&self) -> bool {
        self.metadata
            .get(FALLBACK_TAG)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_fresh_entry_is_not_stale() {
        let entry = CacheEntry::fresh("value");
        assert!(!entry.is_stale(Duration::from_secs(60)));
    }

    #[test]
    fn test_old_entry_is_stale() {
        let entry =
            CacheEntry::refreshed_at("value", Utc::now() - ChronoDuration::hours(2));
        assert!(entry.is_stale(Duration::from_secs(3600)));
    }

    #[test]
    fn test_missing_value_is_always_stale() {
        let entry: CacheEntry<String> = CacheEntry {
            value: None,
            last_refreshed: Utc::now(),
            metadata: HashMap::new(),
        };
        assert!(entry.is_stale(Duration::from_secs(3600)));
    }

    #[test]
    fn test_future_timestamp_counts_as_fresh() {
        let entry = CacheEntry::refreshed_at("value", Utc::now() + ChronoDuration::hours(1));
        assert!(!entry.is_stale(Duration::from_secs(1)));
    }

    #[test]
    fn test_fallback_tagging() {
        let entry = CacheEntry::fresh("value");
        assert!(!entry.is_fallback());
        let tagged = entry.tagged(FALLBACK_TAG, true);
        assert!(tagged.is_fallback());
    }
}
