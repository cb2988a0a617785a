//! # Rate-Limit Response Headers
//!
//! Typed view over the rate-limit feedback headers remote services attach to
//! responses. The remote client collaborators hand headers over as a plain
//! string map; parsing failures are treated as header absence rather than
//! errors, since header quality varies wildly across services.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;

/// Parsed rate-limit headers from a single response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    /// `Retry-After`, in seconds.
    pub retry_after: Option<Duration>,
    /// `X-RateLimit-Remaining`: permits left in the server-side window.
    pub remaining: Option<u32>,
    /// `X-RateLimit-Reset`: how far in the future the server-side window
    /// resets. Absolute epoch values are converted to a relative duration;
    /// values in the past are dropped.
    pub reset_in: Option<Duration>,
}

impl RateLimitHeaders {
    /// Headers carrying no signal at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Convenience constructor for a bare `Retry-After`.
    pub fn retry_after(duration: Duration) -> Self {
        Self {
            retry_after: Some(duration),
            ..Self::default()
        }
    }

    /// Parse from a case-insensitive string map as delivered by the remote
    /// client collaborators.
    pub fn from_map(headers: &HashMap<String, String>) -> Self {
        let lookup = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.trim())
        };

        let retry_after = lookup("Retry-After")
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|secs| *secs >= 0.0)
            .map(Duration::from_secs_f64);

        let remaining = lookup("X-RateLimit-Remaining").and_then(|v| v.parse::<u32>().ok());

        let reset_in = lookup("X-RateLimit-Reset")
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(Self::normalize_reset);

        Self {
            retry_after,
            remaining,
            reset_in,
        }
    }

    /// `X-RateLimit-Reset` is sometimes relative seconds, sometimes an epoch
    /// timestamp. Values that look like an epoch (past the year 2001) are
    /// converted against the wall clock; values in the past are dropped.
    fn normalize_reset(value: i64) -> Option<Duration> {
        const EPOCH_CUTOFF: i64 = 1_000_000_000;
        if value <= 0 {
            return None;
        }
        if value < EPOCH_CUTOFF {
            return Some(Duration::from_secs(value as u64));
        }
        let now = Utc::now().timestamp();
        let delta = value - now;
        if delta > 0 {
            Some(Duration::from_secs(delta as u64))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parses_retry_after_seconds() {
        let headers = RateLimitHeaders::from_map(&map(&[("Retry-After", "30")]));
        assert_eq!(headers.retry_after, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_header_names_case_insensitive() {
        let headers = RateLimitHeaders::from_map(&map(&[
            ("retry-after", "5"),
            ("x-ratelimit-remaining", "3"),
        ]));
        assert_eq!(headers.retry_after, Some(Duration::from_secs(5)));
        assert_eq!(headers.remaining, Some(3));
    }

    #[test]
    fn test_relative_reset_value() {
        let headers = RateLimitHeaders::from_map(&map(&[("X-RateLimit-Reset", "45")]));
        assert_eq!(headers.reset_in, Some(Duration::from_secs(45)));
    }

    #[test]
    fn test_epoch_reset_in_future() {
        let future = (Utc::now().timestamp() + 120).to_string();
        let headers = RateLimitHeaders::from_map(&map(&[("X-RateLimit-Reset", &future)]));
        let reset = headers.reset_in.expect("future epoch should parse");
        assert!(reset >= Duration::from_secs(115) && reset <= Duration::from_secs(125));
    }

    #[test]
    fn test_epoch_reset_in_past_dropped() {
        let past = (Utc::now().timestamp() - 120).to_string();
        let headers = RateLimitHeaders::from_map(&map(&[("X-RateLimit-Reset", &past)]));
        assert_eq!(headers.reset_in, None);
    }

    #[test]
    fn test_malformed_values_ignored() {
        let headers = RateLimitHeaders::from_map(&map(&[
            ("Retry-After", "soon"),
            ("X-RateLimit-Remaining", "-1"),
            ("X-RateLimit-Reset", "never"),
        ]));
        assert_eq!(headers, RateLimitHeaders::empty());
    }
}
