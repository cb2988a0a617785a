//! # Per-Endpoint Rate Limiter
//!
//! Core admission control for calls against one logical endpoint. Supports
//! non-blocking checks (`try_acquire`), suspending waits (`wait_if_needed`),
//! and response feedback (`record_response`) that adapts the effective rate
//! from latencies, status codes, and rate-limit headers.
//!
//! All mutable state lives in a single [`parking_lot::Mutex`]; the lock is
//! never held across an await point. Sleeps happen outside the lock using
//! whatever wait the locked state math suggested.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::constants::{ADAPTIVE_SUCCESS_RUN, REMAINING_HEADER_FLOOR, RESPONSE_HISTORY_CAPACITY};
use crate::error::Result;
use crate::rate_limiter::config::{RateLimitStrategy, RateLimiterConfig};
use crate::rate_limiter::headers::RateLimitHeaders;

/// Base of the exponential 429 backoff when no `Retry-After` is present.
const RATE_LIMIT_BACKOFF_BASE: f64 = 2.0;

/// Mutable limiter state. Owned exclusively by one [`RateLimiter`], accessed
/// only under its lock.
#[derive(Debug)]
struct RateLimiterState {
    /// Fractional token count for the bucket strategies.
    tokens: f64,
    last_refill: Instant,
    /// Secondary burst pool (Burst strategy).
    burst_tokens: f64,
    last_burst_refill: Instant,
    /// Effective capacity; shrinks on failure signals, never exceeds the
    /// configured ceiling.
    current_max_requests: f64,
    /// Escalating 429 fallback delay for the adaptive strategy.
    current_delay: Duration,
    consecutive_failures: u32,
    consecutive_successes: u32,
    circuit_open_until: Option<Instant>,
    /// Timestamped permit log for the sliding window.
    request_log: VecDeque<(Instant, u32)>,
    /// Fixed-window bookkeeping.
    window_start: Instant,
    window_count: u32,
    /// Server-announced window reset; tightens the local window when set.
    window_reset_override: Option<Instant>,
    /// Bounded latency history, oldest evicted first.
    response_times: VecDeque<Duration>,
}

impl RateLimiterState {
    fn new(config: &RateLimiterConfig) -> Self {
        let now = Instant::now();
        Self {
            tokens: config.max_requests as f64,
            last_refill: now,
            burst_tokens: config.burst_capacity as f64,
            last_burst_refill: now,
            current_max_requests: config.max_requests as f64,
            current_delay: config.base_delay,
            consecutive_failures: 0,
            consecutive_successes: 0,
            circuit_open_until: None,
            request_log: VecDeque::new(),
            window_start: now,
            window_count: 0,
            window_reset_override: None,
            response_times: VecDeque::with_capacity(RESPONSE_HISTORY_CAPACITY),
        }
    }

    fn effective_capacity(&self) -> f64 {
        self.current_max_requests.max(1.0)
    }

    fn push_latency(&mut self, latency: Duration) {
        if self.response_times.len() == RESPONSE_HISTORY_CAPACITY {
            self.response_times.pop_front();
        }
        self.response_times.push_back(latency);
    }

    fn average_latency(&self) -> Option<Duration> {
        if self.response_times.is_empty() {
            return None;
        }
        let total: Duration = self.response_times.iter().sum();
        Some(total / self.response_times.len() as u32)
    }
}

/// Atomic counters, readable without touching the state lock.
#[derive(Debug, Default)]
struct RateLimiterCounters {
    permits_granted: AtomicU64,
    permits_denied: AtomicU64,
    throttled_responses: AtomicU64,
    circuit_breaker_trips: AtomicU64,
    total_wait_ms: AtomicU64,
}

/// Point-in-time view of a limiter, safe to snapshot at any time without
/// mutating state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterSnapshot {
    pub endpoint: String,
    pub strategy: String,
    pub permits_granted: u64,
    pub permits_denied: u64,
    pub throttled_responses: u64,
    pub circuit_breaker_trips: u64,
    pub total_wait_ms: u64,
    pub effective_capacity: f64,
    pub consecutive_failures: u32,
    pub circuit_open: bool,
    pub average_response_time_ms: Option<u64>,
}

/// Rate limiter for a single logical endpoint.
#[derive(Debug)]
pub struct RateLimiter {
    endpoint: String,
    config: RateLimiterConfig,
    state: Mutex<RateLimiterState>,
    counters: RateLimiterCounters,
}

impl RateLimiter {
    /// Create a limiter, failing fast on invalid configuration.
    pub fn new(endpoint: impl Into<String>, config: RateLimiterConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = endpoint.into();

        info!(
            endpoint = %endpoint,
            strategy = config.strategy.name(),
            max_requests = config.max_requests,
            time_window_ms = config.time_window.as_millis() as u64,
            "Rate limiter initialized"
        );

        let state = Mutex::new(RateLimiterState::new(&config));
        Ok(Self {
            endpoint,
            config,
            state,
            counters: RateLimiterCounters::default(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Non-blocking admission check. Consumes `cost` permits on success.
    pub fn try_acquire(&self, cost: u32) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();

        if let Some(until) = state.circuit_open_until {
            if now < until {
                self.counters.permits_denied.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            Self::reset_circuit(&mut state);
        }

        match self.acquire_inner(&mut state, cost, now) {
            Ok(()) => {
                self.counters.permits_granted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.counters.permits_denied.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Suspend until `cost` permits are available, returning the elapsed
    /// wait. While the circuit breaker is open every caller blocks until
    /// the cooldown expires, after which the breaker auto-resets.
    pub async fn wait_if_needed(&self, cost: u32) -> Duration {
        let start = Instant::now();

        loop {
            let next_wait = {
                let mut state = self.state.lock();
                let now = Instant::now();

                if let Some(until) = state.circuit_open_until {
                    if now < until {
                        Some(until - now)
                    } else {
                        Self::reset_circuit(&mut state);
                        None
                    }
                } else {
                    None
                }
                .or_else(|| match self.acquire_inner(&mut state, cost, now) {
                    Ok(()) => None,
                    Err(suggested) => {
                        Some(suggested.clamp(self.config.min_delay, self.config.max_delay))
                    }
                })
            };

            match next_wait {
                None => {
                    self.counters.permits_granted.fetch_add(1, Ordering::Relaxed);
                    let waited = start.elapsed();
                    if !waited.is_zero() {
                        self.counters
                            .total_wait_ms
                            .fetch_add(waited.as_millis() as u64, Ordering::Relaxed);
                        debug!(
                            endpoint = %self.endpoint,
                            waited_ms = waited.as_millis() as u64,
                            "Permit granted after wait"
                        );
                    }
                    return waited;
                }
                Some(wait) => {
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Feed one response's signals back into the limiter. On a 429 this
    /// suspends for the server-mandated (or computed) cooldown before
    /// returning, so callers naturally pace themselves.
    pub async fn record_response(&self, latency: Duration, status: u16, headers: &RateLimitHeaders) {
        let sleep_for = {
            let mut state = self.state.lock();
            let now = Instant::now();
            state.push_latency(latency);
            self.apply_header_signals(&mut state, headers, now);

            match status {
                429 => Some(self.handle_throttle(&mut state, headers)),
                500..=599 => {
                    self.handle_server_error(&mut state, status, now);
                    None
                }
                200..=299 => {
                    self.handle_success(&mut state);
                    None
                }
                // Other 4xx carry no rate signal.
                _ => None,
            }
        };

        if let Some(delay) = sleep_for {
            warn!(
                endpoint = %self.endpoint,
                delay_ms = delay.as_millis() as u64,
                "Throttled by remote service, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Snapshot current counters and derived state without mutation.
    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let state = self.state.lock();
        let now = Instant::now();
        RateLimiterSnapshot {
            endpoint: self.endpoint.clone(),
            strategy: self.config.strategy.name().to_string(),
            permits_granted: self.counters.permits_granted.load(Ordering::Relaxed),
            permits_denied: self.counters.permits_denied.load(Ordering::Relaxed),
            throttled_responses: self.counters.throttled_responses.load(Ordering::Relaxed),
            circuit_breaker_trips: self.counters.circuit_breaker_trips.load(Ordering::Relaxed),
            total_wait_ms: self.counters.total_wait_ms.load(Ordering::Relaxed),
            effective_capacity: state.effective_capacity(),
            consecutive_failures: state.consecutive_failures,
            circuit_open: state.circuit_open_until.is_some_and(|until| now < until),
            average_response_time_ms: state.average_latency().map(|d| d.as_millis() as u64),
        }
    }

    // --- strategy internals, all called under the state lock ---

    fn acquire_inner(
        &self,
        state: &mut RateLimiterState,
        cost: u32,
        now: Instant,
    ) -> std::result::Result<(), Duration> {
        match self.config.strategy {
            RateLimitStrategy::TokenBucket | RateLimitStrategy::Adaptive => {
                self.acquire_tokens(state, cost, now)
            }
            RateLimitStrategy::SlidingWindow => self.acquire_sliding(state, cost, now),
            RateLimitStrategy::FixedWindow => self.acquire_fixed(state, cost, now),
            RateLimitStrategy::Burst => {
                self.refill_burst(state, now);
                if state.burst_tokens >= cost as f64 {
                    state.burst_tokens -= cost as f64;
                    Ok(())
                } else {
                    self.acquire_tokens(state, cost, now)
                }
            }
        }
    }

    fn acquire_tokens(
        &self,
        state: &mut RateLimiterState,
        cost: u32,
        now: Instant,
    ) -> std::result::Result<(), Duration> {
        let capacity = state.effective_capacity();
        let rate = capacity / self.config.time_window.as_secs_f64();

        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * rate).min(capacity);
        state.last_refill = now;

        let cost = cost as f64;
        if state.tokens >= cost {
            state.tokens -= cost;
            return Ok(());
        }

        // Respect a server-announced reset when the bucket is dry.
        if let Some(reset_at) = state.window_reset_override {
            if now < reset_at {
                return Err(reset_at - now);
            }
            state.window_reset_override = None;
        }

        let deficit = cost - state.tokens;
        Err(Duration::from_secs_f64(deficit / rate))
    }

    fn acquire_sliding(
        &self,
        state: &mut RateLimiterState,
        cost: u32,
        now: Instant,
    ) -> std::result::Result<(), Duration> {
        let window = self.config.time_window;
        while let Some(&(stamp, _)) = state.request_log.front() {
            if now.saturating_duration_since(stamp) >= window {
                state.request_log.pop_front();
            } else {
                break;
            }
        }

        let used: u32 = state.request_log.iter().map(|(_, c)| *c).sum();
        let capacity = state.effective_capacity() as u32;

        if used + cost <= capacity {
            state.request_log.push_back((now, cost));
            return Ok(());
        }

        if let Some(reset_at) = state.window_reset_override {
            if now < reset_at {
                return Err(reset_at - now);
            }
            state.window_reset_override = None;
        }

        let wait = state
            .request_log
            .front()
            .map(|&(stamp, _)| (stamp + window).saturating_duration_since(now))
            .unwrap_or(window);
        Err(wait)
    }

    fn acquire_fixed(
        &self,
        state: &mut RateLimiterState,
        cost: u32,
        now: Instant,
    ) -> std::result::Result<(), Duration> {
        let natural_end = state.window_start + self.config.time_window;
        let window_end = match state.window_reset_override {
            Some(reset_at) if reset_at > natural_end => reset_at,
            _ => natural_end,
        };

        if now >= window_end {
            state.window_start = now;
            state.window_count = 0;
            state.window_reset_override = None;
        }

        let capacity = state.effective_capacity() as u32;
        if state.window_count + cost <= capacity {
            state.window_count += cost;
            Ok(())
        } else {
            let natural_end = state.window_start + self.config.time_window;
            let window_end = match state.window_reset_override {
                Some(reset_at) if reset_at > natural_end => reset_at,
                _ => natural_end,
            };
            Err(window_end.saturating_duration_since(now))
        }
    }

    fn refill_burst(&self, state: &mut RateLimiterState, now: Instant) {
        let elapsed = now
            .saturating_duration_since(state.last_burst_refill)
            .as_secs_f64();
        state.burst_tokens = (state.burst_tokens + elapsed * self.config.burst_recovery_rate)
            .min(self.config.burst_capacity as f64);
        state.last_burst_refill = now;
    }

    fn apply_header_signals(
        &self,
        state: &mut RateLimiterState,
        headers: &RateLimitHeaders,
        now: Instant,
    ) {
        if let Some(remaining) = headers.remaining {
            if remaining < REMAINING_HEADER_FLOOR {
                state.current_max_requests = (state.current_max_requests / 2.0).max(1.0);
                debug!(
                    endpoint = %self.endpoint,
                    remaining,
                    effective_capacity = state.current_max_requests,
                    "Remaining-header signal: halving effective capacity"
                );
            }
        }
        if let Some(reset_in) = headers.reset_in {
            if !reset_in.is_zero() {
                state.window_reset_override = Some(now + reset_in);
            }
        }
    }

    fn handle_throttle(
        &self,
        state: &mut RateLimiterState,
        headers: &RateLimitHeaders,
    ) -> Duration {
        state.consecutive_failures += 1;
        state.consecutive_successes = 0;
        self.shrink_adaptive_capacity(state);
        self.counters
            .throttled_responses
            .fetch_add(1, Ordering::Relaxed);

        let delay = match headers.retry_after {
            // The server named its price; pay exactly that.
            Some(retry_after) => retry_after,
            None => {
                if self.config.strategy == RateLimitStrategy::Adaptive {
                    state.current_delay
                } else {
                    let exponent = state.consecutive_failures.min(16) as i32;
                    self.config
                        .base_delay
                        .mul_f64(RATE_LIMIT_BACKOFF_BASE.powi(exponent))
                        .min(self.config.max_delay)
                }
            }
        };

        // Escalate the adaptive fallback for next time.
        state.current_delay = (state.current_delay * 2).min(self.config.max_delay);

        delay
    }

    fn handle_server_error(&self, state: &mut RateLimiterState, status: u16, now: Instant) {
        state.consecutive_failures += 1;
        state.consecutive_successes = 0;
        self.shrink_adaptive_capacity(state);

        if state.consecutive_failures >= self.config.circuit_breaker_threshold
            && state.circuit_open_until.is_none()
        {
            state.circuit_open_until = Some(now + self.config.max_delay);
            self.counters
                .circuit_breaker_trips
                .fetch_add(1, Ordering::Relaxed);
            warn!(
                endpoint = %self.endpoint,
                status,
                consecutive_failures = state.consecutive_failures,
                cooldown_ms = self.config.max_delay.as_millis() as u64,
                "Circuit breaker opened"
            );
        }
    }

    fn handle_success(&self, state: &mut RateLimiterState) {
        state.consecutive_failures = 0;
        state.consecutive_successes += 1;
        state.current_delay = self.config.base_delay;

        if self.config.strategy != RateLimitStrategy::Adaptive {
            return;
        }

        let latency_degraded = state
            .average_latency()
            .is_some_and(|avg| avg > self.config.latency_threshold);

        if latency_degraded {
            self.shrink_adaptive_capacity(state);
            state.consecutive_successes = 0;
        } else if state.consecutive_successes >= ADAPTIVE_SUCCESS_RUN {
            let ceiling = self.config.max_requests as f64;
            let grown = (state.current_max_requests * self.config.recovery_factor).min(ceiling);
            if grown > state.current_max_requests {
                debug!(
                    endpoint = %self.endpoint,
                    from = state.current_max_requests,
                    to = grown,
                    "Adaptive capacity recovered after success run"
                );
            }
            state.current_max_requests = grown;
            state.consecutive_successes = 0;
        }
    }

    fn shrink_adaptive_capacity(&self, state: &mut RateLimiterState) {
        if self.config.strategy == RateLimitStrategy::Adaptive {
            state.current_max_requests =
                (state.current_max_requests * self.config.adaptive_factor).max(1.0);
        }
    }

    fn reset_circuit(state: &mut RateLimiterState) {
        state.circuit_open_until = None;
        state.consecutive_failures = 0;
    }
}
