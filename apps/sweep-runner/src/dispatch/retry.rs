//! Retry policy with exponential backoff for backtest requests.
//!
//! # Retryable Errors
//!
//! | Retryable | Non-Retryable |
//! |-----------|---------------|
//! | Network errors, request timeouts | HTTP 400/401/403/404/422 |
//! | HTTP 408 (Request Timeout) | 2xx with an `error` field |
//! | HTTP 429 (Rate Limited) | 2xx with a non-JSON body |
//! | HTTP 5xx | |
//!
//! # Example
//!
//! ```rust,ignore
//! use sweep_runner::dispatch::{RetryPolicy, ExponentialBackoffCalculator};
//!
//! let policy = RetryPolicy::default(); // 3 attempts in total
//! let mut backoff = ExponentialBackoffCalculator::new(&policy);
//!
//! let delay1 = backoff.next_backoff(); // ~1s with jitter
//! let delay2 = backoff.next_backoff(); // ~2s with jitter
//! let delay3 = backoff.next_backoff(); // None: ceiling reached
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy for one configuration's request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempt ceiling, the first attempt included (default: 3).
    pub max_attempts: u32,
    /// Delay before the first retry (default: 1s).
    pub initial_backoff: Duration,
    /// Upper bound on any single delay (default: 30s).
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth (default: 2.0).
    pub backoff_multiplier: f64,
    /// Jitter factor for randomization (default: 0.2 = ±20%).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with custom settings.
    #[must_use]
    pub const fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
        jitter_factor: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
            jitter_factor,
        }
    }

    /// Same policy with a different attempt ceiling.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Retries allowed after the first attempt.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_attempts.saturating_sub(1)
    }
}

/// Calculator for exponential backoff with jitter.
#[derive(Debug)]
pub struct ExponentialBackoffCalculator {
    retries_used: u32,
    max_retries: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    backoff_multiplier: f64,
    jitter_factor: f64,
}

impl ExponentialBackoffCalculator {
    /// Create a new backoff calculator from a retry policy.
    #[must_use]
    pub const fn new(policy: &RetryPolicy) -> Self {
        Self {
            retries_used: 0,
            max_retries: policy.max_retries(),
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            backoff_multiplier: policy.backoff_multiplier,
            jitter_factor: policy.jitter_factor,
        }
    }

    /// Get the next backoff duration with jitter.
    ///
    /// Returns `None` once the attempt ceiling is reached.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if !self.has_remaining_attempts() {
            return None;
        }

        let base_backoff_ms = self.calculate_base_backoff_ms();
        let jittered_ms = self.apply_jitter(base_backoff_ms);
        let capped_ms = jittered_ms.min(self.max_backoff_ms);

        self.retries_used += 1;

        Some(Duration::from_millis(capped_ms))
    }

    /// Next delay, preferring a server-provided `Retry-After` (capped by the
    /// policy's maximum backoff) over the computed one.
    pub fn next_delay(&mut self, retry_after: Option<Duration>) -> Option<Duration> {
        match retry_after {
            Some(hint) if self.has_remaining_attempts() => {
                self.retries_used += 1;
                Some(hint.min(Duration::from_millis(self.max_backoff_ms)))
            }
            _ => self.next_backoff(),
        }
    }

    /// Calculate base exponential backoff without jitter.
    fn calculate_base_backoff_ms(&self) -> u64 {
        let multiplier = self.backoff_multiplier.powi(self.retries_used as i32);
        let backoff = (self.initial_backoff_ms as f64 * multiplier) as u64;
        backoff.min(self.max_backoff_ms)
    }

    /// Apply jitter: random value in `[backoff * (1 - jitter), backoff * (1 + jitter)]`.
    fn apply_jitter(&self, backoff_ms: u64) -> u64 {
        if self.jitter_factor <= 0.0 || backoff_ms == 0 {
            return backoff_ms;
        }
        let mut rng = rand::rng();
        let jitter_range = backoff_ms as f64 * self.jitter_factor;
        let min = (backoff_ms as f64 - jitter_range).max(0.0);
        let max = backoff_ms as f64 + jitter_range;

        rng.random_range(min..=max) as u64
    }

    /// Retries consumed so far.
    #[must_use]
    pub const fn retries_used(&self) -> u32 {
        self.retries_used
    }

    /// Check if more retries are available.
    #[must_use]
    pub const fn has_remaining_attempts(&self) -> bool {
        self.retries_used < self.max_retries
    }
}

/// HTTP status codes outside 5xx that are retryable.
const RETRYABLE_STATUS_CODES: &[u16] = &[
    408, // Request Timeout
    429, // Too Many Requests (Rate Limited)
];

/// Check if an HTTP status code is retryable.
#[must_use]
pub fn is_retryable_status(status_code: u16) -> bool {
    (500..600).contains(&status_code) || RETRYABLE_STATUS_CODES.contains(&status_code)
}

/// Extract Retry-After duration from HTTP headers.
pub struct RetryAfterExtractor;

impl RetryAfterExtractor {
    /// Parse a `Retry-After` header value given in seconds.
    ///
    /// HTTP-date values are not interpreted. Values that do not fit a
    /// `Duration` are ignored.
    #[must_use]
    pub fn parse(value: &str) -> Option<Duration> {
        let value = value.trim();
        if let Ok(seconds) = value.parse::<u64>() {
            return Some(Duration::from_secs(seconds));
        }
        value
            .parse::<f64>()
            .ok()
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(100),
            Duration::from_secs(1),
            2.0,
            0.0,
        )
    }

    #[test]
    fn test_ceiling_counts_first_attempt() {
        let mut backoff = ExponentialBackoffCalculator::new(&policy(3));

        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_backoff(), None);
        assert_eq!(backoff.retries_used(), 2);
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let mut backoff = ExponentialBackoffCalculator::new(&policy(1));
        assert!(!backoff.has_remaining_attempts());
        assert_eq!(backoff.next_backoff(), None);
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut backoff = ExponentialBackoffCalculator::new(&policy(10));
        let delays: Vec<Duration> = std::iter::from_fn(|| backoff.next_backoff()).collect();
        assert_eq!(delays.len(), 9);
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(1)));
        assert_eq!(delays.last(), Some(&Duration::from_secs(1)));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1000), Duration::from_secs(30), 2.0, 0.2);
        for _ in 0..50 {
            let mut backoff = ExponentialBackoffCalculator::new(&policy);
            let delay = backoff.next_backoff().unwrap();
            assert!(delay >= Duration::from_millis(800) && delay <= Duration::from_millis(1200));
        }
    }

    #[test]
    fn test_retry_after_is_capped_and_consumes_attempt() {
        let mut backoff = ExponentialBackoffCalculator::new(&policy(2));
        assert_eq!(
            backoff.next_delay(Some(Duration::from_secs(120))),
            Some(Duration::from_secs(1))
        );
        assert_eq!(backoff.next_delay(Some(Duration::from_secs(1))), None);
    }

    #[test_case(500, true ; "internal server error")]
    #[test_case(503, true ; "service unavailable")]
    #[test_case(429, true ; "rate limited")]
    #[test_case(408, true ; "request timeout")]
    #[test_case(400, false ; "bad request")]
    #[test_case(401, false ; "unauthorized")]
    #[test_case(422, false ; "unprocessable")]
    fn test_is_retryable_status(status: u16, expected: bool) {
        assert_eq!(is_retryable_status(status), expected);
    }

    #[test]
    fn test_retry_after_parse() {
        assert_eq!(RetryAfterExtractor::parse("120"), Some(Duration::from_secs(120)));
        assert_eq!(RetryAfterExtractor::parse(" 1.5 "), Some(Duration::from_millis(1500)));
        assert_eq!(RetryAfterExtractor::parse("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test_case("1e30" ; "overflowing float")]
    #[test_case("-5" ; "negative")]
    #[test_case("NaN" ; "not a number")]
    #[test_case("inf" ; "infinite")]
    fn test_retry_after_out_of_range_is_ignored(value: &str) {
        assert_eq!(RetryAfterExtractor::parse(value), None);
    }
}
