//! Automatic retry with exponential backoff.
//!
//! [`retry_async`] wraps any async unit of work whose error implements
//! [`Classify`]. Retryable and unrecognized failures are retried after
//! `min(base_delay * multiplier^attempt, max_delay)`; non-retryable failures
//! propagate immediately. When attempts run out the last error propagates.
//!
//! The string classifiers at the bottom recognise transient HTTP/API errors
//! (429, 500, 502, 503, 504, network timeouts) coming back from the reasoning
//! engine. 400/401/403/404/422 are never retried.

use crate::error::{Classification, Classify};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior. One per call site.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total number of invocations, including the first (minimum 1).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Scale delays by a fixed per-attempt factor to spread out contenders.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// A config that invokes the work exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate the delay after a failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.jitter {
            // Deterministic per-attempt factor; avoids pulling in rand.
            let jitter_factor = match attempt % 4 {
                0 => 0.75,
                1 => 0.90,
                2 => 0.60,
                _ => 0.85,
            };
            Duration::from_secs_f64(capped * jitter_factor)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

/// Run `work` until it succeeds, fails permanently, or exhausts
/// `config.max_attempts` invocations.
///
/// `label` names the operation in log lines.
pub async fn retry_async<T, E, F, Fut>(config: &RetryConfig, label: &str, mut work: F) -> Result<T, E>
where
    E: Classify + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let error = match work().await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        let class = error.classification();
        if class == Classification::NonRetryable {
            debug!("{label}: permanent failure, not retrying: {error}");
            return Err(error);
        }
        if attempt >= max_attempts {
            warn!("{label}: giving up after {attempt} attempt(s): {error}");
            return Err(error);
        }

        let delay = config.delay_for_attempt(attempt - 1);
        if class == Classification::Unrecognized {
            warn!(
                "{label}: unrecognized failure treated as transient (attempt {attempt}/{max_attempts}): {error}. Retrying in {delay:?}..."
            );
        } else {
            warn!(
                "{label}: transient failure (attempt {attempt}/{max_attempts}): {error}. Retrying in {delay:?}..."
            );
        }
        tokio::time::sleep(delay).await;
    }
}

/// Whether an error string indicates a transient (retryable) failure.
pub fn is_transient_error(error: &str) -> bool {
    let transient_statuses = ["429", "500", "502", "503", "504"];
    if transient_statuses
        .iter()
        .any(|s| error.contains(&format!("HTTP {s}")))
    {
        return true;
    }

    let lower = error.to_lowercase();
    [
        "request failed:",
        "connection reset",
        "connection refused",
        "timed out",
        "timeout",
        "broken pipe",
        "network",
    ]
    .iter()
    .any(|p| lower.contains(p))
}

/// Whether an error string is a permanent (non-retryable) failure.
pub fn is_permanent_error(error: &str) -> bool {
    [
        "HTTP 400",
        "HTTP 401",
        "HTTP 403",
        "HTTP 404",
        "HTTP 422",
        "bad request",
        "unauthorized",
    ]
    .iter()
    .any(|p| error.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> RetryConfig {
        RetryConfig::default()
            .with_attempts(attempts)
            .with_delays(Duration::from_millis(1), Duration::from_millis(4))
    }

    #[test]
    fn default_config_matches_service_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(10));
        assert!(!config.jitter);
    }

    #[test]
    fn delay_doubles_then_caps() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(10));
        assert_eq!(config.delay_for_attempt(40), Duration::from_secs(10));
    }

    #[test]
    fn jitter_reduces_delay() {
        let plain = RetryConfig::default();
        let jittered = RetryConfig::default().with_jitter(true);
        for attempt in 0..6 {
            assert!(jittered.delay_for_attempt(attempt) <= plain.delay_for_attempt(attempt));
        }
    }

    #[tokio::test]
    async fn always_retryable_runs_exactly_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), StoreError> = retry_async(&fast(3), "probe", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(StoreError::Transient(format!("lock wait #{n}"))) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result, Err(StoreError::Transient("lock wait #3".into())));
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), StoreError> = retry_async(&fast(5), "probe", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Permanent("check constraint".into())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unrecognized_failure_is_retried() {
        let calls = AtomicU32::new(0);
        let result = retry_async(&fast(3), "probe", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(StoreError::Unrecognized("protocol hiccup".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let _: Result<(), StoreError> = retry_async(&fast(0), "probe", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Transient("x".into())) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transient_errors_detected() {
        assert!(is_transient_error("OpenRouter API HTTP 429: rate limited"));
        assert!(is_transient_error("OpenRouter API HTTP 502: bad gateway"));
        assert!(is_transient_error("request failed: connection reset"));
        assert!(is_transient_error("request failed: timed out"));
    }

    #[test]
    fn permanent_errors_detected() {
        assert!(is_permanent_error("OpenRouter API HTTP 400: bad request"));
        assert!(is_permanent_error("OpenRouter API HTTP 401: unauthorized"));
        assert!(!is_transient_error("OpenRouter API HTTP 400: bad request"));
        assert!(!is_transient_error("some random error"));
    }
}
