//! Retry policy with exponential backoff.
//!
//! # Retry Policy
//!
//! - Max retries: 3 (4 total attempts)
//! - Initial delay: 1s, multiplied by 2 per retry
//! - Max delay: 30 seconds
//! - Jitter: down-jitter up to 25% (multiplier in [0.75, 1.0])
//!
//! # Retryable Conditions
//!
//! - HTTP 408, 409, 429, 5xx
//! - Timeouts, connection errors and malformed responses
//! - `x-should-retry: true` forces retry
//! - `x-should-retry: false` forbids retry
//!
//! A `Retry-After` or `Retry-After-Ms` hint between 0 and 60 seconds replaces
//! the computed backoff.

use std::future::Future;
use std::time::Duration;

use reqwest::{StatusCode, header::HeaderMap};

use crate::InferenceError;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries (not counting initial request).
    pub max_retries: u32,
    /// Initial backoff delay before first retry.
    pub initial_delay: Duration,
    /// Maximum backoff delay.
    pub max_delay: Duration,
    /// Growth factor applied to the delay after every retry.
    pub multiplier: f64,
    /// Jitter factor for down-jitter (0.25 = up to 25% reduction).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.25,
        }
    }
}

/// Parse `Retry-After` or `Retry-After-Ms` headers.
///
/// Returns `Some(duration)` if a valid value is found and `0 < duration < 60s`.
/// Returns `None` if headers are missing, invalid, or out of range.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    // Try Retry-After-Ms first (milliseconds, float)
    if let Some(val) = headers.get("retry-after-ms")
        && let Ok(s) = val.to_str()
        && let Ok(ms) = s.parse::<f64>()
        && ms.is_finite()
        && ms > 0.0
    {
        let duration = Duration::from_secs_f64(ms / 1000.0);
        if duration < Duration::from_secs(60) {
            return Some(duration);
        }
    }

    // Try Retry-After (seconds, integer)
    if let Some(val) = headers.get("retry-after")
        && let Ok(s) = val.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        let duration = Duration::from_secs(secs);
        if duration > Duration::ZERO && duration < Duration::from_secs(60) {
            return Some(duration);
        }
    }

    None
}

/// Determine if a response status is retryable.
///
/// Respects `x-should-retry` header override if present.
#[must_use]
pub fn should_retry(status: StatusCode, headers: &HeaderMap) -> bool {
    // Explicit header override
    if let Some(val) = headers.get("x-should-retry")
        && let Ok(s) = val.to_str()
    {
        if s.eq_ignore_ascii_case("true") {
            return true;
        }
        if s.eq_ignore_ascii_case("false") {
            return false;
        }
    }

    matches!(
        status.as_u16(),
        408 | 409 | 429 | 500 | 502 | 503 | 504 | 520..=599
    )
}

/// Calculate retry delay with exponential backoff and jitter.
///
/// - `backoff_step`: 0 before first retry, 1 before second, etc.
/// - A server hint, when present, is used as-is.
#[must_use]
pub fn calculate_retry_delay(
    backoff_step: u32,
    config: &RetryConfig,
    hint: Option<Duration>,
) -> Duration {
    if let Some(delay) = hint {
        return delay;
    }

    // Exponential backoff: initial_delay * multiplier^backoff_step
    let step = i32::try_from(backoff_step).unwrap_or(i32::MAX);
    let base = config.initial_delay.as_secs_f64() * config.multiplier.powi(step);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Down-jitter: multiply by random factor in [1 - jitter_factor, 1.0]
    let jitter = 1.0 - rand::random::<f64>() * config.jitter_factor;
    Duration::from_secs_f64((capped * jitter).max(0.0))
}

/// Runs `operation` until it succeeds, fails permanently, or the retry budget
/// is spent.
///
/// Non-retryable errors return immediately. After the last retry the final
/// error is returned unchanged. Failed attempts produce no value, so only the
/// successful attempt's usage ever reaches the caller.
pub async fn retry<T, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, InferenceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, InferenceError>>,
{
    let mut retry_count = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && retry_count < config.max_retries => {
                let delay = calculate_retry_delay(retry_count, config, err.retry_after());
                retry_count += 1;
                tracing::warn!(
                    error = %err,
                    retry_count,
                    delay_ms = delay.as_millis(),
                    "Retrying inference call"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                if retry_count > 0 {
                    tracing::debug!(error = %err, attempts = retry_count + 1, "Giving up");
                }
                return Err(err);
            }
        }
    }
}
