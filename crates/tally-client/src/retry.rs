//! Bounded retry with exponential backoff.
//!
//! ## Formula
//!
//! ```text
//! delay(attempt) = min(initial_delay * multiplier^(attempt - 1), max_delay)
//! ```
//!
//! Every attempt runs under `call_timeout`; an elapsed attempt counts as a
//! transient [`ClientError::Timeout`]. Non-transient errors short-circuit.
//! Exhaustion returns [`ClientError::RetriesExhausted`] carrying the last
//! error. Delays are deterministic (no jitter).

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::{ClientError, Result};

/// Retry policy for a single logical request.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Attempts including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Multiplicative growth per attempt.
    pub multiplier: f64,
    /// Timeout applied to each attempt.
    pub call_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Delay after the failed `attempt` (1-indexed).
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let factor = config.multiplier.powi(exponent);
    let millis = config.initial_delay.as_millis() as f64 * factor;
    let max = config.max_delay.as_millis() as f64;

    let clamped = if millis.is_nan() || millis < 0.0 {
        0.0
    } else if millis > max {
        max
    } else {
        millis
    };
    Duration::from_millis(clamped as u64).min(config.max_delay)
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out.
///
/// `what` names the request in log lines.
///
/// # Errors
///
/// - The operation's own error if it is not transient
/// - [`ClientError::RetriesExhausted`] after `max_attempts` transient failures
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    what: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let outcome = match tokio::time::timeout(config.call_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(config.call_timeout)),
        };

        let error = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!(what, attempt, "request succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if !error.is_transient() {
            return Err(error);
        }
        if attempt >= max_attempts {
            warn!(what, attempts = attempt, error = %error, "retries exhausted");
            return Err(ClientError::RetriesExhausted {
                attempts: attempt,
                last: Box::new(error),
            });
        }

        let delay = compute_delay(config, attempt);
        warn!(what, attempt, ?delay, error = %error, "transient failure, retrying");
        tokio::time::sleep(delay).await;
    }
}
