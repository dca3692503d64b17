// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backoff for remote calls.
//!
//! Only failures the caller classifies as transient (5xx, transport) are
//! retried. Anything permanent, such as a 4xx from an integrity endpoint the
//! server never implemented, comes back on the first attempt.
//!
//! ```
//! use entity_mirror::RetryConfig;
//! use std::time::Duration;
//!
//! let query = RetryConfig::query();
//! assert_eq!(query.max_attempts, Some(3));
//! assert_eq!(query.delay_before(1), Duration::from_millis(100));
//! assert_eq!(query.delay_before(2), Duration::from_millis(200));
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// How many times a remote call is attempted and how long to wait between
/// attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first. `None` never gives up, which
    /// only suits loops the host drives itself.
    pub max_attempts: Option<usize>,
    /// Wait before the second attempt.
    pub base_delay: Duration,
    /// Upper bound on any single wait.
    pub delay_cap: Duration,
    /// Growth of the wait per attempt.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::query()
    }
}

impl RetryConfig {
    /// Three quick attempts. Exhaustion surfaces as "authority unreachable"
    /// and the next validation cycle tries again.
    #[must_use]
    pub fn query() -> Self {
        Self::bounded(3, Duration::from_millis(100), Duration::from_secs(2))
    }

    /// A single attempt.
    #[must_use]
    pub fn none() -> Self {
        Self::bounded(1, Duration::ZERO, Duration::ZERO)
    }

    fn bounded(attempts: usize, base_delay: Duration, delay_cap: Duration) -> Self {
        Self {
            max_attempts: Some(attempts),
            base_delay,
            delay_cap,
            multiplier: 2.0,
        }
    }

    /// Wait before attempt `failed + 1`, given `failed` failures so far.
    pub fn delay_before(&self, failed: usize) -> Duration {
        let exponent = failed.saturating_sub(1).min(i32::MAX as usize) as i32;
        let nanos = self.base_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        if !nanos.is_finite() || nanos >= self.delay_cap.as_nanos() as f64 {
            self.delay_cap
        } else {
            Duration::from_nanos(nanos.max(0.0).round() as u64)
        }
    }

    fn exhausted(&self, failed: usize) -> bool {
        self.max_attempts.is_some_and(|max| failed >= max)
    }
}

/// Run `call` until it succeeds, fails permanently, or runs out of attempts.
///
/// `is_transient` decides which errors are worth another attempt. The last
/// error is returned unchanged.
pub async fn retry_when<F, Fut, T, E, P>(
    label: &str,
    config: &RetryConfig,
    mut call: F,
    is_transient: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let mut failed = 0;
    loop {
        let err = match call().await {
            Ok(value) => {
                if failed > 0 {
                    debug!(call = label, failed, "Remote call recovered");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        failed += 1;
        if !is_transient(&err) || config.exhausted(failed) {
            return Err(err);
        }

        let wait = config.delay_before(failed);
        warn!(
            call = label,
            attempt = failed,
            max_attempts = ?config.max_attempts,
            error = %err,
            ?wait,
            "Transient remote failure"
        );
        tokio::time::sleep(wait).await;
    }
}

/// [`retry_when`] treating every error as transient.
pub async fn retry<F, Fut, T, E>(label: &str, config: &RetryConfig, call: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_when(label, config, call, |_| true).await
}
