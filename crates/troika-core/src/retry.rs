//! Retry with exponential backoff and jitter.
//!
//! Wraps calls to external backends (sheet RPCs, media fetches, vendor
//! requests). The caller supplies a predicate deciding which errors are
//! worth retrying; permanent errors fail on the first attempt.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Backoff parameters for a retried operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retry attempts after the initial one (0 = single attempt).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Exponential growth base, typically 2.0.
    pub base: f64,
    /// Jitter factor in `[0.0, 1.0]`; each delay is scaled by a random
    /// multiplier in `[1 - jitter, 1 + jitter]`.
    #[serde(default)]
    pub jitter: f64,
}

impl RetryConfig {
    /// Profile for spreadsheet RPCs: 500ms growing to 8s, five attempts
    /// total.
    #[must_use]
    pub fn sheets() -> Self {
        Self {
            max_retries: 4,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            base: 2.0,
            jitter: 0.2,
        }
    }

    /// Profile for media fetches: two quick retries.
    #[must_use]
    pub fn media() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            base: 2.0,
            jitter: 0.2,
        }
    }

    /// No retries, single attempt.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            base: 2.0,
            jitter: 0.0,
        }
    }

    /// Deterministic delay before retry `n` (1-indexed), without jitter.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn delay(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let raw_ms = self.initial_delay.as_millis() as f64 * self.base.powi(exponent);
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms.max(0.0) as u64)
    }

    /// Delay before retry `n` with the jitter factor applied.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn jittered_delay(&self, retry: u32) -> Duration {
        let base = self.delay(retry);
        if self.jitter <= 0.0 {
            return base;
        }
        let jitter = self.jitter.clamp(0.0, 1.0);
        let roll: f64 = rand::random();
        let multiplier = 1.0 - jitter + 2.0 * jitter * roll;
        Duration::from_millis((base.as_millis() as f64 * multiplier).max(0.0) as u64)
    }

    /// Whether another attempt is allowed after `retries_done` retries.
    #[must_use]
    pub fn allows(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::sheets()
    }
}

/// Terminal state of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded on some attempt.
    Success(T),
    /// All attempts failed, or a non-retryable error was hit.
    Exhausted {
        /// The last error observed.
        error: E,
        /// Attempts made, including the first.
        attempts: u32,
    },
    /// The cancellation token fired between attempts.
    Cancelled,
}

impl<T, E> RetryOutcome<T, E> {
    /// Collapse into a `Result`, mapping [`RetryOutcome::Cancelled`] to the
    /// provided error.
    #[allow(clippy::missing_errors_doc)]
    pub fn into_result(self, cancelled: E) -> Result<T, E> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Exhausted { error, .. } => Err(error),
            Self::Cancelled => Err(cancelled),
        }
    }
}

/// Run `operation` with retries per `config`.
///
/// `is_retryable` classifies errors; returning `false` stops immediately.
/// The token is honored before every attempt and during backoff sleeps.
pub async fn retry<T, E, Fut, F, P>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
    is_retryable: P,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut retries_done: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return RetryOutcome::Cancelled;
        }

        match operation(retries_done).await {
            Ok(value) => return RetryOutcome::Success(value),
            Err(error) => {
                if !config.allows(retries_done) || !is_retryable(&error) {
                    return RetryOutcome::Exhausted {
                        error,
                        attempts: retries_done.saturating_add(1),
                    };
                }
                retries_done = retries_done.saturating_add(1);
                let delay = config.jittered_delay(retries_done);
                tokio::select! {
                    () = cancel.cancelled() => return RetryOutcome::Cancelled,
                    () = tokio::time::sleep(delay) => {},
                }
            },
        }
    }
}
