//! Per-endpoint circuit breaker.
//!
//! Closed passes calls through, Open rejects them immediately, `HalfOpen`
//! admits a single probe after the cool-down. Five consecutive failures
//! open the breaker; one probe success closes it again.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

/// Breaker thresholds.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Cool-down before a probe is admitted.
    pub cool_down: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(60),
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected until the cool-down elapses.
    Open,
    /// One probe call is in flight.
    HalfOpen,
}

#[derive(Debug)]
enum Inner {
    Closed { consecutive_failures: u32 },
    Open { since: Instant },
    HalfOpen,
}

/// Failure-counting gate in front of one named endpoint.
///
/// The caller asks [`CircuitBreaker::try_acquire`] before an attempt and
/// reports the result with [`CircuitBreaker::record_success`] /
/// [`CircuitBreaker::record_failure`]. Only failures classified as
/// transient by the caller should be recorded; permanent errors say
/// nothing about endpoint health.
#[derive(Debug)]
pub struct CircuitBreaker {
    endpoint: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker for a named endpoint.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            inner: Mutex::new(Inner::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// The endpoint this breaker guards.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Current state, for health reporting and tests.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        match *self.lock() {
            Inner::Closed { .. } => BreakerState::Closed,
            Inner::Open { .. } => BreakerState::Open,
            Inner::HalfOpen => BreakerState::HalfOpen,
        }
    }

    /// Ask to perform a call.
    ///
    /// Returns `false` while the breaker is open. When the cool-down has
    /// elapsed the breaker moves to half-open and admits the caller as the
    /// probe.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        match *inner {
            Inner::Closed { .. } => true,
            Inner::HalfOpen => false,
            Inner::Open { since } => {
                if since.elapsed() >= self.config.cool_down {
                    info!(endpoint = %self.endpoint, "breaker half-open, admitting probe");
                    *inner = Inner::HalfOpen;
                    true
                } else {
                    false
                }
            },
        }
    }

    /// Report a successful call.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        match *inner {
            Inner::Closed { .. } => {
                *inner = Inner::Closed {
                    consecutive_failures: 0,
                };
            },
            Inner::HalfOpen | Inner::Open { .. } => {
                info!(endpoint = %self.endpoint, "breaker closed after successful probe");
                *inner = Inner::Closed {
                    consecutive_failures: 0,
                };
            },
        }
    }

    /// Report a failed (transient) call.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match *inner {
            Inner::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures.saturating_add(1);
                if failures >= self.config.failure_threshold {
                    warn!(
                        endpoint = %self.endpoint,
                        failures,
                        "breaker opened"
                    );
                    *inner = Inner::Open {
                        since: Instant::now(),
                    };
                } else {
                    *inner = Inner::Closed {
                        consecutive_failures: failures,
                    };
                }
            },
            Inner::HalfOpen => {
                warn!(endpoint = %self.endpoint, "probe failed, breaker re-opened");
                *inner = Inner::Open {
                    since: Instant::now(),
                };
            },
            Inner::Open { .. } => {},
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding this lock is itself a bug; recover the
        // guard rather than poisoning every later call.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("test", BreakerConfig::default())
    }

    #[test]
    fn starts_closed() {
        let b = breaker();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.try_acquire());
    }

    #[test]
    fn opens_after_threshold_failures() {
        let b = breaker();
        for _ in 0..4 {
            b.record_failure();
            assert_eq!(b.state(), BreakerState::Closed);
        }
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.try_acquire());
    }

    #[test]
    fn success_resets_failure_count() {
        let b = breaker();
        for _ in 0..4 {
            b.record_failure();
        }
        b.record_success();
        for _ in 0..4 {
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn admits_single_probe_after_cool_down() {
        let b = breaker();
        for _ in 0..5 {
            b.record_failure();
        }
        assert!(!b.try_acquire());

        tokio::time::advance(Duration::from_secs(61)).await;

        // Exactly one probe is admitted.
        assert!(b.try_acquire());
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert!(!b.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_success_closes() {
        let b = breaker();
        for _ in 0..5 {
            b.record_failure();
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(b.try_acquire());
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failure_reopens() {
        let b = breaker();
        for _ in 0..5 {
            b.record_failure();
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(b.try_acquire());
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.try_acquire());

        // A second cool-down admits another probe.
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(b.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn still_open_before_cool_down() {
        let b = breaker();
        for _ in 0..5 {
            b.record_failure();
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!b.try_acquire());
    }
}
