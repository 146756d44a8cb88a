//! Long-poll liveness heartbeat.
//!
//! The router stamps the heartbeat after every successful messenger fetch;
//! the watchdog reads the age. Cloning shares the underlying stamp.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

/// Shared timestamp of the last successful messenger fetch.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    last: Arc<Mutex<Instant>>,
}

impl Heartbeat {
    /// A heartbeat stamped "now".
    #[must_use]
    pub fn new() -> Self {
        Self {
            last: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Record a successful fetch.
    pub fn beat(&self) {
        if let Ok(mut guard) = self.last.lock() {
            *guard = Instant::now();
        }
    }

    /// Time since the last beat.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.last
            .lock()
            .map(|guard| guard.elapsed())
            .unwrap_or(Duration::MAX)
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn age_grows_without_beats() {
        let hb = Heartbeat::new();
        tokio::time::advance(Duration::from_secs(125)).await;
        assert!(hb.age() >= Duration::from_secs(125));
    }

    #[tokio::test(start_paused = true)]
    async fn beat_resets_age() {
        let hb = Heartbeat::new();
        tokio::time::advance(Duration::from_secs(100)).await;
        hb.beat();
        assert!(hb.age() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn clones_share_the_stamp() {
        let hb = Heartbeat::new();
        let other = hb.clone();
        tokio::time::advance(Duration::from_secs(50)).await;
        other.beat();
        assert!(hb.age() < Duration::from_secs(1));
    }
}
