//! The polling watchdog.
//!
//! The router stamps a heartbeat after every successful long-poll fetch.
//! The watchdog checks the stamp's age on a short cadence; a stall past
//! the threshold (or an escalation from the health monitor) means the
//! messenger loop is wedged beyond what a reconnect can fix. The loop
//! then logs the state snapshot, cancels every tracked task, and returns
//! the verdict; the binary exits non-zero so the supervisor restarts it.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use troika_core::{Heartbeat, TaskTracker};

/// Watchdog tuning.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Time between heartbeat checks.
    pub check_interval: Duration,
    /// Heartbeat age that counts as a stall.
    pub stall_after: Duration,
    /// Grace given to tasks during the emergency shutdown.
    pub shutdown_grace: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            stall_after: Duration::from_secs(120),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Why the watchdog returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    /// The polling loop stalled (or the health monitor escalated); the
    /// process must exit non-zero.
    Stalled,
    /// Normal shutdown.
    Cancelled,
}

/// The stall detector.
pub struct Watchdog {
    heartbeat: Heartbeat,
    tracker: TaskTracker,
    escalation: CancellationToken,
    config: WatchdogConfig,
}

impl Watchdog {
    /// Assemble a watchdog.
    ///
    /// `escalation` is the token the health monitor fires when the
    /// messenger is unreachable for too long.
    #[must_use]
    pub fn new(
        heartbeat: Heartbeat,
        tracker: TaskTracker,
        escalation: CancellationToken,
        config: WatchdogConfig,
    ) -> Self {
        Self {
            heartbeat,
            tracker,
            escalation,
            config,
        }
    }

    /// Watch until a stall or cancellation.
    ///
    /// On a stall this performs the emergency shutdown (cancel all
    /// tracked tasks, bounded wait) before returning; the caller only has
    /// to exit the process.
    pub async fn run(self, cancel: CancellationToken) -> WatchdogVerdict {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("watchdog cancelled");
                    return WatchdogVerdict::Cancelled;
                },
                () = self.escalation.cancelled() => {
                    self.declare_stall("health monitor escalation").await;
                    return WatchdogVerdict::Stalled;
                },
                () = tokio::time::sleep(self.config.check_interval) => {},
            }

            let age = self.heartbeat.age();
            if age >= self.config.stall_after {
                self.declare_stall(&format!("no successful fetch for {}s", age.as_secs()))
                    .await;
                return WatchdogVerdict::Stalled;
            }
        }
    }

    async fn declare_stall(&self, reason: &str) {
        let snapshot = self.tracker.snapshot();
        error!(
            reason,
            heartbeat_age_secs = self.heartbeat.age().as_secs(),
            tasks = ?snapshot
                .iter()
                .map(|(name, state, _)| format!("{name}:{state:?}"))
                .collect::<Vec<_>>(),
            "CRITICAL: polling loop stalled, forcing restart"
        );
        self.tracker.shutdown(self.config.shutdown_grace).await;
    }
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("stall_after", &self.config.stall_after)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watchdog(heartbeat: Heartbeat, tracker: TaskTracker) -> (Watchdog, CancellationToken) {
        let escalation = CancellationToken::new();
        (
            Watchdog::new(
                heartbeat,
                tracker,
                escalation.clone(),
                WatchdogConfig {
                    shutdown_grace: Duration::from_millis(100),
                    ..WatchdogConfig::default()
                },
            ),
            escalation,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn silent_heartbeat_is_a_stall() {
        let (dog, _escalation) = watchdog(Heartbeat::new(), TaskTracker::new());
        let verdict = dog.run(CancellationToken::new()).await;
        assert_eq!(verdict, WatchdogVerdict::Stalled);
    }

    #[tokio::test(start_paused = true)]
    async fn beating_heartbeat_keeps_running() {
        let heartbeat = Heartbeat::new();
        let (dog, _escalation) = watchdog(heartbeat.clone(), TaskTracker::new());
        let cancel = CancellationToken::new();

        let beater = heartbeat.clone();
        let beat_task = tokio::spawn(async move {
            for _ in 0..20 {
                tokio::time::sleep(Duration::from_secs(25)).await;
                beater.beat();
            }
        });

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(400)).await;
            stopper.cancel();
        });

        let verdict = dog.run(cancel).await;
        assert_eq!(verdict, WatchdogVerdict::Cancelled);
        beat_task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn stall_cancels_tracked_tasks() {
        let tracker = TaskTracker::new();
        tracker.track("loop", |cancel| async move {
            cancel.cancelled().await;
            Ok::<_, String>(())
        });

        let (dog, _escalation) = watchdog(Heartbeat::new(), tracker.clone());
        let verdict = dog.run(CancellationToken::new()).await;
        assert_eq!(verdict, WatchdogVerdict::Stalled);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(tracker.running_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn escalation_signal_forces_stall_immediately() {
        let heartbeat = Heartbeat::new();
        let (dog, escalation) = watchdog(heartbeat.clone(), TaskTracker::new());

        // Heartbeat is fresh, but the health monitor gave up on the
        // messenger.
        heartbeat.beat();
        escalation.cancel();

        let verdict = dog.run(CancellationToken::new()).await;
        assert_eq!(verdict, WatchdogVerdict::Stalled);
    }
}
