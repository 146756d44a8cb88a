//! Specialist-reply delivery.
//!
//! Specialists answer by typing into the reply column of the appeals
//! sheet. Each tick finds the non-empty reply cells and, per row: sends
//! the reply to the user, appends a delivery marker to the message log,
//! marks the appeal resolved, and clears the cell.
//!
//! Delivery is at-least-once with idempotent clearing: if the process
//! dies between the send and the clear, the next tick resends and the
//! log simply gains a second marker entry.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use troika_appeals::{AppealStatus, AppealsService, SpecialistReply};
use troika_core::{mask, Messenger, OutboundText, SendLimiter};

use crate::error::MonitorResult;

/// Response-monitor tuning.
#[derive(Debug, Clone)]
pub struct ResponseMonitorConfig {
    /// Time between scans.
    pub interval: Duration,
}

impl Default for ResponseMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// The periodic specialist-reply scanner.
pub struct ResponseMonitor {
    appeals: Arc<AppealsService>,
    messenger: Arc<dyn Messenger>,
    limiter: Arc<SendLimiter>,
    config: ResponseMonitorConfig,
}

impl ResponseMonitor {
    /// Assemble a monitor.
    #[must_use]
    pub fn new(
        appeals: Arc<AppealsService>,
        messenger: Arc<dyn Messenger>,
        limiter: Arc<SendLimiter>,
        config: ResponseMonitorConfig,
    ) -> Self {
        Self {
            appeals,
            messenger,
            limiter,
            config,
        }
    }

    /// The periodic loop; returns when cancelled.
    ///
    /// # Errors
    ///
    /// Never after startup: tick failures are logged and the next tick
    /// retries.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> MonitorResult<()> {
        loop {
            match self.tick(&cancel).await {
                Ok(0) => {},
                Ok(delivered) => info!(delivered, "specialist replies delivered"),
                Err(e) => warn!(error = %e, "response monitor tick failed"),
            }

            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(self.config.interval) => {},
            }
        }
    }

    /// One scan; returns how many replies were fully processed.
    ///
    /// # Errors
    ///
    /// Sheet failures enumerating rows. Per-row failures are logged and
    /// left for the next tick.
    pub async fn tick(&self, cancel: &CancellationToken) -> MonitorResult<usize> {
        if !self.appeals.has_any_records(cancel).await? {
            return Ok(0);
        }

        let pending = self.appeals.scan_for_specialist_replies(cancel).await?;
        let mut delivered: usize = 0;

        for reply in pending {
            if cancel.is_cancelled() {
                break;
            }
            match self.deliver(&reply, cancel).await {
                Ok(()) => delivered = delivered.saturating_add(1),
                Err(e) => {
                    warn!(
                        user = %mask::user_id(reply.user),
                        row = reply.row,
                        error = %e,
                        "specialist reply delivery failed, will retry next tick"
                    );
                },
            }
        }

        Ok(delivered)
    }

    /// Send, mark, resolve, clear. Ordered so an interruption can only
    /// cause a resend, never a silent drop.
    async fn deliver(&self, reply: &SpecialistReply, cancel: &CancellationToken) -> MonitorResult<()> {
        self.limiter.acquire(reply.user).await;
        self.messenger
            .send_text(
                reply.user,
                OutboundText::plain(format!("Reply from our specialist:\n\n{}", reply.reply)),
            )
            .await?;

        self.appeals
            .append_specialist_entry(reply.user, &reply.reply, cancel)
            .await?;
        self.appeals
            .set_status(reply.user, AppealStatus::Resolved, cancel)
            .await?;
        self.appeals.clear_specialist_reply(reply.row, cancel).await?;

        info!(user = %mask::user_id(reply.user), "specialist reply delivered");
        Ok(())
    }
}

impl std::fmt::Debug for ResponseMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseMonitor")
            .field("interval", &self.config.interval)
            .finish_non_exhaustive()
    }
}
