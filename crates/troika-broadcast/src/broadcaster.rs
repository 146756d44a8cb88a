//! The broadcaster loop.
//!
//! Every scan reads the promotions sheet, refreshes the in-memory active
//! snapshot (which also feeds the assistant's promotions tool), resolves
//! the authorized audience, and delivers every (promotion, user) pair the
//! ledger has not seen. The ledger entry is written only after the send
//! succeeds; a failed recipient is retried on the next scan.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use troika_auth::AuthService;
use troika_core::{mask, Keyboard, KeyboardButton, Messenger, OutboundText, SendLimiter, UserId};
use troika_sheets::SheetHandle;

use crate::error::BroadcastResult;
use crate::ledger::SentLedger;
use crate::media::MediaCache;
use crate::promotion::{Promotion, PromotionStatus};

/// Broadcaster tuning.
#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    /// Time between scans.
    pub scan_interval: Duration,
    /// Concurrent deliveries.
    pub delivery_concurrency: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(15 * 60),
            delivery_concurrency: 4,
        }
    }
}

/// Promotion fan-out driver.
pub struct Broadcaster {
    sheet: SheetHandle,
    auth: Arc<AuthService>,
    messenger: Arc<dyn Messenger>,
    limiter: Arc<SendLimiter>,
    ledger: SentLedger,
    media: MediaCache,
    snapshot: tokio::sync::RwLock<Vec<Promotion>>,
    config: BroadcasterConfig,
}

impl Broadcaster {
    /// Assemble a broadcaster.
    #[must_use]
    pub fn new(
        sheet: SheetHandle,
        auth: Arc<AuthService>,
        messenger: Arc<dyn Messenger>,
        limiter: Arc<SendLimiter>,
        ledger: SentLedger,
        media: MediaCache,
        config: BroadcasterConfig,
    ) -> Self {
        Self {
            sheet,
            auth,
            messenger,
            limiter,
            ledger,
            media,
            snapshot: tokio::sync::RwLock::new(Vec::new()),
            config,
        }
    }

    /// The active promotions seen by the last scan.
    ///
    /// This is the read surface handed (behind a narrow trait) to the
    /// assistant's `get_active_promotions` tool.
    pub async fn active_snapshot(&self) -> Vec<Promotion> {
        self.snapshot.read().await.clone()
    }

    /// The periodic loop; returns when cancelled.
    ///
    /// # Errors
    ///
    /// Never after startup: scan failures are logged and the next tick
    /// retries.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> BroadcastResult<()> {
        loop {
            match self.scan_once(&cancel).await {
                Ok(0) => {},
                Ok(delivered) => info!(delivered, "broadcast scan delivered promotions"),
                Err(e) => warn!(error = %e, "broadcast scan failed"),
            }

            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(self.config.scan_interval) => {},
            }
        }
    }

    /// One scan: refresh the snapshot and deliver what is owed.
    ///
    /// Returns how many deliveries succeeded.
    ///
    /// # Errors
    ///
    /// Sheet or audience failures; individual delivery failures are only
    /// logged (they retry next scan).
    pub async fn scan_once(&self, cancel: &CancellationToken) -> BroadcastResult<usize> {
        let rows = self.sheet.list_rows(cancel).await?;
        let active: Vec<Promotion> = rows
            .iter()
            .skip(1)
            .filter_map(Promotion::from_row)
            .filter(|p| p.status == PromotionStatus::Active)
            .collect();

        *self.snapshot.write().await = active.clone();

        if active.is_empty() {
            return Ok(0);
        }

        let audience = self.auth.list_authorized(cancel).await?;
        if audience.is_empty() {
            return Ok(0);
        }

        let mut owed: Vec<(Promotion, UserId)> = Vec::new();
        for promotion in &active {
            for &user in &audience {
                if !self.ledger.contains(&promotion.id, user).await {
                    owed.push((promotion.clone(), user));
                }
            }
        }

        let delivered = futures::stream::iter(owed)
            .map(|(promotion, user)| async move {
                match self.deliver(&promotion, user, cancel).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(
                            promotion = %promotion.id,
                            user = %mask::user_id(user),
                            error = %e,
                            "promotion delivery failed"
                        );
                        false
                    },
                }
            })
            .buffer_unordered(self.config.delivery_concurrency.max(1))
            .filter(|ok| std::future::ready(*ok))
            .count()
            .await;

        Ok(delivered)
    }

    async fn deliver(
        &self,
        promotion: &Promotion,
        user: UserId,
        cancel: &CancellationToken,
    ) -> BroadcastResult<()> {
        let media = match &promotion.content_url {
            Some(url) => Some(self.media.fetch(url, cancel).await?),
            None => None,
        };

        let keyboard = promotion.link.as_ref().map(|link| {
            Keyboard::single(KeyboardButton::Url {
                label: "Open".to_string(),
                url: link.clone(),
            })
        });
        let text = promotion.message_text();

        self.limiter.acquire(user).await;
        match media {
            Some(bytes) => {
                self.messenger
                    .send_photo(user, bytes.to_vec(), Some(text), keyboard)
                    .await?;
            },
            None => {
                let mut outbound = OutboundText::plain(text);
                outbound.keyboard = keyboard;
                self.messenger.send_text(user, outbound).await?;
            },
        }

        self.ledger.record(&promotion.id, user).await?;
        info!(
            promotion = %promotion.id,
            user = %mask::user_id(user),
            "promotion delivered"
        );
        Ok(())
    }
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("scan_interval", &self.config.scan_interval)
            .finish_non_exhaustive()
    }
}
