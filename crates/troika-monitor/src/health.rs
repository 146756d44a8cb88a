//! Backend health checks.
//!
//! Every tick pings the messenger and performs the cheapest read on each
//! sheet contour. Three consecutive failures on a contour invalidate its
//! cached client (the next real call reconnects); five consecutive
//! messenger failures fire the escalation signal the watchdog listens on.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use troika_core::Messenger;
use troika_sheets::SheetHandle;

use crate::error::MonitorResult;

/// Health-monitor tuning.
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Time between checks.
    pub interval: Duration,
    /// Consecutive contour failures that trigger a client rebuild.
    pub invalidate_after: u32,
    /// Consecutive messenger failures that escalate to the watchdog.
    pub escalate_after: u32,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            invalidate_after: 3,
            escalate_after: 5,
        }
    }
}

struct ContourCheck {
    handle: SheetHandle,
    consecutive_failures: u32,
}

/// The periodic backend prober.
pub struct HealthMonitor {
    messenger: Arc<dyn Messenger>,
    contours: Vec<ContourCheck>,
    messenger_failures: u32,
    escalation: CancellationToken,
    config: HealthMonitorConfig,
}

impl HealthMonitor {
    /// Assemble a monitor over the messenger and every sheet contour.
    ///
    /// `escalation` is fired (cancelled) when the messenger stays dead
    /// past the escalation threshold; the watchdog treats it like a
    /// stall.
    #[must_use]
    pub fn new(
        messenger: Arc<dyn Messenger>,
        sheets: Vec<SheetHandle>,
        escalation: CancellationToken,
        config: HealthMonitorConfig,
    ) -> Self {
        Self {
            messenger,
            contours: sheets
                .into_iter()
                .map(|handle| ContourCheck {
                    handle,
                    consecutive_failures: 0,
                })
                .collect(),
            messenger_failures: 0,
            escalation,
            config,
        }
    }

    /// The periodic loop; returns when cancelled.
    ///
    /// # Errors
    ///
    /// Never: individual check failures are state, not errors.
    pub async fn run(mut self, cancel: CancellationToken) -> MonitorResult<()> {
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(self.config.interval) => {},
            }
            self.tick(&cancel).await;
        }
    }

    /// One round of checks.
    pub async fn tick(&mut self, cancel: &CancellationToken) {
        match self.messenger.ping().await {
            Ok(()) => {
                if self.messenger_failures > 0 {
                    debug!("messenger recovered");
                }
                self.messenger_failures = 0;
            },
            Err(e) => {
                self.messenger_failures = self.messenger_failures.saturating_add(1);
                warn!(
                    failures = self.messenger_failures,
                    error = %e,
                    "messenger ping failed"
                );
                if self.messenger_failures >= self.config.escalate_after {
                    error!("messenger unreachable, escalating to watchdog");
                    self.escalation.cancel();
                }
            },
        }

        for contour in &mut self.contours {
            match contour.handle.read_cell(1, 1, cancel).await {
                Ok(_) => {
                    contour.consecutive_failures = 0;
                },
                Err(e) => {
                    contour.consecutive_failures = contour.consecutive_failures.saturating_add(1);
                    warn!(
                        endpoint = contour.handle.endpoint().name(),
                        failures = contour.consecutive_failures,
                        error = %e,
                        "sheet contour check failed"
                    );
                    if contour.consecutive_failures >= self.config.invalidate_after {
                        contour.handle.invalidate_client().await;
                        contour.consecutive_failures = 0;
                    }
                },
            }
        }
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("contours", &self.contours.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use troika_core::{
        Keyboard, MessageRef, MessengerError, MessengerResult, OutboundText, UserId,
    };
    use troika_sheets::{
        ApiError, GatewayConfig, InMemorySheets, SheetEndpoint, SheetsApi, SheetsGateway,
    };

    struct FlakyMessenger {
        healthy: AtomicBool,
    }

    #[async_trait]
    impl Messenger for FlakyMessenger {
        async fn send_text(
            &self,
            chat: UserId,
            _message: OutboundText,
        ) -> MessengerResult<MessageRef> {
            Ok(MessageRef {
                chat,
                message_id: 1,
            })
        }

        async fn edit_text(
            &self,
            _message: MessageRef,
            _text: &str,
            _keyboard: Option<Keyboard>,
        ) -> MessengerResult<()> {
            Ok(())
        }

        async fn send_photo(
            &self,
            chat: UserId,
            _bytes: Vec<u8>,
            _caption: Option<String>,
            _keyboard: Option<Keyboard>,
        ) -> MessengerResult<MessageRef> {
            Ok(MessageRef {
                chat,
                message_id: 1,
            })
        }

        async fn ping(&self) -> MessengerResult<()> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(MessengerError::Transient("down".into()))
            }
        }
    }

    fn counting_handle(api: Arc<InMemorySheets>, connects: Arc<AtomicUsize>) -> SheetHandle {
        SheetsGateway::new(GatewayConfig {
            retry: troika_core::RetryConfig::none(),
            ..GatewayConfig::default()
        })
        .sheet(
            SheetEndpoint::Auth,
            "Partners",
            Arc::new(move || {
                connects.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::clone(&api) as Arc<dyn SheetsApi>)
            }),
        )
    }

    #[tokio::test]
    async fn three_contour_failures_rebuild_client() {
        let api = Arc::new(InMemorySheets::new());
        api.seed("Partners", vec![vec!["h".into()]]);
        let connects = Arc::new(AtomicUsize::new(0));
        let handle = counting_handle(Arc::clone(&api), Arc::clone(&connects));
        let cancel = CancellationToken::new();

        // Warm the client.
        handle.read_cell(1, 1, &cancel).await.unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 1);

        let mut monitor = HealthMonitor::new(
            Arc::new(FlakyMessenger {
                healthy: AtomicBool::new(true),
            }),
            vec![handle.clone()],
            CancellationToken::new(),
            HealthMonitorConfig::default(),
        );

        api.fail_next(3, ApiError::Network("down".into()));
        monitor.tick(&cancel).await;
        monitor.tick(&cancel).await;
        monitor.tick(&cancel).await;

        // Third failure invalidated the cache; the next read reconnects.
        handle.read_cell(1, 1, &cancel).await.unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn contour_recovery_resets_counter() {
        let api = Arc::new(InMemorySheets::new());
        api.seed("Partners", vec![vec!["h".into()]]);
        let connects = Arc::new(AtomicUsize::new(0));
        let handle = counting_handle(Arc::clone(&api), Arc::clone(&connects));
        let cancel = CancellationToken::new();
        handle.read_cell(1, 1, &cancel).await.unwrap();

        let mut monitor = HealthMonitor::new(
            Arc::new(FlakyMessenger {
                healthy: AtomicBool::new(true),
            }),
            vec![handle.clone()],
            CancellationToken::new(),
            HealthMonitorConfig::default(),
        );

        // Two failures, then recovery, then two more: never invalidates.
        api.fail_next(2, ApiError::Network("down".into()));
        monitor.tick(&cancel).await;
        monitor.tick(&cancel).await;
        monitor.tick(&cancel).await;
        api.fail_next(2, ApiError::Network("down".into()));
        monitor.tick(&cancel).await;
        monitor.tick(&cancel).await;

        handle.read_cell(1, 1, &cancel).await.unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn five_messenger_failures_escalate() {
        let api = Arc::new(InMemorySheets::new());
        api.seed("Partners", vec![vec!["h".into()]]);
        let handle = counting_handle(Arc::clone(&api), Arc::new(AtomicUsize::new(0)));
        let escalation = CancellationToken::new();
        let cancel = CancellationToken::new();

        let mut monitor = HealthMonitor::new(
            Arc::new(FlakyMessenger {
                healthy: AtomicBool::new(false),
            }),
            vec![handle],
            escalation.clone(),
            HealthMonitorConfig::default(),
        );

        for _ in 0..4 {
            monitor.tick(&cancel).await;
            assert!(!escalation.is_cancelled());
        }
        monitor.tick(&cancel).await;
        assert!(escalation.is_cancelled());
    }

    #[tokio::test]
    async fn messenger_recovery_resets_counter() {
        let api = Arc::new(InMemorySheets::new());
        api.seed("Partners", vec![vec!["h".into()]]);
        let handle = counting_handle(Arc::clone(&api), Arc::new(AtomicUsize::new(0)));
        let escalation = CancellationToken::new();
        let cancel = CancellationToken::new();
        let messenger = Arc::new(FlakyMessenger {
            healthy: AtomicBool::new(false),
        });

        let mut monitor = HealthMonitor::new(
            Arc::clone(&messenger) as Arc<dyn Messenger>,
            vec![handle],
            escalation.clone(),
            HealthMonitorConfig::default(),
        );

        for _ in 0..4 {
            monitor.tick(&cancel).await;
        }
        messenger.healthy.store(true, Ordering::SeqCst);
        monitor.tick(&cancel).await;
        messenger.healthy.store(false, Ordering::SeqCst);
        for _ in 0..4 {
            monitor.tick(&cancel).await;
        }
        assert!(!escalation.is_cancelled());
    }
}
