//! Streams a turn into one Telegram message.
//!
//! The assistant produces small text deltas; Telegram tolerates neither a
//! message per delta nor an edit per delta. The relay accumulates chunks
//! and edits the placeholder message when enough text gathered or enough
//! time passed, then applies the terminal event.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use troika_ai::TurnEvent;
use troika_core::{Keyboard, MessageRef, Messenger, SendLimiter};

/// Flush once this many characters are pending.
const FLUSH_CHARS: usize = 80;
/// Flush pending text at least this often.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// How the relayed turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RelayOutcome {
    /// The turn completed with this final text.
    Completed {
        /// Full assistant reply.
        text: String,
        /// Whether escalation was suggested.
        escalate: bool,
    },
    /// The turn was superseded mid-stream.
    Cancelled,
    /// The turn failed after the placeholder went out.
    Failed,
}

/// Drain `rx` into edits of `placeholder`.
///
/// `escalation_keyboard` is attached to the final edit when the turn
/// classifies as escalation-worthy.
pub(crate) async fn relay_turn(
    messenger: &dyn Messenger,
    limiter: &SendLimiter,
    placeholder: MessageRef,
    mut rx: mpsc::Receiver<TurnEvent>,
    escalation_keyboard: Option<Keyboard>,
) -> RelayOutcome {
    let mut full = String::new();
    let mut pending_chars: usize = 0;
    let mut last_flush = Instant::now();

    loop {
        let deadline = last_flush
            .checked_add(FLUSH_INTERVAL)
            .unwrap_or_else(Instant::now);

        tokio::select! {
            event = rx.recv() => match event {
                None => {
                    // Producer dropped without a terminal event; treat as
                    // cancellation.
                    return RelayOutcome::Cancelled;
                },
                Some(TurnEvent::Chunk(delta)) => {
                    pending_chars = pending_chars.saturating_add(delta.chars().count());
                    full.push_str(&delta);
                    if pending_chars >= FLUSH_CHARS {
                        flush(messenger, limiter, placeholder, &full).await;
                        pending_chars = 0;
                        last_flush = Instant::now();
                    }
                },
                Some(TurnEvent::Final { text, escalate }) => {
                    let keyboard = if escalate { escalation_keyboard } else { None };
                    let body = if text.is_empty() { "…".to_string() } else { text.clone() };
                    limiter.acquire(placeholder.chat).await;
                    if let Err(e) = messenger.edit_text(placeholder, &body, keyboard).await {
                        debug!(error = %e, "final edit failed");
                    }
                    return RelayOutcome::Completed { text, escalate };
                },
                Some(TurnEvent::Cancelled) => {
                    // Leave whatever was already rendered; the next turn
                    // brings its own message.
                    return RelayOutcome::Cancelled;
                },
                Some(TurnEvent::Failed { message }) => {
                    limiter.acquire(placeholder.chat).await;
                    if let Err(e) = messenger.edit_text(placeholder, &message, None).await {
                        debug!(error = %e, "failure edit failed");
                    }
                    return RelayOutcome::Failed;
                },
            },
            () = tokio::time::sleep_until(deadline), if pending_chars > 0 => {
                flush(messenger, limiter, placeholder, &full).await;
                pending_chars = 0;
                last_flush = Instant::now();
            },
        }
    }
}

/// Best-effort intermediate edit; a failed edit only costs smoothness.
async fn flush(
    messenger: &dyn Messenger,
    limiter: &SendLimiter,
    placeholder: MessageRef,
    text: &str,
) {
    limiter.acquire(placeholder.chat).await;
    if let Err(e) = messenger.edit_text(placeholder, text, None).await {
        debug!(error = %e, "intermediate edit failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use troika_core::{KeyboardButton, MessengerResult, OutboundText, UserId};

    struct RecordingMessenger {
        edits: Mutex<Vec<(String, bool)>>,
    }

    impl RecordingMessenger {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                edits: Mutex::new(Vec::new()),
            })
        }

        fn edits(&self) -> Vec<(String, bool)> {
            self.edits.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Messenger for RecordingMessenger {
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
            text: &str,
            keyboard: Option<Keyboard>,
        ) -> MessengerResult<()> {
            self.edits
                .lock()
                .unwrap()
                .push((text.to_string(), keyboard.is_some()));
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
            Ok(())
        }
    }

    fn placeholder() -> MessageRef {
        MessageRef {
            chat: UserId(1),
            message_id: 10,
        }
    }

    fn wide_limiter() -> SendLimiter {
        SendLimiter::new(
            10_000,
            Duration::from_secs(1),
            10_000,
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn large_chunk_flushes_immediately() {
        let messenger = RecordingMessenger::new();
        let limiter = wide_limiter();
        let (tx, rx) = mpsc::channel(8);

        let long = "x".repeat(100);
        tx.send(TurnEvent::Chunk(long.clone())).await.unwrap();
        tx.send(TurnEvent::Final {
            text: long.clone(),
            escalate: false,
        })
        .await
        .unwrap();

        let outcome = relay_turn(messenger.as_ref(), &limiter, placeholder(), rx, None).await;
        assert!(matches!(outcome, RelayOutcome::Completed { .. }));

        let edits = messenger.edits();
        assert_eq!(edits.len(), 2);
        assert_eq!(edits[0].0, long);
    }

    #[tokio::test]
    async fn small_chunks_wait_for_the_timer() {
        let messenger = RecordingMessenger::new();
        let limiter = wide_limiter();
        let (tx, rx) = mpsc::channel(8);

        let relay = tokio::spawn({
            let messenger = Arc::clone(&messenger);
            async move { relay_turn(messenger.as_ref(), &limiter, placeholder(), rx, None).await }
        });

        tx.send(TurnEvent::Chunk("short".into())).await.unwrap();
        // Under the char threshold: no immediate edit.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(messenger.edits().is_empty());

        // The 1s timer flushes it.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(messenger.edits().len(), 1);
        assert_eq!(messenger.edits()[0].0, "short");

        tx.send(TurnEvent::Final {
            text: "short and done".into(),
            escalate: false,
        })
        .await
        .unwrap();
        let outcome = relay.await.unwrap();
        assert_eq!(
            outcome,
            RelayOutcome::Completed {
                text: "short and done".into(),
                escalate: false
            }
        );
    }

    #[tokio::test]
    async fn final_edit_carries_escalation_keyboard() {
        let messenger = RecordingMessenger::new();
        let limiter = wide_limiter();
        let (tx, rx) = mpsc::channel(8);

        tx.send(TurnEvent::Final {
            text: "contact a specialist".into(),
            escalate: true,
        })
        .await
        .unwrap();

        let keyboard = Keyboard::single(KeyboardButton::Callback {
            label: "Contact specialist".into(),
            data: "contact_specialist".into(),
        });
        let outcome =
            relay_turn(messenger.as_ref(), &limiter, placeholder(), rx, Some(keyboard)).await;
        assert!(matches!(
            outcome,
            RelayOutcome::Completed { escalate: true, .. }
        ));

        let edits = messenger.edits();
        assert_eq!(edits.len(), 1);
        assert!(edits[0].1, "final edit should carry the keyboard");
    }

    #[tokio::test]
    async fn failure_edits_the_apology() {
        let messenger = RecordingMessenger::new();
        let limiter = wide_limiter();
        let (tx, rx) = mpsc::channel(8);

        tx.send(TurnEvent::Failed {
            message: "temporarily unavailable".into(),
        })
        .await
        .unwrap();

        let outcome = relay_turn(messenger.as_ref(), &limiter, placeholder(), rx, None).await;
        assert_eq!(outcome, RelayOutcome::Failed);
        assert_eq!(messenger.edits()[0].0, "temporarily unavailable");
    }

    #[tokio::test]
    async fn cancellation_stops_without_further_edits() {
        let messenger = RecordingMessenger::new();
        let limiter = wide_limiter();
        let (tx, rx) = mpsc::channel(8);

        tx.send(TurnEvent::Chunk("partial".into())).await.unwrap();
        tx.send(TurnEvent::Cancelled).await.unwrap();

        let outcome = relay_turn(messenger.as_ref(), &limiter, placeholder(), rx, None).await;
        assert_eq!(outcome, RelayOutcome::Cancelled);
        assert!(messenger.edits().is_empty());
    }
}
