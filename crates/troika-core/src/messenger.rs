//! The messenger capability consumed by the router and the monitors.
//!
//! The long-poll transport itself lives in the frontend crate; everything
//! below it only sees this trait, which keeps the monitors and the
//! broadcaster testable against a scripted fake.

use async_trait::async_trait;
use thiserror::Error;

use crate::ids::UserId;

/// Errors surfaced by messenger operations.
#[derive(Debug, Error)]
pub enum MessengerError {
    /// Network trouble, 5xx, or an explicit retry-after. Worth retrying.
    #[error("messenger transient failure: {0}")]
    Transient(String),

    /// Bad token, blocked bot, malformed request. Not retryable.
    #[error("messenger permanent failure: {0}")]
    Permanent(String),

    /// The send timed out.
    #[error("messenger send timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl MessengerError {
    /// Whether a retry may help.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

/// Result alias for messenger operations.
pub type MessengerResult<T> = Result<T, MessengerError>;

/// Reference to a delivered message, used for later edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    /// Chat the message went to.
    pub chat: UserId,
    /// Messenger-assigned message id.
    pub message_id: i64,
}

/// A single inline keyboard button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyboardButton {
    /// Opens a URL when tapped.
    Url {
        /// Button label.
        label: String,
        /// Target URL.
        url: String,
    },
    /// Sends a callback payload back to the bot.
    Callback {
        /// Button label.
        label: String,
        /// Opaque payload delivered with the callback.
        data: String,
    },
}

/// Inline keyboard layout: rows of buttons.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    /// Button rows, top to bottom.
    pub rows: Vec<Vec<KeyboardButton>>,
}

impl Keyboard {
    /// A keyboard with a single button.
    #[must_use]
    pub fn single(button: KeyboardButton) -> Self {
        Self {
            rows: vec![vec![button]],
        }
    }

    /// Whether there are no buttons.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(Vec::is_empty)
    }
}

/// An outbound text message.
#[derive(Debug, Clone, Default)]
pub struct OutboundText {
    /// Message body.
    pub text: String,
    /// Optional inline keyboard.
    pub keyboard: Option<Keyboard>,
}

impl OutboundText {
    /// Plain text without a keyboard.
    #[must_use]
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: None,
        }
    }

    /// Attach a keyboard.
    #[must_use]
    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}

/// Outbound messenger operations.
///
/// Implementations perform their own timeout handling (30s per send) and
/// classify errors into [`MessengerError`]. Rate limiting is the caller's
/// job (see [`crate::rate_limit::SendLimiter`]).
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a text message to a chat.
    async fn send_text(&self, chat: UserId, message: OutboundText) -> MessengerResult<MessageRef>;

    /// Replace the text of a previously sent message.
    ///
    /// Used by the router to stream assistant output into one message.
    async fn edit_text(
        &self,
        message: MessageRef,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> MessengerResult<()>;

    /// Send a photo with an optional caption.
    async fn send_photo(
        &self,
        chat: UserId,
        bytes: Vec<u8>,
        caption: Option<String>,
        keyboard: Option<Keyboard>,
    ) -> MessengerResult<MessageRef>;

    /// Cheap liveness probe (the bot identity call).
    async fn ping(&self) -> MessengerResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(MessengerError::Transient("503".into()).is_transient());
        assert!(MessengerError::Timeout(std::time::Duration::from_secs(30)).is_transient());
        assert!(!MessengerError::Permanent("401".into()).is_transient());
    }

    #[test]
    fn single_button_keyboard() {
        let kb = Keyboard::single(KeyboardButton::Url {
            label: "Open".into(),
            url: "https://example.com/".into(),
        });
        assert_eq!(kb.rows.len(), 1);
        assert!(!kb.is_empty());
        assert!(Keyboard::default().is_empty());
    }
}
