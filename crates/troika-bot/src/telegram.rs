//! Telegram implementation of the [`Messenger`] capability.
//!
//! Thin adapter over the teloxide bot client: keyboard conversion, 30s
//! send timeouts, and error classification into the messenger taxonomy.

use std::time::Duration;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    ChatId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId,
};
use teloxide::ApiError as TgApiError;
use teloxide::RequestError;

use troika_core::{
    Keyboard, KeyboardButton, MessageRef, Messenger, MessengerError, MessengerResult, OutboundText,
    UserId,
};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// The teloxide-backed messenger.
#[derive(Clone)]
pub(crate) struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    /// Adapter over an authenticated bot client.
    #[must_use]
    pub(crate) fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn markup(keyboard: Keyboard) -> InlineKeyboardMarkup {
    let rows = keyboard.rows.into_iter().map(|row| {
        row.into_iter()
            .filter_map(|button| match button {
                KeyboardButton::Url { label, url } => url
                    .parse()
                    .ok()
                    .map(|parsed| InlineKeyboardButton::url(label, parsed)),
                KeyboardButton::Callback { label, data } => {
                    Some(InlineKeyboardButton::callback(label, data))
                },
            })
            .collect::<Vec<_>>()
    });
    InlineKeyboardMarkup::new(rows)
}

fn classify(error: RequestError) -> MessengerError {
    match error {
        RequestError::RetryAfter(seconds) => {
            MessengerError::Transient(format!("retry after {seconds:?}"))
        },
        RequestError::Network(e) => MessengerError::Transient(e.to_string()),
        RequestError::Io(e) => MessengerError::Transient(e.to_string()),
        RequestError::Api(TgApiError::Unknown(ref text)) if text.contains("Too Many Requests") => {
            MessengerError::Transient(text.clone())
        },
        RequestError::Api(e) => MessengerError::Permanent(e.to_string()),
        RequestError::InvalidJson { source, .. } => MessengerError::Transient(source.to_string()),
        other => MessengerError::Permanent(other.to_string()),
    }
}

async fn with_timeout<T, F>(fut: F) -> MessengerResult<T>
where
    F: std::future::Future<Output = Result<T, RequestError>>,
{
    match tokio::time::timeout(SEND_TIMEOUT, fut).await {
        Err(_) => Err(MessengerError::Timeout(SEND_TIMEOUT)),
        Ok(Err(e)) => Err(classify(e)),
        Ok(Ok(value)) => Ok(value),
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_text(&self, chat: UserId, message: OutboundText) -> MessengerResult<MessageRef> {
        let mut request = self.bot.send_message(ChatId(chat.0), message.text);
        if let Some(keyboard) = message.keyboard {
            request = request.reply_markup(markup(keyboard));
        }
        let sent = with_timeout(request.send()).await?;
        Ok(MessageRef {
            chat,
            message_id: i64::from(sent.id.0),
        })
    }

    async fn edit_text(
        &self,
        message: MessageRef,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> MessengerResult<()> {
        let message_id = i32::try_from(message.message_id)
            .map_err(|_| MessengerError::Permanent("message id out of range".to_string()))?;
        let mut request = self.bot.edit_message_text(
            ChatId(message.chat.0),
            MessageId(message_id),
            text.to_string(),
        );
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(markup(keyboard));
        }
        with_timeout(request.send()).await?;
        Ok(())
    }

    async fn send_photo(
        &self,
        chat: UserId,
        bytes: Vec<u8>,
        caption: Option<String>,
        keyboard: Option<Keyboard>,
    ) -> MessengerResult<MessageRef> {
        let mut request = self
            .bot
            .send_photo(ChatId(chat.0), InputFile::memory(bytes));
        if let Some(caption) = caption {
            request = request.caption(caption);
        }
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(markup(keyboard));
        }
        let sent = with_timeout(request.send()).await?;
        Ok(MessageRef {
            chat,
            message_id: i64::from(sent.id.0),
        })
    }

    async fn ping(&self) -> MessengerResult<()> {
        with_timeout(self.bot.get_me().send()).await?;
        Ok(())
    }
}

impl std::fmt::Debug for TelegramMessenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramMessenger").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyboard_conversion_keeps_shape() {
        let keyboard = Keyboard {
            rows: vec![
                vec![KeyboardButton::Url {
                    label: "Form".into(),
                    url: "https://forms.example.com/".into(),
                }],
                vec![KeyboardButton::Callback {
                    label: "Specialist".into(),
                    data: "contact_specialist".into(),
                }],
            ],
        };
        let markup = markup(keyboard);
        assert_eq!(markup.inline_keyboard.len(), 2);
        assert_eq!(markup.inline_keyboard[0].len(), 1);
    }

    #[test]
    fn invalid_button_url_dropped() {
        let keyboard = Keyboard::single(KeyboardButton::Url {
            label: "Bad".into(),
            url: "not a url".into(),
        });
        let markup = markup(keyboard);
        assert!(markup.inline_keyboard[0].is_empty());
    }
}
