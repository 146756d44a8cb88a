//! Inbound message routing.
//!
//! Per inbound event: stamp the heartbeat, enforce authorization, then
//! route. `/start` offers the web form or the menu; a web-form payload
//! binds the partner; an explicit specialist request flips the appeal to
//! `in_work`; anything else becomes an appeal entry plus an assistant
//! turn streamed back into the chat.

use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use troika_ai::SessionManager;
use troika_appeals::{AppealContact, AppealStatus, AppealsService};
use troika_auth::{AuthError, AuthService};
use troika_core::{
    mask, Heartbeat, Keyboard, KeyboardButton, MessageRef, Messenger, OutboundText, SendLimiter,
    UserId,
};

use crate::relay::{relay_turn, RelayOutcome};

/// Callback payload of the contact-specialist button.
pub(crate) const CONTACT_SPECIALIST_CALLBACK: &str = "contact_specialist";

const CONTACT_PHRASES: &[&str] = &[
    "contact specialist",
    "contact a specialist",
    "talk to a specialist",
    "speak with a specialist",
];

const MENU_TEXT: &str = "You are authorized. Ask me anything about partner terms and \
                         promotions, and I will answer or hand you to a specialist.";
const UNAUTHORIZED_TEXT: &str =
    "Please authorize first: open the form and enter your partner code and phone.";
const SPECIALIST_ACK: &str =
    "Passed to a specialist. You will get an answer here as soon as they reply.";
const APOLOGY: &str = "Something went wrong on our side. Please try again in a minute.";

#[derive(Debug, Deserialize)]
struct WebFormPayload {
    partner_code: String,
    partner_phone: String,
}

/// One routed inbound event.
#[derive(Debug, Clone)]
pub(crate) enum Inbound {
    /// Plain chat text or a command.
    Text(String),
    /// Structured web-form submission payload (JSON).
    WebForm(String),
    /// Inline keyboard callback.
    Callback(String),
}

/// Errors the router maps into a user-visible apology.
#[derive(Debug, thiserror::Error)]
enum RouterError {
    #[error(transparent)]
    Auth(#[from] troika_auth::AuthError),
    #[error(transparent)]
    Appeals(#[from] troika_appeals::AppealsError),
    #[error(transparent)]
    Messenger(#[from] troika_core::MessengerError),
}

/// The message router.
pub(crate) struct Router {
    auth: Arc<AuthService>,
    appeals: Arc<AppealsService>,
    sessions: Arc<SessionManager>,
    messenger: Arc<dyn Messenger>,
    limiter: Arc<SendLimiter>,
    heartbeat: Heartbeat,
    web_form_url: String,
    cancel: CancellationToken,
}

impl Router {
    /// Assemble the router.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub(crate) fn new(
        auth: Arc<AuthService>,
        appeals: Arc<AppealsService>,
        sessions: Arc<SessionManager>,
        messenger: Arc<dyn Messenger>,
        limiter: Arc<SendLimiter>,
        heartbeat: Heartbeat,
        web_form_url: String,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            auth,
            appeals,
            sessions,
            messenger,
            limiter,
            heartbeat,
            web_form_url,
            cancel,
        }
    }

    /// Route one inbound event. Never returns an error: failures become
    /// an apology to the user and a structured log record.
    pub(crate) async fn handle(&self, user: UserId, inbound: Inbound) {
        self.heartbeat.beat();

        let result = match inbound {
            Inbound::Text(text) => self.handle_text(user, &text).await,
            Inbound::WebForm(payload) => self.handle_web_form(user, &payload).await,
            Inbound::Callback(data) => self.handle_callback(user, &data).await,
        };

        if let Err(e) = result {
            error!(user = %mask::user_id(user), error = %e, "routing failed");
            let _ = self.send(user, OutboundText::plain(APOLOGY)).await;
        }
    }

    async fn handle_text(&self, user: UserId, text: &str) -> Result<(), RouterError> {
        let trimmed = text.trim();
        match trimmed {
            "/start" => return self.handle_start(user).await,
            "/help" => {
                self.send(
                    user,
                    OutboundText::plain(
                        "Ask a question in plain words. Use the button under an answer \
                         to reach a specialist. /start shows the menu again.",
                    ),
                )
                .await?;
                return Ok(());
            },
            _ => {},
        }

        if is_contact_request(trimmed) {
            return self.handle_specialist_request(user).await;
        }

        if !self.auth.is_authorized(user, &self.cancel).await? {
            self.send_authorization_prompt(user).await?;
            return Ok(());
        }

        self.handle_chat(user, trimmed).await
    }

    async fn handle_start(&self, user: UserId) -> Result<(), RouterError> {
        if self.auth.is_authorized(user, &self.cancel).await? {
            self.send(user, OutboundText::plain(MENU_TEXT)).await?;
        } else {
            self.send_authorization_prompt(user).await?;
        }
        Ok(())
    }

    async fn handle_web_form(&self, user: UserId, payload: &str) -> Result<(), RouterError> {
        let parsed: WebFormPayload = match serde_json::from_str(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(user = %mask::user_id(user), error = %e, "malformed web form payload");
                self.send(
                    user,
                    OutboundText::plain("The form data did not come through. Please try again."),
                )
                .await?;
                return Ok(());
            },
        };

        match self
            .auth
            .bind(&parsed.partner_code, &parsed.partner_phone, user, &self.cancel)
            .await
        {
            Ok(()) => {
                info!(user = %mask::user_id(user), "partner authorized");
                self.send(
                    user,
                    OutboundText::plain(format!("You are authorized. {MENU_TEXT}")),
                )
                .await?;
            },
            Err(AuthError::NotFound) => {
                self.send(
                    user,
                    OutboundText::plain(
                        "No partner record matches that code and phone. Check the details \
                         and submit the form again.",
                    ),
                )
                .await?;
            },
            Err(AuthError::InvalidPhone(_)) => {
                self.send(
                    user,
                    OutboundText::plain("That phone number does not look right. Please use \
                                         the format 8XXXXXXXXXX."),
                )
                .await?;
            },
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn handle_callback(&self, user: UserId, data: &str) -> Result<(), RouterError> {
        if data == CONTACT_SPECIALIST_CALLBACK {
            return self.handle_specialist_request(user).await;
        }
        warn!(user = %mask::user_id(user), data, "unknown callback");
        Ok(())
    }

    async fn handle_specialist_request(&self, user: UserId) -> Result<(), RouterError> {
        if !self.auth.is_authorized(user, &self.cancel).await? {
            self.send_authorization_prompt(user).await?;
            return Ok(());
        }

        let contact = self.contact_of(user).await;
        self.appeals
            .append_user_message(user, &contact, "requested a specialist consultation", &self.cancel)
            .await?;
        self.appeals
            .set_status(user, AppealStatus::InWork, &self.cancel)
            .await?;
        self.send(user, OutboundText::plain(SPECIALIST_ACK)).await?;
        Ok(())
    }

    async fn handle_chat(&self, user: UserId, text: &str) -> Result<(), RouterError> {
        let contact = self.contact_of(user).await;
        self.appeals
            .append_user_message(user, &contact, text, &self.cancel)
            .await?;

        let placeholder = self.send(user, OutboundText::plain("Thinking...")).await?;
        let rx = self.sessions.submit(user, text.to_string());

        let escalation_keyboard = Keyboard::single(KeyboardButton::Callback {
            label: "Contact a specialist".to_string(),
            data: CONTACT_SPECIALIST_CALLBACK.to_string(),
        });
        let outcome = relay_turn(
            self.messenger.as_ref(),
            &self.limiter,
            placeholder,
            rx,
            Some(escalation_keyboard),
        )
        .await;

        match outcome {
            RelayOutcome::Completed { text, .. } => {
                if let Err(e) = self.appeals.append_ai_reply(user, &text, &self.cancel).await {
                    warn!(user = %mask::user_id(user), error = %e, "failed to log ai reply");
                }
            },
            RelayOutcome::Cancelled => {
                info!(user = %mask::user_id(user), "turn superseded");
            },
            RelayOutcome::Failed => {
                warn!(user = %mask::user_id(user), "assistant turn failed");
            },
        }
        Ok(())
    }

    /// Contact fields for an appeal row, best-effort from the auth sheet.
    async fn contact_of(&self, user: UserId) -> AppealContact {
        match self.auth.lookup(user, &self.cancel).await {
            Ok(Some(identity)) => AppealContact {
                partner_code: identity.partner_code,
                phone: identity.phone,
                name: identity.name,
            },
            Ok(None) => AppealContact::default(),
            Err(e) => {
                warn!(user = %mask::user_id(user), error = %e, "identity lookup failed");
                AppealContact::default()
            },
        }
    }

    async fn send_authorization_prompt(&self, user: UserId) -> Result<MessageRef, RouterError> {
        let form_url = format!("{}?user_id={}", self.web_form_url, user);
        let keyboard = Keyboard::single(KeyboardButton::Url {
            label: "Open authorization form".to_string(),
            url: form_url,
        });
        Ok(self
            .send(
                user,
                OutboundText::plain(UNAUTHORIZED_TEXT).with_keyboard(keyboard),
            )
            .await?)
    }

    async fn send(
        &self,
        user: UserId,
        message: OutboundText,
    ) -> Result<MessageRef, troika_core::MessengerError> {
        self.limiter.acquire(user).await;
        self.messenger.send_text(user, message).await
    }
}

fn is_contact_request(text: &str) -> bool {
    let lower = text.to_lowercase();
    CONTACT_PHRASES.iter().any(|p| lower.contains(p))
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").finish_non_exhaustive()
    }
}
