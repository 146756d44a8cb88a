//! Broadcast error types.

use thiserror::Error;
use troika_sheets::SheetError;

/// Errors from the broadcaster.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// The promotions sheet failed.
    #[error(transparent)]
    Sheet(#[from] SheetError),

    /// The auth sheet failed while resolving the audience.
    #[error("audience lookup failed: {0}")]
    Audience(#[from] troika_auth::AuthError),

    /// SENT ledger I/O failed.
    #[error("sent ledger error: {0}")]
    Ledger(#[from] std::io::Error),

    /// A media fetch failed.
    #[error("media fetch failed: {0}")]
    Media(String),

    /// The messenger rejected a delivery.
    #[error("delivery failed: {0}")]
    Send(#[from] troika_core::MessengerError),
}

/// Result alias for broadcast operations.
pub type BroadcastResult<T> = Result<T, BroadcastError>;
