//! Auth error types.

use thiserror::Error;
use troika_sheets::SheetError;

/// Errors from identity operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No row matches the submitted partner code and phone.
    #[error("no partner row matches the submitted code and phone")]
    NotFound,

    /// The submitted phone cannot be normalized.
    #[error("invalid phone number: {0}")]
    InvalidPhone(String),

    /// The sheet backend failed.
    #[error(transparent)]
    Sheet(#[from] SheetError),
}

impl AuthError {
    /// Whether retrying later may help.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Sheet(e) if e.is_transient())
    }
}

/// Result alias for auth operations.
pub type AuthResult<T> = Result<T, AuthError>;
