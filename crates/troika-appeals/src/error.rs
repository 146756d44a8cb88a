//! Appeals error types.

use thiserror::Error;
use troika_core::UserId;
use troika_sheets::SheetError;

/// Errors from appeal operations.
#[derive(Debug, Error)]
pub enum AppealsError {
    /// No appeal row exists for the user.
    #[error("no appeal row for user {0}")]
    NoAppeal(UserId),

    /// The sheet backend failed.
    #[error(transparent)]
    Sheet(#[from] SheetError),
}

impl AppealsError {
    /// Whether retrying later may help.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Sheet(e) if e.is_transient())
    }
}

/// Result alias for appeal operations.
pub type AppealsResult<T> = Result<T, AppealsError>;
