//! Monitor error types.

use thiserror::Error;

/// Errors from monitor loops.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Appeals operations failed.
    #[error(transparent)]
    Appeals(#[from] troika_appeals::AppealsError),

    /// Messenger operations failed.
    #[error(transparent)]
    Messenger(#[from] troika_core::MessengerError),

    /// Sheet operations failed.
    #[error(transparent)]
    Sheet(#[from] troika_sheets::SheetError),
}

/// Result alias for monitor operations.
pub type MonitorResult<T> = Result<T, MonitorError>;
