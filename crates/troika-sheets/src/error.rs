//! Gateway-level error taxonomy.

use thiserror::Error;

use crate::api::ApiError;

/// What the rest of the process sees from a sheet operation.
#[derive(Debug, Clone, Error)]
pub enum SheetError {
    /// Worth retrying later; the gateway's own retry budget is spent.
    #[error("sheet backend temporarily unavailable: {0}")]
    Transient(String),

    /// Will not succeed without operator intervention.
    #[error("sheet operation failed permanently: {0}")]
    Permanent(String),

    /// The addressed row or worksheet does not exist.
    #[error("sheet target not found: {0}")]
    NotFound(String),

    /// The endpoint's circuit breaker is open; nothing was attempted.
    #[error("breaker open for {endpoint}")]
    BreakerOpen {
        /// The guarded endpoint.
        endpoint: String,
    },

    /// The operation was cancelled before completion.
    #[error("sheet operation cancelled")]
    Cancelled,
}

impl SheetError {
    /// Whether a caller-side retry (next tick, next turn) may help.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::BreakerOpen { .. })
    }
}

impl From<ApiError> for SheetError {
    fn from(e: ApiError) -> Self {
        match &e {
            ApiError::RateLimited | ApiError::Server(_) | ApiError::Network(_) => {
                Self::Transient(e.to_string())
            },
            ApiError::NotFound(what) => Self::NotFound(what.clone()),
            ApiError::Auth(_) | ApiError::Invalid(_) => Self::Permanent(e.to_string()),
        }
    }
}

/// Result alias for gateway operations.
pub type SheetResult<T> = Result<T, SheetError>;
