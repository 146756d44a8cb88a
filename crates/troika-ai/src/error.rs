//! AI error types.

use thiserror::Error;

/// Errors from vendor calls and turn execution.
#[derive(Debug, Error)]
pub enum AiError {
    /// Vendor refused the request outright.
    #[error("assistant request failed: {0}")]
    RequestFailed(String),

    /// Vendor asked us to slow down.
    #[error("assistant rate limited")]
    RateLimited,

    /// Response body did not parse.
    #[error("invalid assistant response: {0}")]
    InvalidResponse(String),

    /// The SSE stream broke mid-run.
    #[error("assistant stream error: {0}")]
    Streaming(String),

    /// No stream activity within the inactivity window.
    #[error("assistant stream stalled")]
    Stalled,

    /// A dispatched tool exceeded its time budget.
    #[error("tool {name} timed out")]
    ToolTimeout {
        /// Tool name.
        name: String,
    },

    /// HTTP-level failure.
    #[error("assistant http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AiError {
    /// Whether one in-turn retry with a fresh run is worth it.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited | Self::Streaming(_) | Self::Stalled => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::RequestFailed(_) | Self::InvalidResponse(_) | Self::ToolTimeout { .. } => false,
        }
    }
}

/// Result alias for AI operations.
pub type AiResult<T> = Result<T, AiError>;
