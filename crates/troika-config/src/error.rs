//! Configuration error types.

use thiserror::Error;

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// One or more variables are missing or malformed. Fatal at startup.
    #[error("invalid configuration:\n{}", .problems.join("\n"))]
    Invalid {
        /// Every problem found, one line each.
        problems: Vec<String>,
    },
}

/// Result alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;
