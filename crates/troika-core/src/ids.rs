//! Typed identifiers shared across the workspace.

use serde::{Deserialize, Serialize};

/// Messenger-assigned numeric user id.
///
/// This is the key for sessions, auth cache entries and appeal rows. The
/// raw value is considered PII in log output; use [`crate::mask::user_id`]
/// when logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// Parse from the string form stored in sheet cells.
    ///
    /// Returns `None` for empty cells or non-numeric content.
    #[must_use]
    pub fn parse_cell(cell: &str) -> Option<Self> {
        cell.trim().parse::<i64>().ok().map(Self)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

/// Stable content-derived promotion identifier.
///
/// Derived by the broadcaster from the promotion's content fields, so the
/// same promotion keeps the same id across scans and process restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromotionId(pub String);

impl PromotionId {
    /// View as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PromotionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
