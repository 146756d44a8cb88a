//! The blocking vendor-client capability.
//!
//! The real implementation wraps the spreadsheet vendor's RPC client and
//! lives outside this workspace; [`crate::memory::InMemorySheets`] ships
//! for tests. Every method may block and must only be called from the
//! gateway's worker pool.

use thiserror::Error;

use crate::color::Color;

/// Errors reported by the vendor client, classified at the leaf.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Vendor asked us to slow down.
    #[error("rate limited")]
    RateLimited,

    /// Vendor-side 5xx.
    #[error("server error: {0}")]
    Server(String),

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Credentials rejected; the cached client must be rebuilt.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Worksheet or cell does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed request; a bug on our side.
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl ApiError {
    /// Whether a retry may help.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Server(_) | Self::Network(_))
    }

    /// Whether the cached client handle should be discarded.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

/// One sheet row with its 1-based position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// 1-based row index; row 1 is the header.
    pub index: u32,
    /// Cell values, column A first. Trailing empty cells may be omitted.
    pub cells: Vec<String>,
}

impl Row {
    /// Cell at a 0-based column, empty string when absent.
    #[must_use]
    pub fn cell(&self, col: usize) -> &str {
        self.cells.get(col).map_or("", String::as_str)
    }
}

/// A single cell write inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellUpdate {
    /// 1-based row.
    pub row: u32,
    /// 1-based column (A = 1).
    pub col: u32,
    /// New cell contents.
    pub value: String,
}

/// Blocking row/cell operations on one spreadsheet document.
///
/// `sheet` arguments name the worksheet (tab) inside the document.
pub trait SheetsApi: Send + Sync {
    /// All rows of a worksheet, header included.
    fn list_rows(&self, sheet: &str) -> Result<Vec<Row>, ApiError>;

    /// Read a single cell (1-based coordinates).
    fn read_cell(&self, sheet: &str, row: u32, col: u32) -> Result<String, ApiError>;

    /// Write a single cell (1-based coordinates).
    fn write_cell(&self, sheet: &str, row: u32, col: u32, value: &str) -> Result<(), ApiError>;

    /// Apply several cell writes in one RPC.
    fn batch_update(&self, sheet: &str, updates: &[CellUpdate]) -> Result<(), ApiError>;

    /// Append a row after the last non-empty one; returns its 1-based
    /// index.
    fn append_row(&self, sheet: &str, values: &[String]) -> Result<u32, ApiError>;

    /// Set or clear a cell's background color.
    fn format_cell(
        &self,
        sheet: &str,
        row: u32,
        col: u32,
        color: Option<Color>,
    ) -> Result<(), ApiError>;
}
