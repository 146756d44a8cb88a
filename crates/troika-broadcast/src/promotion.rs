//! Promotion records and their stable ids.
//!
//! The sheet has no id column, so the id is derived from the content
//! fields that define a promotion. Editing dates or copy creates a new
//! promotion as far as the ledger is concerned, which errs on the side of
//! re-announcing substantive changes.

use sha2::{Digest, Sha256};
use std::fmt::Write as _;

use troika_core::PromotionId;
use troika_sheets::Row;

const COL_TITLE: usize = 1;
const COL_DESCRIPTION: usize = 2;
const COL_STATUS: usize = 3;
const COL_START: usize = 4;
const COL_END: usize = 5;
const COL_CONTENT_URL: usize = 6;
const COL_LINK: usize = 7;

/// Lifecycle status as written in the sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionStatus {
    /// Not yet announced.
    Pending,
    /// Should be broadcast.
    Active,
    /// Over; never announced again.
    Finished,
}

impl PromotionStatus {
    fn parse(cell: &str) -> Option<Self> {
        match cell.trim() {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "finished" => Some(Self::Finished),
            _ => None,
        }
    }
}

/// One promotions-sheet row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    /// Content-derived stable id.
    pub id: PromotionId,
    /// Title.
    pub title: String,
    /// Description copy.
    pub description: String,
    /// Lifecycle status.
    pub status: PromotionStatus,
    /// Start date as written.
    pub start_date: String,
    /// End date as written.
    pub end_date: String,
    /// Optional media URL.
    pub content_url: Option<String>,
    /// Optional deep link.
    pub link: Option<String>,
}

impl Promotion {
    /// Parse a sheet row; `None` for rows without a title or with an
    /// unknown status.
    #[must_use]
    pub fn from_row(row: &Row) -> Option<Self> {
        let title = row.cell(COL_TITLE).trim();
        if title.is_empty() {
            return None;
        }
        let status = PromotionStatus::parse(row.cell(COL_STATUS))?;
        let description = row.cell(COL_DESCRIPTION).trim().to_string();
        let start_date = row.cell(COL_START).trim().to_string();
        let end_date = row.cell(COL_END).trim().to_string();

        let id = promotion_id(title, &description, &start_date, &end_date);
        Some(Self {
            id,
            title: title.to_string(),
            description,
            status,
            start_date,
            end_date,
            content_url: non_empty(row.cell(COL_CONTENT_URL)),
            link: non_empty(row.cell(COL_LINK)),
        })
    }

    /// The outbound message body.
    #[must_use]
    pub fn message_text(&self) -> String {
        let mut text = self.title.clone();
        if !self.description.is_empty() {
            text.push_str("\n\n");
            text.push_str(&self.description);
        }
        if !self.start_date.is_empty() || !self.end_date.is_empty() {
            text.push_str(&format!("\n\n{} - {}", self.start_date, self.end_date));
        }
        text
    }
}

fn non_empty(cell: &str) -> Option<String> {
    let trimmed = cell.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Stable content hash over the fields that define a promotion.
#[must_use]
pub fn promotion_id(title: &str, description: &str, start: &str, end: &str) -> PromotionId {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"\n");
    hasher.update(description.as_bytes());
    hasher.update(b"\n");
    hasher.update(start.as_bytes());
    hasher.update(b"\n");
    hasher.update(end.as_bytes());
    let digest = hasher.finalize();

    let mut id = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        let _ = write!(id, "{byte:02x}");
    }
    PromotionId(id)
}
