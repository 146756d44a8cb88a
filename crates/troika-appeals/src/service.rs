//! The appeals service over the appeals sheet.
//!
//! Layout, columns A onward: partner code, phone, name, user id,
//! accumulated messages, status, specialist reply, updated at. The status
//! cell's fill color mirrors the status because the specialists work in
//! the sheet itself.

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use troika_core::{mask, UserId};
use troika_sheets::{CellUpdate, Color, Row, SheetHandle};

use crate::error::{AppealsError, AppealsResult};
use crate::log;

const COL_USER_ID: usize = 3;
const COL_MESSAGES: usize = 4;
const COL_SPECIALIST_REPLY: usize = 6;

const WRITE_COL_MESSAGES: u32 = 5;
const WRITE_COL_STATUS: u32 = 6;
const WRITE_COL_REPLY: u32 = 7;
const WRITE_COL_UPDATED: u32 = 8;

/// Marker prefixed to assistant entries in the message log.
const AI_MARKER: &str = "[AI]";
/// Marker prefixed to delivered specialist replies.
const SPECIALIST_MARKER: &str = "[Specialist]";

/// Appeal lifecycle status, mirrored by cell color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppealStatus {
    /// Untouched by a specialist.
    New,
    /// A specialist (or the user's escalation) took it into work.
    InWork,
    /// A specialist reply was delivered.
    Resolved,
}

impl AppealStatus {
    /// The cell text for this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InWork => "in_work",
            Self::Resolved => "resolved",
        }
    }

    /// The background color contract for the status cell.
    #[must_use]
    pub fn color(self) -> Option<Color> {
        match self {
            Self::New => None,
            Self::InWork => Some(Color::WARM_PINK),
            Self::Resolved => Some(Color::PALE_GREEN),
        }
    }
}

/// Contact fields copied into a fresh appeal row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppealContact {
    /// Partner contract code.
    pub partner_code: String,
    /// Canonical phone.
    pub phone: String,
    /// Contact name.
    pub name: String,
}

/// A pending specialist reply found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialistReply {
    /// 1-based sheet row holding the reply.
    pub row: u32,
    /// The user the reply is addressed to.
    pub user: UserId,
    /// Reply text.
    pub reply: String,
}

/// Appeal row operations.
pub struct AppealsService {
    sheet: SheetHandle,
}

impl AppealsService {
    /// Service over the given appeals-sheet handle.
    #[must_use]
    pub fn new(sheet: SheetHandle) -> Self {
        Self { sheet }
    }

    /// Append a user message to the appeal, creating the row on first
    /// contact. Does not touch the status.
    ///
    /// # Errors
    ///
    /// Propagates sheet failures; transient ones may be retried by the
    /// caller.
    pub async fn append_user_message(
        &self,
        user: UserId,
        contact: &AppealContact,
        text: &str,
        cancel: &CancellationToken,
    ) -> AppealsResult<()> {
        self.append_entry(user, contact, text, cancel).await
    }

    /// Append an assistant reply entry.
    ///
    /// # Errors
    ///
    /// Propagates sheet failures.
    pub async fn append_ai_reply(
        &self,
        user: UserId,
        text: &str,
        cancel: &CancellationToken,
    ) -> AppealsResult<()> {
        self.append_entry(
            user,
            &AppealContact::default(),
            &format!("{AI_MARKER} {text}"),
            cancel,
        )
        .await
    }

    /// Append a delivered-specialist-reply entry.
    ///
    /// Tolerates duplicates: redelivery after a partial monitor tick just
    /// adds a second entry.
    ///
    /// # Errors
    ///
    /// Propagates sheet failures.
    pub async fn append_specialist_entry(
        &self,
        user: UserId,
        text: &str,
        cancel: &CancellationToken,
    ) -> AppealsResult<()> {
        self.append_entry(
            user,
            &AppealContact::default(),
            &format!("{SPECIALIST_MARKER} {text}"),
            cancel,
        )
        .await
    }

    /// Set the status cell and its color.
    ///
    /// # Errors
    ///
    /// [`AppealsError::NoAppeal`] when the user has no row; sheet errors
    /// otherwise.
    pub async fn set_status(
        &self,
        user: UserId,
        status: AppealStatus,
        cancel: &CancellationToken,
    ) -> AppealsResult<()> {
        let rows = self.sheet.list_rows(cancel).await?;
        let row = find_user_row(&rows, user).ok_or(AppealsError::NoAppeal(user))?;

        self.sheet
            .write_cell(row.index, WRITE_COL_STATUS, status.as_str(), cancel)
            .await?;
        self.sheet
            .format_cell(row.index, WRITE_COL_STATUS, status.color(), cancel)
            .await?;

        info!(
            user = %mask::user_id(user),
            status = status.as_str(),
            "appeal status updated"
        );
        Ok(())
    }

    /// Rows whose specialist-reply cell is non-empty.
    ///
    /// Rows without a parseable user id are skipped with a warning; the
    /// reply stays in place for the operator to untangle.
    ///
    /// # Errors
    ///
    /// Propagates sheet failures.
    pub async fn scan_for_specialist_replies(
        &self,
        cancel: &CancellationToken,
    ) -> AppealsResult<Vec<SpecialistReply>> {
        let rows = self.sheet.list_rows(cancel).await?;
        let mut found = Vec::new();
        for row in rows.iter().skip(1) {
            let reply = row.cell(COL_SPECIALIST_REPLY).trim();
            if reply.is_empty() {
                continue;
            }
            match UserId::parse_cell(row.cell(COL_USER_ID)) {
                Some(user) => found.push(SpecialistReply {
                    row: row.index,
                    user,
                    reply: reply.to_string(),
                }),
                None => {
                    warn!(row = row.index, "specialist reply on a row without a user id");
                },
            }
        }
        Ok(found)
    }

    /// Empty the specialist-reply cell of a row.
    ///
    /// # Errors
    ///
    /// Propagates sheet failures.
    pub async fn clear_specialist_reply(
        &self,
        row: u32,
        cancel: &CancellationToken,
    ) -> AppealsResult<()> {
        self.sheet.write_cell(row, WRITE_COL_REPLY, "", cancel).await?;
        Ok(())
    }

    /// Whether any appeal rows exist at all.
    ///
    /// Lets the response monitor skip a tick cheaply on an idle
    /// deployment.
    ///
    /// # Errors
    ///
    /// Propagates sheet failures.
    pub async fn has_any_records(&self, cancel: &CancellationToken) -> AppealsResult<bool> {
        let rows = self.sheet.list_rows(cancel).await?;
        Ok(rows.len() > 1)
    }

    /// The whole find-or-append runs as one unit under the gateway's
    /// write lock, so concurrent appends cannot overwrite each other's
    /// entries.
    async fn append_entry(
        &self,
        user: UserId,
        contact: &AppealContact,
        text: &str,
        cancel: &CancellationToken,
    ) -> AppealsResult<()> {
        let now = Utc::now();
        let new_entry = log::entry(now, text);
        let contact = contact.clone();

        let created = self
            .sheet
            .mutate(cancel, move |api, sheet| {
                let rows = api.list_rows(sheet)?;
                match find_user_row(&rows, user) {
                    Some(row) => {
                        let updated = log::push(row.cell(COL_MESSAGES), &new_entry, now);
                        api.batch_update(
                            sheet,
                            &[
                                CellUpdate {
                                    row: row.index,
                                    col: WRITE_COL_MESSAGES,
                                    value: updated,
                                },
                                CellUpdate {
                                    row: row.index,
                                    col: WRITE_COL_UPDATED,
                                    value: now.to_rfc3339(),
                                },
                            ],
                        )?;
                        Ok(false)
                    },
                    None => {
                        let values = vec![
                            contact.partner_code.clone(),
                            contact.phone.clone(),
                            contact.name.clone(),
                            user.to_string(),
                            new_entry.clone(),
                            AppealStatus::New.as_str().to_string(),
                            String::new(),
                            now.to_rfc3339(),
                        ];
                        api.append_row(sheet, &values)?;
                        Ok(true)
                    },
                }
            })
            .await?;

        if created {
            info!(user = %mask::user_id(user), "appeal row created");
        }
        Ok(())
    }
}

fn find_user_row(rows: &[Row], user: UserId) -> Option<&Row> {
    rows.iter()
        .skip(1)
        .find(|row| UserId::parse_cell(row.cell(COL_USER_ID)) == Some(user))
}

impl std::fmt::Debug for AppealsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppealsService").finish_non_exhaustive()
    }
}
