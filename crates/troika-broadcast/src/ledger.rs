//! The SENT ledger.
//!
//! Append-only file, one record per line: promotion id, user id and an
//! ISO timestamp, tab-separated. Read once in full on startup; every
//! append is fsynced before the in-memory set is updated, so a crash can
//! lose a send at worst, never duplicate one.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::io::AsyncWriteExt as _;
use tokio::sync::Mutex;
use tracing::{info, warn};

use troika_core::{PromotionId, UserId};

struct LedgerInner {
    delivered: HashSet<(PromotionId, UserId)>,
}

/// Disk-backed record of completed deliveries.
pub struct SentLedger {
    path: PathBuf,
    inner: Mutex<LedgerInner>,
}

impl SentLedger {
    /// Open (or create) the ledger at `path` and load every record.
    ///
    /// Malformed lines are skipped with a warning; they only risk a
    /// re-delivery, never a lost one.
    ///
    /// # Errors
    ///
    /// I/O errors other than the file not existing yet.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let mut delivered = HashSet::new();
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                for line in contents.lines() {
                    match parse_line(line) {
                        Some(pair) => {
                            delivered.insert(pair);
                        },
                        None if line.trim().is_empty() => {},
                        None => warn!(line, "skipping malformed ledger line"),
                    }
                }
                info!(entries = delivered.len(), "sent ledger loaded");
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => return Err(e),
        }

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(LedgerInner { delivered }),
        })
    }

    /// Whether a delivery is already recorded.
    pub async fn contains(&self, promotion: &PromotionId, user: UserId) -> bool {
        self.inner
            .lock()
            .await
            .delivered
            .contains(&(promotion.clone(), user))
    }

    /// Record a completed delivery: append, fsync, then remember.
    ///
    /// Recording the same pair twice is a no-op.
    ///
    /// # Errors
    ///
    /// Ledger I/O failures; the caller must treat the delivery as
    /// unrecorded and allow a retry.
    pub async fn record(&self, promotion: &PromotionId, user: UserId) -> std::io::Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.delivered.contains(&(promotion.clone(), user)) {
            return Ok(());
        }

        let line = format!("{}\t{}\t{}\n", promotion, user, Utc::now().to_rfc3339());
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_all().await?;

        inner.delivered.insert((promotion.clone(), user));
        Ok(())
    }

    /// Number of recorded deliveries.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.delivered.len()
    }

    /// Whether the ledger is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn parse_line(line: &str) -> Option<(PromotionId, UserId)> {
    let mut fields = line.split('\t');
    let promotion = fields.next()?.trim();
    let user = fields.next()?.trim().parse::<i64>().ok()?;
    if promotion.is_empty() {
        return None;
    }
    Some((PromotionId(promotion.to_string()), UserId(user)))
}

impl std::fmt::Debug for SentLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentLedger")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn promo(id: &str) -> PromotionId {
        PromotionId(id.to_string())
    }

    #[tokio::test]
    async fn record_then_contains() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = SentLedger::open(&dir.path().join("sent.tsv")).unwrap();

        assert!(!ledger.contains(&promo("p1"), UserId(1)).await);
        ledger.record(&promo("p1"), UserId(1)).await.unwrap();
        assert!(ledger.contains(&promo("p1"), UserId(1)).await);
        assert!(!ledger.contains(&promo("p1"), UserId(2)).await);
    }

    #[tokio::test]
    async fn duplicate_record_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sent.tsv");
        let ledger = SentLedger::open(&path).unwrap();

        ledger.record(&promo("p1"), UserId(1)).await.unwrap();
        ledger.record(&promo("p1"), UserId(1)).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sent.tsv");

        {
            let ledger = SentLedger::open(&path).unwrap();
            ledger.record(&promo("p1"), UserId(1)).await.unwrap();
            ledger.record(&promo("p1"), UserId(2)).await.unwrap();
        }

        let reopened = SentLedger::open(&path).unwrap();
        assert!(reopened.contains(&promo("p1"), UserId(1)).await);
        assert!(reopened.contains(&promo("p1"), UserId(2)).await);
        assert!(!reopened.contains(&promo("p1"), UserId(3)).await);
        assert_eq!(reopened.len().await, 2);
    }

    #[tokio::test]
    async fn malformed_lines_skipped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sent.tsv");
        std::fs::write(&path, "p1\t1\t2026-01-01T00:00:00Z\nbroken line\n\np2\tnotanum\tx\n")
            .unwrap();

        let ledger = SentLedger::open(&path).unwrap();
        assert_eq!(ledger.len().await, 1);
        assert!(ledger.contains(&promo("p1"), UserId(1)).await);
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = SentLedger::open(&dir.path().join("fresh.tsv")).unwrap();
        assert!(ledger.is_empty().await);
    }
}
