//! Optional chat-history persistence.
//!
//! Append-only JSON Lines, one file per user. Best-effort: a failed write
//! is logged and forgotten, the conversation in memory is authoritative
//! for the process lifetime.

use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use troika_core::UserId;

use crate::types::{Message, MessageRole};

#[derive(Serialize)]
struct HistoryLine<'a> {
    at: String,
    role: &'a str,
    text: &'a str,
}

/// Append-only JSONL history writer.
#[derive(Debug, Clone)]
pub struct HistoryWriter {
    dir: PathBuf,
}

impl HistoryWriter {
    /// Writer rooted at `dir` (created on first append).
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Append one message, best-effort.
    pub async fn append(&self, user: UserId, message: &Message) {
        let Some(text) = message.text() else {
            return;
        };
        let role = match message.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => return,
        };
        let line = HistoryLine {
            at: Utc::now().to_rfc3339(),
            role,
            text,
        };
        let Ok(mut json) = serde_json::to_string(&line) else {
            return;
        };
        json.push('\n');

        if let Err(e) = self.write(user, json).await {
            warn!(error = %e, "history append failed");
        }
    }

    async fn write(&self, user: UserId, line: String) -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt as _;

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{user}.jsonl"));
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }
}
