//! The accumulated message log.
//!
//! One cell holds the whole conversation: newline-separated entries,
//! newest first, each prefixed `YYYY-MM-DD HH:MM:SS: `. Every write prunes
//! entries older than the retention window; entries whose timestamp does
//! not parse are preserved.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

/// Retention window for log entries, in days.
pub const RETENTION_DAYS: i64 = 30;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TIMESTAMP_LEN: usize = 19;

/// Format one log entry.
#[must_use]
pub fn entry(now: DateTime<Utc>, text: &str) -> String {
    format!("{}: {}", now.format(TIMESTAMP_FORMAT), text)
}

/// Prepend `new_entry` to `log` and drop entries older than
/// [`RETENTION_DAYS`].
///
/// An entry aged exactly the retention window is dropped.
#[must_use]
pub fn push(log: &str, new_entry: &str, now: DateTime<Utc>) -> String {
    let combined = if log.trim().is_empty() {
        new_entry.to_string()
    } else {
        format!("{new_entry}\n{log}")
    };
    prune(&combined, now)
}

/// Drop entries older than the retention window.
#[must_use]
pub fn prune(log: &str, now: DateTime<Utc>) -> String {
    let cutoff = now - Duration::days(RETENTION_DAYS);
    log.lines()
        .filter(|line| match parse_timestamp(line) {
            Some(ts) => ts > cutoff,
            None => !line.trim().is_empty(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_timestamp(line: &str) -> Option<DateTime<Utc>> {
    let prefix = line.get(..TIMESTAMP_LEN)?;
    NaiveDateTime::parse_from_str(prefix, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
