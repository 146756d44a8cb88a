//! Time-bounded authorization cache.
//!
//! Lookups hit the cache first; entries older than the TTL force a sheet
//! reload. The cache is persisted to disk best-effort: a lost or corrupt
//! file only costs a re-fetch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use troika_core::UserId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct CacheEntry {
    authorized: bool,
    timestamp: DateTime<Utc>,
}

/// Authorization cache keyed by user id.
#[derive(Debug)]
pub struct AuthCache {
    entries: RwLock<HashMap<UserId, CacheEntry>>,
    path: Option<PathBuf>,
    ttl: Duration,
}

impl AuthCache {
    /// TTL applied to every entry.
    pub const DEFAULT_TTL_HOURS: i64 = 24;

    /// In-memory cache without persistence.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            path: None,
            ttl: Duration::hours(Self::DEFAULT_TTL_HOURS),
        }
    }

    /// Cache persisted at `path`, loading any existing contents.
    ///
    /// A missing or unreadable file starts the cache empty; that is not an
    /// error.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<HashMap<UserId, CacheEntry>>(&contents) {
                Ok(map) => {
                    debug!(count = map.len(), "auth cache loaded");
                    map
                },
                Err(e) => {
                    warn!(error = %e, "auth cache file corrupt, starting empty");
                    HashMap::new()
                },
            },
            Err(_) => HashMap::new(),
        };
        Self {
            entries: RwLock::new(entries),
            path: Some(path.to_path_buf()),
            ttl: Duration::hours(Self::DEFAULT_TTL_HOURS),
        }
    }

    /// Override the TTL (tests).
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Fresh cached value, or `None` when absent or expired.
    pub async fn get_fresh(&self, user: UserId) -> Option<bool> {
        let entries = self.entries.read().await;
        let entry = entries.get(&user)?;
        let age = Utc::now().signed_duration_since(entry.timestamp);
        (age < self.ttl).then_some(entry.authorized)
    }

    /// Insert or overwrite an entry and persist best-effort.
    pub async fn put(&self, user: UserId, authorized: bool) {
        {
            let mut entries = self.entries.write().await;
            entries.insert(
                user,
                CacheEntry {
                    authorized,
                    timestamp: Utc::now(),
                },
            );
        }
        self.persist().await;
    }

    /// Backdate an entry (tests exercising expiry).
    #[doc(hidden)]
    pub async fn put_with_timestamp(&self, user: UserId, authorized: bool, timestamp: DateTime<Utc>) {
        let mut entries = self.entries.write().await;
        entries.insert(
            user,
            CacheEntry {
                authorized,
                timestamp,
            },
        );
    }

    /// Write the cache to disk. Failures are logged, never surfaced.
    async fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let snapshot = self.entries.read().await.clone();
        let json = match serde_json::to_string(&snapshot) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "auth cache serialization failed");
                return;
            },
        };
        if let Err(e) = tokio::fs::write(path, json).await {
            warn!(error = %e, path = %path.display(), "auth cache persist failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn miss_on_empty() {
        let cache = AuthCache::in_memory();
        assert_eq!(cache.get_fresh(UserId(1)).await, None);
    }

    #[tokio::test]
    async fn put_then_fresh_hit() {
        let cache = AuthCache::in_memory();
        cache.put(UserId(1), true).await;
        assert_eq!(cache.get_fresh(UserId(1)).await, Some(true));

        cache.put(UserId(2), false).await;
        assert_eq!(cache.get_fresh(UserId(2)).await, Some(false));
    }

    #[tokio::test]
    async fn expired_entry_misses() {
        let cache = AuthCache::in_memory();
        cache
            .put_with_timestamp(UserId(1), true, Utc::now() - Duration::hours(25))
            .await;
        assert_eq!(cache.get_fresh(UserId(1)).await, None);
    }

    #[tokio::test]
    async fn entry_just_inside_ttl_hits() {
        let cache = AuthCache::in_memory();
        cache
            .put_with_timestamp(UserId(1), true, Utc::now() - Duration::hours(23))
            .await;
        assert_eq!(cache.get_fresh(UserId(1)).await, Some(true));
    }

    #[tokio::test]
    async fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth_cache.json");

        let cache = AuthCache::load(&path);
        cache.put(UserId(42), true).await;

        let reloaded = AuthCache::load(&path);
        assert_eq!(reloaded.get_fresh(UserId(42)).await, Some(true));
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth_cache.json");
        std::fs::write(&path, "{not json").unwrap();

        let cache = AuthCache::load(&path);
        assert_eq!(cache.get_fresh(UserId(1)).await, None);
    }

    #[tokio::test]
    async fn persist_failure_does_not_break_lookup() {
        // Point persistence at a directory, which cannot be written as a
        // file.
        let dir = tempfile::tempdir().unwrap();
        let cache = AuthCache::load(&dir.path().join("sub/missing/cache.json"));
        cache.put(UserId(7), true).await;
        assert_eq!(cache.get_fresh(UserId(7)).await, Some(true));
    }
}
