//! In-memory media cache.
//!
//! One long-lived HTTP client serves every delivery; fetched bytes are
//! cached so a promotion sent to hundreds of partners downloads its image
//! once. Bounded by entry count with least-recently-used eviction, plus a
//! TTL so an updated asset under the same URL eventually wins.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{BroadcastError, BroadcastResult};

/// Cache bounds.
#[derive(Debug, Clone)]
pub struct MediaCacheConfig {
    /// Maximum cached URLs.
    pub max_entries: usize,
    /// Entry lifetime.
    pub ttl: Duration,
    /// Per-fetch timeout.
    pub fetch_timeout: Duration,
}

impl Default for MediaCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 32,
            ttl: Duration::from_secs(3600),
            fetch_timeout: Duration::from_secs(15),
        }
    }
}

struct Entry {
    bytes: Arc<Vec<u8>>,
    fetched_at: Instant,
    last_used: Instant,
}

/// URL-keyed byte cache over a shared HTTP client.
pub struct MediaCache {
    client: reqwest::Client,
    config: MediaCacheConfig,
    entries: Mutex<HashMap<String, Entry>>,
}

impl MediaCache {
    /// Cache with its own long-lived client.
    #[must_use]
    pub fn new(config: MediaCacheConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Bytes for `url`, from cache or the network.
    ///
    /// # Errors
    ///
    /// [`BroadcastError::Media`] on fetch failure, timeout or
    /// cancellation.
    pub async fn fetch(&self, url: &str, cancel: &CancellationToken) -> BroadcastResult<Arc<Vec<u8>>> {
        if let Some(bytes) = self.lookup(url).await {
            return Ok(bytes);
        }

        if cancel.is_cancelled() {
            return Err(BroadcastError::Media("cancelled".to_string()));
        }

        debug!(url, "fetching media");
        let bytes = tokio::select! {
            () = cancel.cancelled() => {
                return Err(BroadcastError::Media("cancelled".to_string()));
            },
            fetched = self.download(url) => fetched?,
        };

        let bytes = Arc::new(bytes);
        self.store(url, Arc::clone(&bytes)).await;
        Ok(bytes)
    }

    async fn download(&self, url: &str) -> BroadcastResult<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .timeout(self.config.fetch_timeout)
            .send()
            .await
            .map_err(|e| BroadcastError::Media(e.to_string()))?;
        if !response.status().is_success() {
            return Err(BroadcastError::Media(format!("HTTP {}", response.status())));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| BroadcastError::Media(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    /// Fresh cached bytes, bumping recency.
    async fn lookup(&self, url: &str) -> Option<Arc<Vec<u8>>> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(url)?;
        if entry.fetched_at.elapsed() >= self.config.ttl {
            entries.remove(url);
            return None;
        }
        entry.last_used = Instant::now();
        Some(Arc::clone(&entry.bytes))
    }

    /// Insert, evicting the least-recently-used entry when over the cap.
    async fn store(&self, url: &str, bytes: Arc<Vec<u8>>) {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.insert(
            url.to_string(),
            Entry {
                bytes,
                fetched_at: now,
                last_used: now,
            },
        );

        while entries.len() > self.config.max_entries.max(1) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(url, _)| url.clone());
            match oldest {
                Some(url) => {
                    debug!(url, "evicting media cache entry");
                    entries.remove(&url);
                },
                None => break,
            }
        }
    }

    /// Number of cached URLs.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl std::fmt::Debug for MediaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaCache")
            .field("max_entries", &self.config.max_entries)
            .finish_non_exhaustive()
    }
}
