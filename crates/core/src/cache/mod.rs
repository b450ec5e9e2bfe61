//! Hash-keyed deduplication cache for optimized images.
//!
//! This module provides:
//!
//! - Content-identity keys derived from normalized image URLs
//! - An optional shared backend with transparent fallback to a local map
//! - Cursor-based scans for sizing and clearing the shared backend
//! - A timer-driven sweeper that evicts expired local entries
//!
//! Every write lands in the local map regardless of backend health, so an
//! unreachable backend degrades sharing and durability, never correctness.

pub mod backend;
pub mod entry;
pub mod hash;
pub mod stats;
pub mod sweeper;

pub use crate::Error;

pub use backend::{ScanPage, SharedBackend, SqliteBackend};
pub use entry::{CacheEntry, EntryMetadata};
pub use hash::derive_cache_key;
pub use stats::{CacheCounters, CacheStats};
pub use sweeper::{SweepReport, SweeperHandle};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Server-side entry lifetime (7 days).
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Keys fetched per cursor step when scanning the shared backend.
const SCAN_BATCH: usize = 100;

/// Deduplication cache over an optional shared backend and a local map.
pub struct DedupCache {
    backend: Option<Arc<dyn SharedBackend>>,
    local: RwLock<HashMap<String, CacheEntry>>,
    counters: Mutex<CacheCounters>,
    ttl: Duration,
    started_at: DateTime<Utc>,
}

impl std::fmt::Debug for DedupCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupCache")
            .field("backend", &self.backend_name())
            .field("ttl", &self.ttl)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl DedupCache {
    pub fn new(backend: Option<Arc<dyn SharedBackend>>, ttl: Duration) -> Self {
        Self {
            backend,
            local: RwLock::new(HashMap::new()),
            counters: Mutex::new(CacheCounters::default()),
            ttl,
            started_at: Utc::now(),
        }
    }

    /// A cache with no shared backend.
    pub fn local_only(ttl: Duration) -> Self {
        Self::new(None, ttl)
    }

    /// Build a cache from an optional connection string.
    ///
    /// Never fails: a missing string or a backend that cannot be opened
    /// yields a local-only cache.
    pub async fn connect(conn_str: Option<&str>, ttl: Duration) -> Self {
        let Some(conn_str) = conn_str else {
            tracing::info!("no shared cache configured, using local map only");
            return Self::local_only(ttl);
        };

        match SqliteBackend::connect(conn_str).await {
            Ok(backend) => {
                tracing::info!(backend = backend.name(), "shared cache connected");
                Self::new(Some(Arc::new(backend)), ttl)
            }
            Err(e) => {
                tracing::warn!(error = %e, "shared cache unavailable, falling back to local map");
                Self::local_only(ttl)
            }
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.backend.as_ref().map(|b| b.name())
    }

    /// Turn a backend result into an option, logging the degradation.
    fn degrade<T>(&self, op: &'static str, result: Result<T, Error>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(op, backend = self.backend_name(), error = %e, "shared cache degraded to local map");
                None
            }
        }
    }

    /// Look up the entry for `url`.
    ///
    /// Returns `None` on a miss or once the entry has expired.
    pub async fn get(&self, url: &str) -> Option<CacheEntry> {
        let hash = derive_cache_key(url);
        let now = Utc::now().timestamp_millis();

        let mut found = None;
        if let Some(backend) = &self.backend
            && let Some(Some(entry)) = self.degrade("get", backend.get(&hash).await)
            && !entry.is_expired_at(now, self.ttl)
        {
            self.local.write().await.insert(hash.clone(), entry.clone());
            found = Some(entry);
        }

        if found.is_none() {
            let local = self.local.read().await;
            found = local
                .get(&hash)
                .filter(|entry| !entry.is_expired_at(now, self.ttl))
                .cloned();
        }

        let mut counters = self.counters.lock().await;
        match &found {
            Some(entry) => {
                let deduplicated = entry.original_url != url;
                if deduplicated {
                    tracing::debug!(hash = %hash, url, original = %entry.original_url, "dedup hit");
                }
                counters.record_hit(deduplicated);
            }
            None => counters.record_miss(),
        }

        found
    }

    /// Record the optimized rendition of `url`.
    pub async fn set(&self, url: &str, optimized_url: &str, metadata: EntryMetadata) -> CacheEntry {
        let entry = CacheEntry {
            original_url: url.to_string(),
            optimized_url: optimized_url.to_string(),
            hash: derive_cache_key(url),
            created_at: Utc::now().timestamp_millis(),
            format: metadata.format,
            original_size_bytes: metadata.original_size_bytes,
            optimized_size_bytes: metadata.optimized_size_bytes,
        };

        if let Some(backend) = &self.backend {
            self.degrade("set", backend.set(&entry, self.ttl).await);
        }
        self.local.write().await.insert(entry.hash.clone(), entry.clone());

        self.counters
            .lock()
            .await
            .record_write(entry.is_conversion(), entry.saved_bytes());

        entry
    }

    /// Number of live entries.
    ///
    /// Counts unexpired shared keys with a cursor scan when available, the
    /// local map otherwise.
    pub async fn size(&self) -> u64 {
        if let Some(backend) = &self.backend {
            let mut cursor = None;
            let mut total = 0u64;
            loop {
                match self.degrade("scan_live", backend.scan_live(cursor, SCAN_BATCH).await) {
                    Some(page) => {
                        total += page.keys.len() as u64;
                        match page.next {
                            Some(next) => cursor = Some(next),
                            None => return total,
                        }
                    }
                    None => break,
                }
            }
        }

        let now = Utc::now().timestamp_millis();
        let local = self.local.read().await;
        local.values().filter(|e| !e.is_expired_at(now, self.ttl)).count() as u64
    }

    pub async fn stats(&self) -> CacheStats {
        let size = self.size().await;
        let counters = self.counters.lock().await.clone();
        CacheStats::build(&counters, size, self.started_at, Utc::now())
    }

    /// Erase every entry from the shared backend and the local map.
    ///
    /// Returns the number of shared entries removed.
    pub async fn clear(&self) -> u64 {
        let mut removed = 0u64;
        if let Some(backend) = &self.backend {
            let mut cursor = None;
            loop {
                let Some(page) = self.degrade("scan", backend.scan(cursor, SCAN_BATCH).await) else {
                    break;
                };
                let next = page.next.clone();
                match self.degrade("delete", backend.delete(page.keys).await) {
                    Some(n) => removed += n,
                    None => break,
                }
                match next {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
        }

        let mut local = self.local.write().await;
        let local_count = local.len();
        local.clear();
        tracing::info!(shared = removed, local = local_count, "dedup cache cleared");

        removed
    }

    /// Evict expired entries from the local map.
    pub async fn sweep_local(&self) -> usize {
        let now = Utc::now().timestamp_millis();
        let mut local = self.local.write().await;
        let before = local.len();
        local.retain(|_, entry| !entry.is_expired_at(now, self.ttl));
        before - local.len()
    }

    /// Evict expired entries locally and, best effort, from the backend.
    pub async fn sweep(&self) -> SweepReport {
        let local = self.sweep_local().await;
        let shared = match &self.backend {
            Some(backend) => self.degrade("purge_expired", backend.purge_expired().await).unwrap_or(0),
            None => 0,
        };
        SweepReport { local, shared }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Backend that fails every call, as an unreachable server would.
    struct DownBackend;

    #[async_trait]
    impl SharedBackend for DownBackend {
        fn name(&self) -> &'static str {
            "down"
        }

        async fn get(&self, _hash: &str) -> Result<Option<CacheEntry>, Error> {
            Err(Error::BackendUnavailable("connection refused".into()))
        }

        async fn set(&self, _entry: &CacheEntry, _ttl: Duration) -> Result<(), Error> {
            Err(Error::BackendUnavailable("connection refused".into()))
        }

        async fn scan(&self, _cursor: Option<String>, _count: usize) -> Result<ScanPage, Error> {
            Err(Error::BackendUnavailable("connection refused".into()))
        }

        async fn scan_live(&self, _cursor: Option<String>, _count: usize) -> Result<ScanPage, Error> {
            Err(Error::BackendUnavailable("connection refused".into()))
        }

        async fn delete(&self, _hashes: Vec<String>) -> Result<u64, Error> {
            Err(Error::BackendUnavailable("connection refused".into()))
        }

        async fn purge_expired(&self) -> Result<u64, Error> {
            Err(Error::BackendUnavailable("connection refused".into()))
        }
    }

    fn meta() -> EntryMetadata {
        EntryMetadata { format: "webp".into(), original_size_bytes: 1000, optimized_size_bytes: 250 }
    }

    async fn shared() -> DedupCache {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        DedupCache::new(Some(Arc::new(backend)), DEFAULT_TTL)
    }

    #[tokio::test]
    async fn test_set_then_get_returns_entry() {
        let cache = shared().await;
        let set = cache
            .set("https://cdn.example.com/1.jpg", "https://img.example.net/1.webp", meta())
            .await;

        let got = cache.get("https://cdn.example.com/1.jpg").await.unwrap();
        assert_eq!(got, set);
    }

    #[tokio::test]
    async fn test_query_variants_share_entry() {
        let cache = DedupCache::local_only(DEFAULT_TTL);
        cache
            .set("https://cdn.example.com/1.jpg?sig=a", "https://img.example.net/1.webp", meta())
            .await;

        let got = cache.get("https://cdn.example.com/1.jpg?sig=b#x").await;
        assert!(got.is_some());

        let stats = cache.stats().await;
        assert_eq!(stats.dedup.deduplicated_urls, 1);
        assert_eq!(stats.cache.hits, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = DedupCache::local_only(Duration::from_millis(10));
        cache.set("https://cdn.example.com/1.jpg", "https://img.example.net/1.webp", meta()).await;
        assert!(cache.get("https://cdn.example.com/1.jpg").await.is_some());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("https://cdn.example.com/1.jpg").await.is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.cache.hits, 1);
        assert_eq!(stats.cache.misses, 1);
    }

    #[tokio::test]
    async fn test_backend_down_degrades_to_local() {
        let cache = DedupCache::new(Some(Arc::new(DownBackend)), DEFAULT_TTL);
        let set = cache
            .set("https://cdn.example.com/1.jpg", "https://img.example.net/1.webp", meta())
            .await;

        assert_eq!(cache.get("https://cdn.example.com/1.jpg").await, Some(set));
        assert!(cache.get("https://cdn.example.com/2.jpg").await.is_none());
        assert_eq!(cache.size().await, 1);
        assert_eq!(cache.clear().await, 0);
        assert!(cache.get("https://cdn.example.com/1.jpg").await.is_none());
        assert_eq!(cache.sweep().await, SweepReport { local: 0, shared: 0 });
    }

    #[tokio::test]
    async fn test_connect_with_bad_string_falls_back() {
        let cache = DedupCache::connect(Some("redis://127.0.0.1:6379"), DEFAULT_TTL).await;
        assert!(cache.backend_name().is_none());

        let cache = DedupCache::connect(None, DEFAULT_TTL).await;
        assert!(cache.backend_name().is_none());
    }

    #[tokio::test]
    async fn test_shared_entries_visible_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let conn_str = format!("sqlite://{}", dir.path().join("shared.sqlite").display());

        let writer = DedupCache::connect(Some(&conn_str), DEFAULT_TTL).await;
        let reader = DedupCache::connect(Some(&conn_str), DEFAULT_TTL).await;
        assert_eq!(reader.backend_name(), Some("sqlite"));

        writer.set("https://cdn.example.com/1.jpg", "https://img.example.net/1.webp", meta()).await;
        assert!(reader.get("https://cdn.example.com/1.jpg?v=2").await.is_some());
    }

    #[tokio::test]
    async fn test_clear_erases_both_stores() {
        let cache = shared().await;
        for i in 0..(SCAN_BATCH + 5) {
            cache
                .set(&format!("https://cdn.example.com/{i}.jpg"), "https://img.example.net/x.webp", meta())
                .await;
        }
        assert_eq!(cache.size().await, (SCAN_BATCH + 5) as u64);

        let removed = cache.clear().await;
        assert_eq!(removed, (SCAN_BATCH + 5) as u64);
        assert_eq!(cache.size().await, 0);
        assert!(cache.get("https://cdn.example.com/3.jpg").await.is_none());
    }

    #[tokio::test]
    async fn test_shared_size_ignores_expired_entries() {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        let cache = DedupCache::new(Some(Arc::new(backend)), Duration::from_millis(10));
        cache.set("https://cdn.example.com/1.jpg", "https://img.example.net/1.webp", meta()).await;
        assert_eq!(cache.size().await, 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("https://cdn.example.com/1.jpg").await.is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.cache.size, 0);
        assert_eq!(stats.dedup.unique_images, 0);

        assert_eq!(cache.clear().await, 1);
    }

    #[tokio::test]
    async fn test_stats_track_savings() {
        let cache = DedupCache::local_only(DEFAULT_TTL);
        cache.set("https://cdn.example.com/1.jpg", "https://img.example.net/1.webp", meta()).await;
        cache.set("https://cdn.example.com/2.jpg", "https://img.example.net/2.webp", meta()).await;
        cache.get("https://cdn.example.com/1.jpg").await;
        cache.get("https://cdn.example.com/9.jpg").await;

        let stats = cache.stats().await;
        assert_eq!(stats.cache.size, 2);
        assert_eq!(stats.cache.total_requests, 2);
        assert_eq!(stats.optimization.conversions, 2);
        assert_eq!(stats.optimization.total_saved_bytes, 1500);
        assert_eq!(stats.optimization.avg_saving_per_image, 750);
        assert_eq!(stats.dedup.deduplicated_urls, 0);
    }

    #[tokio::test]
    async fn test_sweep_local_evicts_expired() {
        let cache = DedupCache::local_only(Duration::from_millis(10));
        cache.set("https://cdn.example.com/1.jpg", "https://img.example.net/1.webp", meta()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.set("https://cdn.example.com/2.jpg", "https://img.example.net/2.webp", meta()).await;

        assert_eq!(cache.sweep_local().await, 1);
        assert_eq!(cache.local.read().await.len(), 1);
    }
}
