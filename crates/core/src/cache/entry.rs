//! Dedup cache records.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A cached optimization result for one logical image.
///
/// Serialized as `{originalUrl, optimizedUrl, hash, timestamp, format,
/// originalSize, optimizedSize}`; this is the value stored in the shared
/// backend and returned by the stats tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub original_url: String,
    pub optimized_url: String,
    pub hash: String,
    /// Creation time in milliseconds since the Unix epoch.
    #[serde(rename = "timestamp")]
    pub created_at: i64,
    pub format: String,
    #[serde(rename = "originalSize")]
    pub original_size_bytes: u64,
    #[serde(rename = "optimizedSize")]
    pub optimized_size_bytes: u64,
}

impl CacheEntry {
    /// Age of the entry in milliseconds, relative to `now_ms`.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.created_at)
    }

    /// True once `now - created_at > ttl`.
    pub fn is_expired_at(&self, now_ms: i64, ttl: Duration) -> bool {
        self.age_ms(now_ms) > ttl.as_millis() as i64
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.is_expired_at(Utc::now().timestamp_millis(), ttl)
    }

    /// Bytes saved by the optimization (never negative).
    pub fn saved_bytes(&self) -> u64 {
        self.original_size_bytes.saturating_sub(self.optimized_size_bytes)
    }

    /// Whether the optimized rendition lives somewhere other than the source.
    pub fn is_conversion(&self) -> bool {
        self.optimized_url != self.original_url
    }
}

/// Metadata supplied by the caller of [`super::DedupCache::set`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryMetadata {
    pub format: String,
    pub original_size_bytes: u64,
    pub optimized_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(created_at: i64) -> CacheEntry {
        CacheEntry {
            original_url: "https://cdn.example.com/1.jpg".into(),
            optimized_url: "https://img.example.net/1.webp".into(),
            hash: "0123456789abcdef".into(),
            created_at,
            format: "webp".into(),
            original_size_bytes: 1000,
            optimized_size_bytes: 400,
        }
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(entry(42)).unwrap();
        assert_eq!(json["originalUrl"], "https://cdn.example.com/1.jpg");
        assert_eq!(json["optimizedUrl"], "https://img.example.net/1.webp");
        assert_eq!(json["timestamp"], 42);
        assert_eq!(json["originalSize"], 1000);
        assert_eq!(json["optimizedSize"], 400);
        assert_eq!(json["format"], "webp");
    }

    #[test]
    fn test_expiry_boundary() {
        let ttl = Duration::from_secs(10);
        let e = entry(0);
        assert!(!e.is_expired_at(10_000, ttl));
        assert!(e.is_expired_at(10_001, ttl));
    }

    #[test]
    fn test_saved_bytes_saturates() {
        let mut e = entry(0);
        assert_eq!(e.saved_bytes(), 600);
        e.optimized_size_bytes = 2000;
        assert_eq!(e.saved_bytes(), 0);
    }
}
