//! Dedup cache counters and the stats payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters owned by one [`super::DedupCache`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
    pub conversions: u64,
    pub bytes_saved: u64,
    /// Hits served for a URL other than the one that created the entry.
    pub deduplicated: u64,
}

impl CacheCounters {
    pub fn record_hit(&mut self, deduplicated: bool) {
        self.hits += 1;
        if deduplicated {
            self.deduplicated += 1;
        }
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_write(&mut self, conversion: bool, saved_bytes: u64) {
        if conversion {
            self.conversions += 1;
        }
        self.bytes_saved = self.bytes_saved.saturating_add(saved_bytes);
    }

    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }

    /// Hit rate in `[0, 1]`; zero before the first request.
    pub fn hit_rate(&self) -> f64 {
        match self.total_requests() {
            0 => 0.0,
            total => self.hits as f64 / total as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSection {
    pub size: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub total_requests: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationSection {
    pub conversions: u64,
    pub total_saved_bytes: u64,
    pub avg_saving_per_image: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupSection {
    pub deduplicated_urls: u64,
    pub unique_images: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UptimeSection {
    pub ms: u64,
    pub since: DateTime<Utc>,
}

/// Observability payload returned by `GET /image-proxy/stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub cache: CacheSection,
    pub optimization: OptimizationSection,
    pub dedup: DedupSection,
    pub uptime: UptimeSection,
}

impl CacheStats {
    pub fn build(counters: &CacheCounters, size: u64, since: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let avg_saving_per_image = match counters.conversions {
            0 => 0,
            n => counters.bytes_saved / n,
        };
        let uptime_ms = (now - since).num_milliseconds().max(0) as u64;

        Self {
            cache: CacheSection {
                size,
                hits: counters.hits,
                misses: counters.misses,
                hit_rate: counters.hit_rate(),
                total_requests: counters.total_requests(),
            },
            optimization: OptimizationSection {
                conversions: counters.conversions,
                total_saved_bytes: counters.bytes_saved,
                avg_saving_per_image,
            },
            dedup: DedupSection { deduplicated_urls: counters.deduplicated, unique_images: size },
            uptime: UptimeSection { ms: uptime_ms, since },
        }
    }
}
