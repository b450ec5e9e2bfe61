//! Offline chapter and image records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Composite chapter id: the manga URL and chapter URL joined by `|`.
pub fn chapter_id(manga_url: &str, chapter_url: &str) -> String {
    format!("{manga_url}|{chapter_url}")
}

/// Owner id for a manga's cover blob.
///
/// Covers belong to the manga rather than to a chapter, so deleting one
/// chapter keeps the cover other chapters still name.
pub fn cover_owner_id(manga_url: &str) -> String {
    format!("{manga_url}|#cover")
}

/// A page that could not be fetched by any tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageError {
    pub index: usize,
    pub url: String,
    pub error: String,
}

/// A chapter persisted for offline reading.
///
/// Written once, at the end of a download attempt, and only when at least
/// one page succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterRecord {
    pub id: String,
    pub manga_url: String,
    pub manga_title: String,
    pub chapter_url: String,
    pub chapter_title: String,
    pub chapter_index: f64,
    pub source: String,
    /// Original page URLs, in reading order.
    pub pages: Vec<String>,
    /// The subset of `pages` whose blobs were stored.
    pub downloaded_images: Vec<String>,
    pub errors: Vec<PageError>,
    pub cover_url: Option<String>,
    pub download_date: DateTime<Utc>,
    /// Always `downloaded_images.len()`.
    pub size: usize,
}

impl ChapterRecord {
    pub fn is_complete(&self) -> bool {
        !self.pages.is_empty() && self.size == self.pages.len()
    }

    /// Share of pages stored, as a whole percentage.
    pub fn completeness(&self) -> u8 {
        percentage(self.size, self.pages.len())
    }
}

/// One stored image blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlobRecord {
    pub url: String,
    pub blob: Vec<u8>,
    pub chapter_id: String,
    pub content_type: Option<String>,
}

/// Totals across the whole offline store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUsage {
    pub chapters: u64,
    pub images: u64,
    pub bytes: u64,
}

/// `part / total` as a rounded-down percentage; zero when `total` is zero.
pub fn percentage(part: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((part.min(total) * 100) / total) as u8
}
