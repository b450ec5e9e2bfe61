//! Chapter downloads into the offline store.
//!
//! Pages are fetched one at a time through a [`FetchChain`]. A page that
//! fails every tier is recorded and skipped; it never aborts the chapter.
//! The chapter record is written once, after every page has been attempted,
//! and only if at least one page was stored.

pub mod chain;

pub use chain::{ChainError, FetchChain, FetchTier, Fetched, TierKind};

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use pagewire_core::offline::{chapter_id, cover_owner_id, percentage};
use pagewire_core::{ChapterRecord, Error, ImageBlobRecord, OfflineStore, PageError};

/// A chapter to download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRequest {
    pub manga_url: String,
    pub manga_title: String,
    pub chapter_url: String,
    pub chapter_title: String,
    pub chapter_index: f64,
    pub source: String,
    /// Page image URLs in reading order.
    pub pages: Vec<String>,
    pub cover_url: Option<String>,
}

impl DownloadRequest {
    pub fn id(&self) -> String {
        chapter_id(&self.manga_url, &self.chapter_url)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.manga_url.trim().is_empty() || self.chapter_url.trim().is_empty() {
            return Err(Error::InvalidInput("manga and chapter URLs are required".into()));
        }
        if self.pages.is_empty() {
            return Err(Error::InvalidInput("chapter has no pages".into()));
        }
        for (index, page) in self.pages.iter().enumerate() {
            if url::Url::parse(page.trim()).is_err() {
                return Err(Error::InvalidUrl(format!("page {index}: {page:?}")));
            }
        }
        Ok(())
    }
}

/// Download progress after a page attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    pub percentage: u8,
}

impl Progress {
    fn new(current: usize, total: usize) -> Self {
        Self { current, total, percentage: percentage(current, total) }
    }
}

/// Outcome of a chapter download that stored at least one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadReport {
    pub chapter_id: String,
    pub downloaded: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<PageError>,
    /// Stopped early by the cancellation token.
    pub cancelled: bool,
}

impl DownloadReport {
    pub fn completeness(&self) -> u8 {
        percentage(self.downloaded, self.total)
    }
}

/// Drives chapter downloads into an [`OfflineStore`].
#[derive(Debug, Clone)]
pub struct OfflineDownloader {
    store: OfflineStore,
    chain: FetchChain,
}

impl OfflineDownloader {
    pub fn new(store: OfflineStore, chain: FetchChain) -> Self {
        Self { store, chain }
    }

    pub fn store(&self) -> &OfflineStore {
        &self.store
    }

    /// Download every page of a chapter.
    ///
    /// # Errors
    ///
    /// - `InvalidInput`/`InvalidUrl` for an empty or malformed request
    /// - `AlreadyDownloaded` when every page is already stored
    /// - `DownloadFailed` when no page could be fetched; nothing is persisted
    /// - `Cancelled` when cancelled before any page was stored
    /// - `StorageFull` when the store runs out of space; pages stored before
    ///   it stay, but no chapter record is written
    pub async fn download_chapter(
        &self, request: &DownloadRequest, mut progress: impl FnMut(Progress), cancel: &CancellationToken,
    ) -> Result<DownloadReport, Error> {
        request.validate()?;
        let id = request.id();

        if let Some(existing) = self.store.get_chapter(&id).await? {
            if existing.is_complete() {
                return Err(Error::AlreadyDownloaded(id));
            }
            tracing::info!(chapter = %id, stored = existing.size, total = existing.pages.len(), "resuming partial chapter");
        }

        let total = request.pages.len();
        let mut downloaded = Vec::with_capacity(total);
        let mut errors = Vec::new();
        let mut cancelled = false;

        for (index, page) in request.pages.iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                tracing::info!(chapter = %id, attempted = index, total, "download cancelled");
                break;
            }

            match self.chain.fetch(page).await {
                Ok(fetched) => {
                    self.store
                        .put_image(ImageBlobRecord {
                            url: page.clone(),
                            blob: fetched.bytes.to_vec(),
                            chapter_id: id.clone(),
                            content_type: fetched.content_type,
                        })
                        .await?;
                    downloaded.push(page.clone());
                }
                Err(err) => {
                    tracing::warn!(chapter = %id, index, url = %page, error = %err, "page failed");
                    errors.push(PageError { index, url: page.clone(), error: err.to_string() });
                }
            }

            progress(Progress::new(index + 1, total));
        }

        if downloaded.is_empty() {
            if cancelled {
                return Err(Error::Cancelled(id));
            }
            return Err(Error::DownloadFailed { chapter: id, total });
        }

        if !cancelled && let Some(cover) = &request.cover_url {
            self.store_cover(&request.manga_url, cover).await;
        }

        let record = ChapterRecord {
            id: id.clone(),
            manga_url: request.manga_url.clone(),
            manga_title: request.manga_title.clone(),
            chapter_url: request.chapter_url.clone(),
            chapter_title: request.chapter_title.clone(),
            chapter_index: request.chapter_index,
            source: request.source.clone(),
            pages: request.pages.clone(),
            size: downloaded.len(),
            downloaded_images: downloaded,
            errors: errors.clone(),
            cover_url: request.cover_url.clone(),
            download_date: Utc::now(),
        };
        self.store.save_chapter(&record).await?;

        let report = DownloadReport { chapter_id: id, downloaded: record.size, total, errors, cancelled };
        tracing::info!(
            chapter = %report.chapter_id,
            downloaded = report.downloaded,
            total,
            cancelled,
            "chapter stored"
        );
        Ok(report)
    }

    /// Best effort; failures are logged only. The blob is owned by the
    /// manga, not the chapter being downloaded.
    async fn store_cover(&self, manga_url: &str, cover_url: &str) {
        let fetched = match self.chain.fetch(cover_url).await {
            Ok(fetched) => fetched,
            Err(err) => {
                tracing::warn!(manga = %manga_url, url = %cover_url, error = %err, "cover fetch failed");
                return;
            }
        };

        let image = ImageBlobRecord {
            url: cover_url.to_string(),
            blob: fetched.bytes.to_vec(),
            chapter_id: cover_owner_id(manga_url),
            content_type: fetched.content_type,
        };
        if let Err(err) = self.store.put_image(image).await {
            tracing::warn!(manga = %manga_url, url = %cover_url, error = %err, "cover store failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetcherConfig, PooledFetcher};
    use std::time::Duration;
    use wiremock::matchers::path;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MANGA: &str = "https://src.example/manga/9";

    async fn downloader(server: &MockServer) -> OfflineDownloader {
        let fetcher = PooledFetcher::new(FetcherConfig {
            block_private: false,
            retry_base: Duration::from_millis(5),
            ..FetcherConfig::default()
        })
        .unwrap();
        let chain = FetchChain::new(
            fetcher,
            vec![
                FetchTier::direct(Duration::from_millis(500)),
                FetchTier::proxied(server.uri(), 1200, 80, Duration::from_millis(500)),
            ],
        );
        OfflineDownloader::new(OfflineStore::open_in_memory().await.unwrap(), chain)
    }

    fn request(server: &MockServer, pages: usize) -> DownloadRequest {
        DownloadRequest {
            manga_url: MANGA.to_string(),
            manga_title: "Test".to_string(),
            chapter_url: format!("{MANGA}/ch/1"),
            chapter_title: "Chapter 1".to_string(),
            chapter_index: 1.0,
            source: "example".to_string(),
            pages: (0..pages).map(|i| format!("{}/ch/p{i}.jpg", server.uri())).collect(),
            cover_url: None,
        }
    }

    async fn serve_pages(server: &MockServer, pages: usize, failing: &[usize]) {
        for i in (0..pages).filter(|i| !failing.contains(i)) {
            Mock::given(path(format!("/ch/p{i}.jpg")))
                .respond_with(ResponseTemplate::new(200).set_body_raw(vec![i as u8; 4], "image/jpeg"))
                .mount(server)
                .await;
        }
    }

    #[tokio::test]
    async fn test_two_failing_pages_leave_partial_chapter() {
        let server = MockServer::start().await;
        serve_pages(&server, 10, &[3, 7]).await;
        let dl = downloader(&server).await;
        let req = request(&server, 10);

        let mut seen = Vec::new();
        let report = dl
            .download_chapter(&req, |p| seen.push(p), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.downloaded, 8);
        assert_eq!(report.total, 10);
        assert_eq!(report.completeness(), 80);
        let failed: Vec<usize> = report.errors.iter().map(|e| e.index).collect();
        assert_eq!(failed, vec![3, 7]);
        assert!(!report.cancelled);

        assert_eq!(seen.len(), 10);
        assert_eq!(seen.last().copied(), Some(Progress { current: 10, total: 10, percentage: 100 }));

        let record = dl.store().get_chapter(&req.id()).await.unwrap().unwrap();
        assert_eq!(record.size, 8);
        assert!(!record.downloaded_images.contains(&req.pages[3]));
        assert!(!record.downloaded_images.contains(&req.pages[7]));
        assert_eq!(record.errors.len(), 2);
        assert_eq!(dl.store().count_images(&req.id()).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_all_pages_failing_persists_nothing() {
        let server = MockServer::start().await;
        let dl = downloader(&server).await;
        let req = request(&server, 4);

        let result = dl.download_chapter(&req, |_| {}, &CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::DownloadFailed { total: 4, .. })));
        assert!(dl.store().get_chapter(&req.id()).await.unwrap().is_none());
        assert_eq!(dl.store().count_images(&req.id()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_complete_chapter_rejected_partial_resumed() {
        let server = MockServer::start().await;
        serve_pages(&server, 3, &[1]).await;
        let dl = downloader(&server).await;
        let req = request(&server, 3);
        let token = CancellationToken::new();

        let first = dl.download_chapter(&req, |_| {}, &token).await.unwrap();
        assert_eq!(first.downloaded, 2);

        Mock::given(path("/ch/p1.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 4]))
            .mount(&server)
            .await;
        let second = dl.download_chapter(&req, |_| {}, &token).await.unwrap();
        assert_eq!(second.downloaded, 3);
        assert!(dl.store().is_fully_downloaded(&req.id()).await.unwrap());

        let third = dl.download_chapter(&req, |_| {}, &token).await;
        assert!(matches!(third, Err(Error::AlreadyDownloaded(_))));
    }

    #[tokio::test]
    async fn test_invalid_requests_rejected() {
        let server = MockServer::start().await;
        let dl = downloader(&server).await;

        let empty = request(&server, 0);
        let result = dl.download_chapter(&empty, |_| {}, &CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));

        let mut malformed = request(&server, 2);
        malformed.pages[1] = "not a url".into();
        let result = dl.download_chapter(&malformed, |_| {}, &CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_cancel_finalizes_attempted_pages() {
        let server = MockServer::start().await;
        serve_pages(&server, 5, &[]).await;
        let dl = downloader(&server).await;
        let req = request(&server, 5);

        let token = CancellationToken::new();
        let cancel = token.clone();
        let report = dl
            .download_chapter(
                &req,
                move |p| {
                    if p.current == 2 {
                        cancel.cancel();
                    }
                },
                &token,
            )
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.downloaded, 2);
        let record = dl.store().get_chapter(&req.id()).await.unwrap().unwrap();
        assert_eq!(record.pages.len(), 5);
        assert!(!record.is_complete());
    }

    #[tokio::test]
    async fn test_cover_failure_does_not_affect_chapter() {
        let server = MockServer::start().await;
        serve_pages(&server, 2, &[]).await;
        let dl = downloader(&server).await;
        let mut req = request(&server, 2);
        req.cover_url = Some(format!("{}/cover-missing.jpg", server.uri()));

        let report = dl.download_chapter(&req, |_| {}, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.downloaded, 2);
        assert!(report.errors.is_empty());
        assert_eq!(dl.store().count_images(&req.id()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cover_owned_by_manga() {
        let server = MockServer::start().await;
        serve_pages(&server, 2, &[]).await;
        Mock::given(path("/cover.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![5u8; 8]))
            .mount(&server)
            .await;
        let dl = downloader(&server).await;
        let mut req = request(&server, 1);
        req.cover_url = Some(format!("{}/cover.jpg", server.uri()));

        dl.download_chapter(&req, |_| {}, &CancellationToken::new()).await.unwrap();
        assert_eq!(dl.store().count_images(&req.id()).await.unwrap(), 1);
        let cover = dl.store().get_image(&format!("{}/cover.jpg", server.uri())).await.unwrap().unwrap();
        assert_eq!(cover.chapter_id, cover_owner_id(MANGA));

        let mut next = request(&server, 1);
        next.chapter_url = format!("{MANGA}/ch/2");
        next.pages = vec![format!("{}/ch/p1.jpg", server.uri())];
        next.cover_url = req.cover_url.clone();
        dl.download_chapter(&next, |_| {}, &CancellationToken::new()).await.unwrap();

        dl.store().delete_chapter(&next.id()).await.unwrap();
        assert!(dl.store().get_image(&format!("{}/cover.jpg", server.uri())).await.unwrap().is_some());

        assert_eq!(dl.store().delete_manga(MANGA).await.unwrap(), (1, 2));
    }

    #[tokio::test]
    async fn test_cancel_before_first_page_reports_cancelled() {
        let server = MockServer::start().await;
        serve_pages(&server, 3, &[]).await;
        let dl = downloader(&server).await;
        let req = request(&server, 3);

        let token = CancellationToken::new();
        token.cancel();
        let mut calls = 0;
        let result = dl.download_chapter(&req, |_| calls += 1, &token).await;

        assert!(matches!(result, Err(Error::Cancelled(ref id)) if *id == req.id()));
        assert_eq!(calls, 0);
        assert!(dl.store().get_chapter(&req.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_full_aborts_without_chapter_record() {
        let server = MockServer::start().await;
        serve_pages(&server, 5, &[2]).await;
        Mock::given(path("/ch/p2.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![9u8; 64 * 1024], "image/jpeg"))
            .mount(&server)
            .await;
        let dl = downloader(&server).await;
        dl.store().limit_pages(1).await.unwrap();
        let req = request(&server, 5);

        let mut seen = Vec::new();
        let result = dl
            .download_chapter(&req, |p| seen.push(p.current), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(Error::StorageFull(_))));
        assert_eq!(seen, vec![1, 2]);
        assert!(dl.store().get_chapter(&req.id()).await.unwrap().is_none());
        assert!(dl.store().get_image(&req.pages[2]).await.unwrap().is_none());
    }
}
