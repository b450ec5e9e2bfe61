//! Subcommand implementations.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use pagewire_client::{
    DownloadRequest, FetchChain, FetcherConfig, OfflineDownloader, PooledFetcher, PriorityQueue, ProxiedLoader,
    QueueConfig,
};
use pagewire_core::{AppConfig, OfflineStore};

/// Client-side fetcher. The proxy and image hosts are chosen by the
/// operator here, so the private address guard stays off.
fn fetcher(config: &AppConfig) -> Result<PooledFetcher> {
    Ok(PooledFetcher::new(FetcherConfig { block_private: false, ..FetcherConfig::from(config) })?)
}

async fn open_store(config: &AppConfig) -> Result<OfflineStore> {
    OfflineStore::open(&config.offline_db_path)
        .await
        .with_context(|| format!("opening offline store at {}", config.offline_db_path.display()))
}

/// Token cancelled on Ctrl+C.
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancelling after the current page...");
            child.cancel();
        }
    });
    token
}

pub async fn download(config: &AppConfig, request: DownloadRequest) -> Result<()> {
    let store = open_store(config).await?;
    let chain = FetchChain::standard(fetcher(config)?, config);
    let downloader = OfflineDownloader::new(store, chain);
    tracing::debug!(chapter = %request.id(), pages = request.pages.len(), "starting download");

    let bar = ProgressBar::new(request.pages.len() as u64);
    bar.set_style(ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} pages ({percent}%) {msg}")?);
    bar.set_message(request.chapter_title.clone());

    let cancel = ctrl_c_token();
    let result = downloader
        .download_chapter(&request, |p| bar.set_position(p.current as u64), &cancel)
        .await;
    bar.finish_and_clear();

    let report = result?;
    println!(
        "{}: stored {}/{} pages ({}%){}",
        report.chapter_id,
        report.downloaded,
        report.total,
        report.completeness(),
        if report.cancelled { ", cancelled" } else { "" }
    );
    for error in &report.errors {
        println!("  page {} failed: {} ({})", error.index, error.url, error.error);
    }
    Ok(())
}

pub async fn list(config: &AppConfig, manga_url: Option<&str>) -> Result<()> {
    let store = open_store(config).await?;
    let chapters = store.list_chapters(manga_url).await?;
    if chapters.is_empty() {
        println!("no chapters stored");
        return Ok(());
    }
    for chapter in chapters {
        println!(
            "{}\t{} / {}\t{}/{} pages ({}%)\t{}",
            chapter.id,
            chapter.manga_title,
            chapter.chapter_title,
            chapter.size,
            chapter.pages.len(),
            chapter.completeness(),
            chapter.download_date.format("%Y-%m-%d %H:%M"),
        );
    }
    Ok(())
}

pub async fn read(config: &AppConfig, id: &str, out: &Path) -> Result<()> {
    let store = open_store(config).await?;
    let pages = store.read_chapter(id).await?;

    tokio::fs::create_dir_all(out)
        .await
        .with_context(|| format!("creating {}", out.display()))?;
    for (n, page) in pages.iter().enumerate() {
        let file = out.join(format!("{n:03}.{}", extension_for(page.content_type.as_deref(), &page.url)));
        tokio::fs::write(&file, &page.blob)
            .await
            .with_context(|| format!("writing {}", file.display()))?;
    }
    println!("wrote {} pages to {}", pages.len(), out.display());
    Ok(())
}

pub async fn delete(config: &AppConfig, id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let images = store.delete_chapter(id).await?;
    println!("deleted {id} ({images} images)");
    Ok(())
}

pub async fn delete_manga(config: &AppConfig, manga_url: &str) -> Result<()> {
    let store = open_store(config).await?;
    let (chapters, images) = store.delete_manga(manga_url).await?;
    println!("deleted {chapters} chapters ({images} images) of {manga_url}");
    Ok(())
}

pub async fn usage(config: &AppConfig) -> Result<()> {
    let store = open_store(config).await?;
    let usage = store.usage().await?;
    println!("chapters: {}", usage.chapters);
    println!("images:   {}", usage.images);
    println!("bytes:    {}", usage.bytes);
    Ok(())
}

pub async fn warm(config: &AppConfig, urls: &[String], priority: i32, direct: bool) -> Result<()> {
    let fetcher = fetcher(config)?;
    let cancel = ctrl_c_token();
    if direct {
        let queue = PriorityQueue::new(fetcher, QueueConfig::from(config));
        report_warm(&queue, urls, priority, &cancel).await
    } else {
        let loader =
            ProxiedLoader::new(fetcher, config.proxy_base_url.clone(), config.default_width, config.default_quality);
        let queue = PriorityQueue::new(loader, QueueConfig::from(config));
        report_warm(&queue, urls, priority, &cancel).await
    }
}

async fn report_warm<L: pagewire_client::ImageLoader>(
    queue: &PriorityQueue<L>, urls: &[String], priority: i32, cancel: &CancellationToken,
) -> Result<()> {
    let tickets = queue.preload(urls, priority, cancel);
    let mut loaded = 0usize;
    for (url, ticket) in urls.iter().zip(tickets) {
        match ticket.wait().await {
            Ok(bytes) => {
                loaded += 1;
                println!("ok   {url} ({} bytes)", bytes.len());
            }
            Err(e) => println!("fail {url}: {e}"),
        }
    }
    println!("warmed {loaded}/{} images", urls.len());
    Ok(())
}

/// File extension for a stored page.
fn extension_for(content_type: Option<&str>, url: &str) -> String {
    let from_type = content_type
        .and_then(|ct| ct.split(';').next())
        .and_then(|mime| mime.trim().strip_prefix("image/"))
        .map(|sub| match sub {
            "jpeg" | "pjpeg" => "jpg".to_string(),
            "svg+xml" => "svg".to_string(),
            other => other.to_ascii_lowercase(),
        });

    from_type
        .or_else(|| {
            let path = url.split(['?', '#']).next().unwrap_or(url);
            let name = path.rsplit('/').next()?;
            let (_, ext) = name.rsplit_once('.')?;
            (!ext.is_empty() && ext.len() <= 5).then(|| ext.to_ascii_lowercase())
        })
        .unwrap_or_else(|| "bin".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_from_content_type() {
        assert_eq!(extension_for(Some("image/jpeg"), "https://x/p"), "jpg");
        assert_eq!(extension_for(Some("image/webp; q=1"), "https://x/p"), "webp");
        assert_eq!(extension_for(Some("image/svg+xml"), "https://x/p"), "svg");
    }

    #[test]
    fn test_extension_from_url() {
        assert_eq!(extension_for(None, "https://cdn.example.com/a/01.PNG?sig=1"), "png");
        assert_eq!(extension_for(Some("application/octet-stream"), "https://cdn.example.com/a/01.gif"), "gif");
        assert_eq!(extension_for(None, "https://cdn.example.com/a/page"), "bin");
    }

    #[tokio::test]
    async fn test_store_commands_against_temp_db() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig { offline_db_path: dir.path().join("offline.sqlite"), ..Default::default() };

        list(&config, None).await.unwrap();
        usage(&config).await.unwrap();
        assert!(delete(&config, "missing").await.is_err());
        assert!(read(&config, "missing", &dir.path().join("out")).await.is_err());
    }
}
