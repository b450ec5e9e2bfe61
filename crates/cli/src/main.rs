//! pagewire - offline chapter store and prefetch front-end.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

/// Download manga chapters for offline reading and warm the image proxy.
#[derive(Parser, Debug)]
#[command(name = "pagewire", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download a chapter into the offline store.
    Download {
        #[arg(long)]
        manga_url: String,
        #[arg(long)]
        manga_title: String,
        #[arg(long)]
        chapter_url: String,
        #[arg(long)]
        chapter_title: String,
        /// Position of the chapter within the manga.
        #[arg(long, default_value_t = 0.0)]
        index: f64,
        #[arg(long, default_value = "unknown")]
        source: String,
        /// Manga cover image, stored once per manga.
        #[arg(long)]
        cover: Option<String>,
        /// Page image URLs in reading order.
        #[arg(required = true)]
        pages: Vec<String>,
    },
    /// List stored chapters.
    List {
        #[arg(long)]
        manga_url: Option<String>,
    },
    /// Write a stored chapter's pages to a directory.
    Read {
        id: String,
        #[arg(long)]
        out: PathBuf,
    },
    /// Delete a stored chapter and its images.
    Delete { id: String },
    /// Delete every stored chapter of a manga.
    DeleteManga { manga_url: String },
    /// Show offline store totals.
    Usage,
    /// Prefetch images through the priority queue.
    Warm {
        #[arg(required = true)]
        urls: Vec<String>,
        /// Priority of the first URL; later URLs get lower priorities.
        #[arg(long, default_value_t = 100)]
        priority: i32,
        /// Load from the image hosts instead of the proxy.
        #[arg(long)]
        direct: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = pagewire_core::AppConfig::load()?;

    match cli.command {
        Commands::Download { manga_url, manga_title, chapter_url, chapter_title, index, source, cover, pages } => {
            let request = pagewire_client::DownloadRequest {
                manga_url,
                manga_title,
                chapter_url,
                chapter_title,
                chapter_index: index,
                source,
                pages,
                cover_url: cover,
            };
            commands::download(&config, request).await
        }
        Commands::List { manga_url } => commands::list(&config, manga_url.as_deref()).await,
        Commands::Read { id, out } => commands::read(&config, &id, &out).await,
        Commands::Delete { id } => commands::delete(&config, &id).await,
        Commands::DeleteManga { manga_url } => commands::delete_manga(&config, &manga_url).await,
        Commands::Usage => commands::usage(&config).await,
        Commands::Warm { urls, priority, direct } => commands::warm(&config, &urls, priority, direct).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_download() {
        let cli = Cli::try_parse_from([
            "pagewire",
            "download",
            "--manga-url",
            "https://src.example/m/1",
            "--manga-title",
            "Title",
            "--chapter-url",
            "https://src.example/m/1/c/2",
            "--chapter-title",
            "Chapter 2",
            "--index",
            "2.5",
            "https://cdn.example.com/p0.jpg",
            "https://cdn.example.com/p1.jpg",
        ])
        .unwrap();

        match cli.command {
            Commands::Download { index, pages, source, cover, .. } => {
                assert_eq!(index, 2.5);
                assert_eq!(pages.len(), 2);
                assert_eq!(source, "unknown");
                assert!(cover.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_download_requires_pages() {
        let result = Cli::try_parse_from([
            "pagewire",
            "download",
            "--manga-url",
            "m",
            "--manga-title",
            "t",
            "--chapter-url",
            "c",
            "--chapter-title",
            "t",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_delete_manga_and_warm() {
        let cli = Cli::try_parse_from(["pagewire", "delete-manga", "https://src.example/m/1"]).unwrap();
        assert!(matches!(cli.command, Commands::DeleteManga { .. }));

        let cli = Cli::try_parse_from(["pagewire", "warm", "--direct", "https://cdn.example.com/1.jpg"]).unwrap();
        match cli.command {
            Commands::Warm { urls, priority, direct } => {
                assert_eq!(urls.len(), 1);
                assert_eq!(priority, 100);
                assert!(direct);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
