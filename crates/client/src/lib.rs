//! Client side of pagewire.
//!
//! This crate provides the pooled retrying fetcher, the priority image
//! queue, and the offline chapter downloader with its fetch fallback chain.

pub mod fetch;
pub mod offline;
pub mod queue;

pub use fetch::{FetchError, FetchProfile, FetchResponse, FetcherConfig, PooledFetcher};
pub use offline::{DownloadReport, DownloadRequest, FetchChain, FetchTier, OfflineDownloader, Progress};
pub use queue::{ImageLoader, PriorityQueue, ProxiedLoader, QueueConfig, QueueError, Ticket};
