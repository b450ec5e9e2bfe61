//! Core types and shared functionality for pagewire.
//!
//! This crate provides:
//! - Content-identity cache keys and the dedup cache store
//! - The offline chapter store
//! - SQLite connection and migration helpers
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod offline;

pub use cache::{CacheEntry, CacheStats, DedupCache, EntryMetadata, SweeperHandle, derive_cache_key};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use offline::{ChapterRecord, ImageBlobRecord, OfflineStore, PageError, StorageUsage};
