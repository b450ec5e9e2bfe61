//! Unified error types for pagewire.
//!
//! Each variant renders with a stable, upper-case code prefix so that
//! logs and HTTP error bodies can be matched without parsing prose.

use tokio_rusqlite::rusqlite;

/// Unified error types for the pagewire stores and pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., an empty page list).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Database operation failed.
    #[error("STORE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("STORE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// The external shared cache could not be reached.
    ///
    /// The dedup cache swallows this variant; it only surfaces from the
    /// backend itself.
    #[error("BACKEND_UNAVAILABLE: {0}")]
    BackendUnavailable(String),

    /// Stored value could not be (de)serialized.
    #[error("SERIALIZATION: {0}")]
    Serialization(String),

    /// The chapter is already fully stored offline.
    #[error("ALREADY_DOWNLOADED: {0}")]
    AlreadyDownloaded(String),

    /// No chapter record with the given id.
    #[error("CHAPTER_NOT_FOUND: {0}")]
    ChapterNotFound(String),

    /// A chapter record exists but none of its images can be read back.
    #[error("CHAPTER_CORRUPTED: {0}")]
    ChapterCorrupted(String),

    /// Every page of a chapter failed; nothing was persisted.
    #[error("DOWNLOAD_FAILED: {chapter}: all {total} pages failed")]
    DownloadFailed { chapter: String, total: usize },

    /// Cancelled before any page was stored; nothing was persisted.
    #[error("CANCELLED: {0}")]
    Cancelled(String),

    /// The durable store is out of space.
    #[error("STORAGE_FULL: {0}")]
    StorageFull(String),
}

impl Error {
    /// Stable code prefix, used by the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::Database(_) | Error::MigrationFailed(_) => "STORE_ERROR",
            Error::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            Error::Serialization(_) => "SERIALIZATION",
            Error::AlreadyDownloaded(_) => "ALREADY_DOWNLOADED",
            Error::ChapterNotFound(_) => "CHAPTER_NOT_FOUND",
            Error::ChapterCorrupted(_) => "CHAPTER_CORRUPTED",
            Error::DownloadFailed { .. } => "DOWNLOAD_FAILED",
            Error::Cancelled(_) => "CANCELLED",
            Error::StorageFull(_) => "STORAGE_FULL",
        }
    }
}

fn is_disk_full(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::DiskFull
    )
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e.into(),
            other => Error::Database(other),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        if is_disk_full(&err) {
            return Error::StorageFull(err.to_string());
        }
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
