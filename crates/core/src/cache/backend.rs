//! External shared cache backends.
//!
//! The dedup cache treats its shared backend as an eventually-consistent
//! key-value store: last write wins, no locking. The bundled backend is a
//! SQLite file that several proxy processes can open at once (WAL mode).

use super::entry::CacheEntry;
use crate::Error;
use crate::db;
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::time::Duration;
use tokio_rusqlite::{Connection, params, rusqlite};

/// One page of a cursor-based key scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub keys: Vec<String>,
    /// Cursor for the next page, `None` once the scan is complete.
    pub next: Option<String>,
}

/// A shared key-value backend for cache entries.
#[async_trait]
pub trait SharedBackend: Send + Sync {
    /// Short backend name for logs and health output.
    fn name(&self) -> &'static str;

    async fn get(&self, hash: &str) -> Result<Option<CacheEntry>, Error>;

    async fn set(&self, entry: &CacheEntry, ttl: Duration) -> Result<(), Error>;

    /// Return up to `count` keys strictly after `cursor`, expired or not.
    async fn scan(&self, cursor: Option<String>, count: usize) -> Result<ScanPage, Error>;

    /// Like [`SharedBackend::scan`], but skips keys whose TTL has elapsed.
    async fn scan_live(&self, cursor: Option<String>, count: usize) -> Result<ScanPage, Error>;

    /// Delete the given keys, returning how many existed.
    async fn delete(&self, hashes: Vec<String>) -> Result<u64, Error>;

    /// Drop entries whose TTL has elapsed.
    async fn purge_expired(&self) -> Result<u64, Error>;
}

/// Parse a shared cache connection string into a SQLite path.
///
/// Accepts `sqlite://<path>`, `sqlite:<path>` or a bare filesystem path.
pub fn parse_connection_string(conn_str: &str) -> Result<PathBuf, Error> {
    let trimmed = conn_str.trim();
    if trimmed.is_empty() {
        return Err(Error::BackendUnavailable("empty connection string".into()));
    }

    let path = if let Some(rest) = trimmed.strip_prefix("sqlite://") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("sqlite:") {
        rest
    } else if let Some((scheme, _)) = trimmed.split_once("://") {
        return Err(Error::BackendUnavailable(format!("unsupported backend scheme: {scheme}")));
    } else {
        trimmed
    };

    if path.is_empty() {
        return Err(Error::BackendUnavailable("connection string has no path".into()));
    }
    Ok(PathBuf::from(path))
}

/// SQLite-backed shared cache.
#[derive(Clone, Debug)]
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Connect using a connection string (see [`parse_connection_string`]).
    pub async fn connect(conn_str: &str) -> Result<Self, Error> {
        let path = parse_connection_string(conn_str)?;
        let conn = db::open(&path, db::migrations::DEDUP_CACHE)
            .await
            .map_err(|e| Error::BackendUnavailable(format!("{}: {e}", path.display())))?;
        Ok(Self { conn })
    }

    /// Open an in-memory backend for testing.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = db::open_in_memory(db::migrations::DEDUP_CACHE).await?;
        Ok(Self { conn })
    }

    /// Keyset page over `dedup_cache`, restricted to rows live at `live_at` when given.
    async fn scan_keys(&self, cursor: Option<String>, count: usize, live_at: Option<i64>) -> Result<ScanPage, Error> {
        let limit = count.max(1) as i64;
        self.conn
            .call(move |conn| -> Result<ScanPage, Error> {
                let mut stmt = conn.prepare(
                    "SELECT hash FROM dedup_cache
                     WHERE hash > ?1 AND (?2 IS NULL OR expires_at > ?2)
                     ORDER BY hash ASC LIMIT ?3",
                )?;
                let keys = stmt
                    .query_map(params![cursor.unwrap_or_default(), live_at, limit], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;

                let next = if keys.len() as i64 == limit { keys.last().cloned() } else { None };
                Ok(ScanPage { keys, next })
            })
            .await
            .map_err(Error::from)
    }
}

#[async_trait]
impl SharedBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, hash: &str) -> Result<Option<CacheEntry>, Error> {
        let hash = hash.to_string();
        let now = Utc::now().timestamp_millis();
        self.conn
            .call(move |conn| -> Result<Option<CacheEntry>, Error> {
                let result = conn.query_row(
                    "SELECT entry_json FROM dedup_cache WHERE hash = ?1 AND expires_at > ?2",
                    params![hash, now],
                    |row| row.get::<_, String>(0),
                );

                match result {
                    Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    async fn set(&self, entry: &CacheEntry, ttl: Duration) -> Result<(), Error> {
        let json = serde_json::to_string(entry)?;
        let hash = entry.hash.clone();
        let expires_at = entry.created_at.saturating_add(ttl.as_millis() as i64);
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO dedup_cache (hash, entry_json, expires_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(hash) DO UPDATE SET
                        entry_json = excluded.entry_json,
                        expires_at = excluded.expires_at",
                    params![hash, json, expires_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn scan(&self, cursor: Option<String>, count: usize) -> Result<ScanPage, Error> {
        self.scan_keys(cursor, count, None).await
    }

    async fn scan_live(&self, cursor: Option<String>, count: usize) -> Result<ScanPage, Error> {
        self.scan_keys(cursor, count, Some(Utc::now().timestamp_millis())).await
    }

    async fn delete(&self, hashes: Vec<String>) -> Result<u64, Error> {
        if hashes.is_empty() {
            return Ok(0);
        }
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let tx = conn.transaction()?;
                let mut deleted = 0u64;
                {
                    let mut stmt = tx.prepare("DELETE FROM dedup_cache WHERE hash = ?1")?;
                    for hash in &hashes {
                        deleted += stmt.execute(params![hash])? as u64;
                    }
                }
                tx.commit()?;
                Ok(deleted)
            })
            .await
            .map_err(Error::from)
    }

    async fn purge_expired(&self) -> Result<u64, Error> {
        let now = Utc::now().timestamp_millis();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM dedup_cache WHERE expires_at <= ?1", params![now])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::hash::derive_cache_key;

    fn make_entry(url: &str) -> CacheEntry {
        CacheEntry {
            original_url: url.to_string(),
            optimized_url: format!("{url}.webp"),
            hash: derive_cache_key(url),
            created_at: Utc::now().timestamp_millis(),
            format: "webp".into(),
            original_size_bytes: 2048,
            optimized_size_bytes: 512,
        }
    }

    #[test]
    fn test_parse_connection_string() {
        assert_eq!(parse_connection_string("sqlite:///tmp/a.db").unwrap(), PathBuf::from("/tmp/a.db"));
        assert_eq!(parse_connection_string("sqlite:cache.db").unwrap(), PathBuf::from("cache.db"));
        assert_eq!(parse_connection_string("./shared.sqlite").unwrap(), PathBuf::from("./shared.sqlite"));
        assert!(matches!(
            parse_connection_string("redis://localhost:6379"),
            Err(Error::BackendUnavailable(_))
        ));
        assert!(parse_connection_string("  ").is_err());
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        let entry = make_entry("https://cdn.example.com/a.jpg");

        backend.set(&entry, Duration::from_secs(60)).await.unwrap();

        let found = backend.get(&entry.hash).await.unwrap().unwrap();
        assert_eq!(found, entry);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        assert!(backend.get("0000000000000000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entries_hidden_and_purged() {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        let mut entry = make_entry("https://cdn.example.com/old.jpg");
        entry.created_at -= 10_000;

        backend.set(&entry, Duration::from_secs(1)).await.unwrap();
        assert!(backend.get(&entry.hash).await.unwrap().is_none());

        assert_eq!(backend.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_scan_pages_through_all_keys() {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        for i in 0..25 {
            let entry = make_entry(&format!("https://cdn.example.com/{i}.jpg"));
            backend.set(&entry, Duration::from_secs(60)).await.unwrap();
        }

        let mut cursor = None;
        let mut seen = Vec::new();
        let mut pages = 0;
        loop {
            let page = backend.scan(cursor, 10).await.unwrap();
            pages += 1;
            seen.extend(page.keys);
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        assert_eq!(seen.len(), 25);
        assert_eq!(pages, 3);
        let mut sorted = seen.clone();
        sorted.sort();
        assert_eq!(seen, sorted);
    }

    #[tokio::test]
    async fn test_scan_live_skips_expired_rows() {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        let fresh = make_entry("https://cdn.example.com/fresh.jpg");
        let mut stale = make_entry("https://cdn.example.com/stale.jpg");
        stale.created_at -= 10_000;
        backend.set(&fresh, Duration::from_secs(60)).await.unwrap();
        backend.set(&stale, Duration::from_secs(1)).await.unwrap();

        let all = backend.scan(None, 10).await.unwrap();
        assert_eq!(all.keys.len(), 2);

        let live = backend.scan_live(None, 10).await.unwrap();
        assert_eq!(live.keys, vec![fresh.hash.clone()]);
        assert!(live.next.is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        let a = make_entry("https://cdn.example.com/a.jpg");
        let b = make_entry("https://cdn.example.com/b.jpg");
        backend.set(&a, Duration::from_secs(60)).await.unwrap();
        backend.set(&b, Duration::from_secs(60)).await.unwrap();

        let deleted = backend
            .delete(vec![a.hash.clone(), "ffffffffffffffff".into()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(backend.get(&a.hash).await.unwrap().is_none());
        assert!(backend.get(&b.hash).await.unwrap().is_some());
    }
}
