//! Durable storage for chapters downloaded for offline reading.
//!
//! Two collections live in one SQLite database:
//!
//! - `chapters`, keyed by the manga URL + chapter URL composite, indexed by manga URL
//! - `images`, keyed by original image URL, indexed by owning chapter id
//!
//! Images are not tied to chapters by a foreign key. Deleting a chapter
//! removes its record first and then every image carrying its id, inside
//! one transaction.

pub mod records;

pub use records::{ChapterRecord, ImageBlobRecord, PageError, StorageUsage, chapter_id, cover_owner_id, percentage};

use crate::Error;
use crate::db;
use chrono::{DateTime, Utc};
use std::path::Path;
use tokio_rusqlite::{Connection, params, rusqlite};

const CHAPTER_COLUMNS: &str = "id, manga_url, manga_title, chapter_url, chapter_title, chapter_index, source,
     pages_json, downloaded_json, errors_json, cover_url, download_date, size";

/// Offline chapter store handle.
#[derive(Clone, Debug)]
pub struct OfflineStore {
    conn: Connection,
}

/// Raw chapter row before JSON columns are decoded.
struct ChapterRow {
    id: String,
    manga_url: String,
    manga_title: String,
    chapter_url: String,
    chapter_title: String,
    chapter_index: f64,
    source: String,
    pages_json: String,
    downloaded_json: String,
    errors_json: String,
    cover_url: Option<String>,
    download_date: String,
    size: i64,
}

impl ChapterRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            manga_url: row.get(1)?,
            manga_title: row.get(2)?,
            chapter_url: row.get(3)?,
            chapter_title: row.get(4)?,
            chapter_index: row.get(5)?,
            source: row.get(6)?,
            pages_json: row.get(7)?,
            downloaded_json: row.get(8)?,
            errors_json: row.get(9)?,
            cover_url: row.get(10)?,
            download_date: row.get(11)?,
            size: row.get(12)?,
        })
    }

    fn decode(self) -> Result<ChapterRecord, Error> {
        let download_date = DateTime::parse_from_rfc3339(&self.download_date)
            .map_err(|e| Error::Serialization(format!("download_date: {e}")))?
            .with_timezone(&Utc);

        Ok(ChapterRecord {
            id: self.id,
            manga_url: self.manga_url,
            manga_title: self.manga_title,
            chapter_url: self.chapter_url,
            chapter_title: self.chapter_title,
            chapter_index: self.chapter_index,
            source: self.source,
            pages: serde_json::from_str(&self.pages_json)?,
            downloaded_images: serde_json::from_str(&self.downloaded_json)?,
            errors: serde_json::from_str(&self.errors_json)?,
            cover_url: self.cover_url,
            download_date,
            size: self.size.max(0) as usize,
        })
    }
}

impl OfflineStore {
    /// Open the store at `path`, creating and migrating it as needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let conn = db::open(path, db::migrations::OFFLINE_STORE).await?;
        Ok(Self { conn })
    }

    /// Open an in-memory store for testing.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = db::open_in_memory(db::migrations::OFFLINE_STORE).await?;
        Ok(Self { conn })
    }

    /// Cap the database at `max_pages` SQLite pages.
    ///
    /// SQLite never shrinks the cap below the pages already in use; the
    /// effective cap is returned. Writes past it fail with
    /// [`Error::StorageFull`].
    pub async fn limit_pages(&self, max_pages: u64) -> Result<u64, Error> {
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let effective: i64 =
                    conn.pragma_update_and_check(None, "max_page_count", max_pages as i64, |row| row.get(0))?;
                Ok(effective.max(0) as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Get a chapter record by id.
    pub async fn get_chapter(&self, id: &str) -> Result<Option<ChapterRecord>, Error> {
        let id = id.to_string();
        let row = self
            .conn
            .call(move |conn| -> Result<Option<ChapterRow>, Error> {
                let sql = format!("SELECT {CHAPTER_COLUMNS} FROM chapters WHERE id = ?1");
                match conn.query_row(&sql, params![id], ChapterRow::from_row) {
                    Ok(row) => Ok(Some(row)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)?;

        row.map(ChapterRow::decode).transpose()
    }

    /// True when a record exists and every page of it was stored.
    pub async fn is_fully_downloaded(&self, id: &str) -> Result<bool, Error> {
        Ok(self.get_chapter(id).await?.is_some_and(|c| c.is_complete()))
    }

    /// List stored chapters, optionally only those of one manga.
    pub async fn list_chapters(&self, manga_url: Option<&str>) -> Result<Vec<ChapterRecord>, Error> {
        let manga_url = manga_url.map(str::to_string);
        let rows = self
            .conn
            .call(move |conn| -> Result<Vec<ChapterRow>, Error> {
                let rows = match manga_url {
                    Some(manga_url) => {
                        let sql = format!(
                            "SELECT {CHAPTER_COLUMNS} FROM chapters WHERE manga_url = ?1 ORDER BY chapter_index ASC"
                        );
                        let mut stmt = conn.prepare(&sql)?;
                        stmt.query_map(params![manga_url], ChapterRow::from_row)?
                            .collect::<Result<Vec<_>, _>>()?
                    }
                    None => {
                        let sql =
                            format!("SELECT {CHAPTER_COLUMNS} FROM chapters ORDER BY manga_url ASC, chapter_index ASC");
                        let mut stmt = conn.prepare(&sql)?;
                        stmt.query_map([], ChapterRow::from_row)?
                            .collect::<Result<Vec<_>, _>>()?
                    }
                };
                Ok(rows)
            })
            .await
            .map_err(Error::from)?;

        rows.into_iter().map(ChapterRow::decode).collect()
    }

    /// Insert or replace a chapter record in a single statement.
    pub async fn save_chapter(&self, chapter: &ChapterRecord) -> Result<(), Error> {
        let pages_json = serde_json::to_string(&chapter.pages)?;
        let downloaded_json = serde_json::to_string(&chapter.downloaded_images)?;
        let errors_json = serde_json::to_string(&chapter.errors)?;
        let chapter = chapter.clone();

        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO chapters (
                        id, manga_url, manga_title, chapter_url, chapter_title, chapter_index, source,
                        pages_json, downloaded_json, errors_json, cover_url, download_date, size
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                    ON CONFLICT(id) DO UPDATE SET
                        manga_title = excluded.manga_title,
                        chapter_title = excluded.chapter_title,
                        chapter_index = excluded.chapter_index,
                        source = excluded.source,
                        pages_json = excluded.pages_json,
                        downloaded_json = excluded.downloaded_json,
                        errors_json = excluded.errors_json,
                        cover_url = excluded.cover_url,
                        download_date = excluded.download_date,
                        size = excluded.size",
                    params![
                        &chapter.id,
                        &chapter.manga_url,
                        &chapter.manga_title,
                        &chapter.chapter_url,
                        &chapter.chapter_title,
                        chapter.chapter_index,
                        &chapter.source,
                        pages_json,
                        downloaded_json,
                        errors_json,
                        &chapter.cover_url,
                        chapter.download_date.to_rfc3339(),
                        chapter.size as i64,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Store one image blob, replacing any blob with the same URL.
    ///
    /// A full disk surfaces as [`Error::StorageFull`].
    pub async fn put_image(&self, image: ImageBlobRecord) -> Result<(), Error> {
        let stored_at = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO images (url, blob, chapter_id, content_type, size_bytes, stored_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(url) DO UPDATE SET
                        blob = excluded.blob,
                        chapter_id = excluded.chapter_id,
                        content_type = excluded.content_type,
                        size_bytes = excluded.size_bytes,
                        stored_at = excluded.stored_at",
                    params![
                        &image.url,
                        &image.blob,
                        &image.chapter_id,
                        &image.content_type,
                        image.blob.len() as i64,
                        stored_at,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Get one image blob by its original URL.
    pub async fn get_image(&self, url: &str) -> Result<Option<ImageBlobRecord>, Error> {
        let url = url.to_string();
        self.conn
            .call(move |conn| -> Result<Option<ImageBlobRecord>, Error> {
                let result = conn.query_row(
                    "SELECT url, blob, chapter_id, content_type FROM images WHERE url = ?1",
                    params![url],
                    |row| {
                        Ok(ImageBlobRecord {
                            url: row.get(0)?,
                            blob: row.get(1)?,
                            chapter_id: row.get(2)?,
                            content_type: row.get(3)?,
                        })
                    },
                );

                match result {
                    Ok(image) => Ok(Some(image)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Number of images stored under `chapter_id`.
    pub async fn count_images(&self, chapter_id: &str) -> Result<u64, Error> {
        let chapter_id = chapter_id.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM images WHERE chapter_id = ?1", params![chapter_id], |row| {
                        row.get(0)
                    })?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Load the stored pages of a chapter, in reading order.
    ///
    /// Pages listed in the record but missing from the image collection are
    /// skipped. If none can be read the chapter is reported corrupted rather
    /// than returned empty.
    pub async fn read_chapter(&self, id: &str) -> Result<Vec<ImageBlobRecord>, Error> {
        let chapter = self
            .get_chapter(id)
            .await?
            .ok_or_else(|| Error::ChapterNotFound(id.to_string()))?;

        let mut pages = Vec::with_capacity(chapter.downloaded_images.len());
        for url in &chapter.downloaded_images {
            match self.get_image(url).await? {
                Some(image) => pages.push(image),
                None => tracing::warn!(chapter = %id, url = %url, "stored page missing from image collection"),
            }
        }

        if pages.is_empty() {
            return Err(Error::ChapterCorrupted(format!(
                "{id}: none of {} recorded pages are readable",
                chapter.downloaded_images.len()
            )));
        }

        Ok(pages)
    }

    /// Delete a chapter record, then every image it owns.
    ///
    /// Returns the number of images removed.
    pub async fn delete_chapter(&self, id: &str) -> Result<u64, Error> {
        let id_owned = id.to_string();
        let (chapters, images) = self
            .conn
            .call(move |conn| -> Result<(usize, usize), Error> {
                let tx = conn.transaction()?;
                let chapters = tx.execute("DELETE FROM chapters WHERE id = ?1", params![&id_owned])?;
                let images = tx.execute("DELETE FROM images WHERE chapter_id = ?1", params![&id_owned])?;
                tx.commit()?;
                Ok((chapters, images))
            })
            .await
            .map_err(Error::from)?;

        if chapters == 0 && images == 0 {
            return Err(Error::ChapterNotFound(id.to_string()));
        }

        tracing::info!(chapter = %id, images, "deleted offline chapter");
        Ok(images as u64)
    }

    /// Delete every chapter of a manga, cascading to their images and the
    /// manga's cover.
    ///
    /// Returns `(chapters, images)` removed.
    pub async fn delete_manga(&self, manga_url: &str) -> Result<(u64, u64), Error> {
        let mut chapters = 0u64;
        let mut images = 0u64;
        for chapter in self.list_chapters(Some(manga_url)).await? {
            images += self.delete_chapter(&chapter.id).await?;
            chapters += 1;
        }

        let owner = cover_owner_id(manga_url);
        let covers = self
            .conn
            .call(move |conn| -> Result<usize, Error> {
                Ok(conn.execute("DELETE FROM images WHERE chapter_id = ?1", params![owner])?)
            })
            .await
            .map_err(Error::from)?;

        Ok((chapters, images + covers as u64))
    }

    /// Totals across the whole store.
    pub async fn usage(&self) -> Result<StorageUsage, Error> {
        self.conn
            .call(|conn| -> Result<StorageUsage, Error> {
                let chapters: i64 = conn.query_row("SELECT COUNT(*) FROM chapters", [], |row| row.get(0))?;
                let (images, bytes): (i64, i64) = conn.query_row(
                    "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM images",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                Ok(StorageUsage { chapters: chapters as u64, images: images as u64, bytes: bytes as u64 })
            })
            .await
            .map_err(Error::from)
    }
}
