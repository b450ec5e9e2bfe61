//! Database schema migrations.
//!
//! Uses a simple version table approach to track applied migrations.
//! Each store owns its own ordered list of SQL batches.

use crate::Error;
use tokio_rusqlite::{Connection, params};

/// A single schema step: (version, SQL).
///
/// Versions must be strictly increasing within a set. All SQL is written to
/// be idempotent using `CREATE ... IF NOT EXISTS`.
pub type Migration = (i64, &'static str);

/// Schema of the shared dedup cache backend.
pub const DEDUP_CACHE: &[Migration] = &[(1, include_str!("../../migrations/001_dedup_cache.sql"))];

/// Schema of the offline chapter store.
pub const OFFLINE_STORE: &[Migration] = &[
    (1, include_str!("../../migrations/001_offline_chapters.sql")),
    (2, include_str!("../../migrations/002_offline_images.sql")),
];

/// Run any pending migrations from `migrations`.
///
/// This creates the `_migrations` table if it doesn't exist, checks the
/// current version, and applies any migrations that haven't been run yet.
///
/// # Errors
///
/// Returns an error if a migration SQL fails to execute.
pub async fn run(conn: &Connection, migrations: &'static [Migration]) -> Result<(), Error> {
    conn.call(move |conn| -> Result<(), Error> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current: i64 = conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| {
            row.get(0)
        })?;

        for (version, sql) in migrations {
            if *version > current {
                conn.execute_batch(sql)
                    .map_err(|e| Error::MigrationFailed(format!("version {version}: {e}")))?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
                    params![*version, chrono::Utc::now().to_rfc3339()],
                )?;
            }
        }

        Ok(())
    })
    .await
    .map_err(Error::from)
}
