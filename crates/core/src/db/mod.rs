//! SQLite connection management shared by the dedup cache backend and the
//! offline store.
//!
//! Opening a database applies the performance pragmas (WAL mode) and runs the
//! caller's migration set before handing the connection back.

pub mod migrations;

use crate::Error;
use std::path::Path;
use tokio_rusqlite::Connection;

pub use migrations::Migration;

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA foreign_keys=ON;";

/// Open a database at the specified path and apply `migrations`.
///
/// Creates the file if it doesn't exist.
pub async fn open(path: impl AsRef<Path>, migrations: &'static [Migration]) -> Result<Connection, Error> {
    let conn = Connection::open(path).await.map_err(|e| Error::Database(e.into()))?;
    prepare(&conn, migrations).await?;
    Ok(conn)
}

/// Open an in-memory database with the same pragmas and migrations.
pub async fn open_in_memory(migrations: &'static [Migration]) -> Result<Connection, Error> {
    let conn = Connection::open_in_memory()
        .await
        .map_err(|e| Error::Database(e.into()))?;
    prepare(&conn, migrations).await?;
    Ok(conn)
}

async fn prepare(conn: &Connection, migrations: &'static [Migration]) -> Result<(), Error> {
    conn.call(|conn| {
        conn.execute_batch(PRAGMAS)?;
        Ok(())
    })
    .await
    .map_err(Error::Database)?;

    migrations::run(conn, migrations).await
}
