//! Database connection management
//!
//! Opening, configuring and probing SQLite connections, plus the
//! bookkeeping tables every quarry database carries.

#![allow(clippy::result_large_err)]

use crate::errors::{from_rusqlite, Result};
use quarry_core::errors::{ExError, ExErrorKind};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Table holding one row per lock target; writing a row takes the
/// database's reserved lock for the rest of the transaction
pub const LOCK_TABLE: &str = "quarry_lock";

/// Open a SQLite database at the given path
pub fn open<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(path.as_ref()).map_err(|e| {
        ExError::new(ExErrorKind::Connectivity)
            .with_op("open")
            .with_message(format!("cannot open {}: {}", path.as_ref().display(), e))
    })?;
    configure(&conn, busy_timeout)?;
    Ok(conn)
}

/// Open an in-memory SQLite database (for testing)
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().map_err(|e| from_rusqlite("open", e))?;
    configure(&conn, Duration::ZERO)?;
    Ok(conn)
}

/// Per-connection settings
pub fn configure(conn: &Connection, busy_timeout: Duration) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| from_rusqlite("configure", e))?;
    conn.busy_timeout(busy_timeout)
        .map_err(|e| from_rusqlite("configure", e))?;
    Ok(())
}

/// Database-wide settings, applied once when the engine opens
pub fn prepare_database(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| from_rusqlite("prepare_database", e))?;
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
            name TEXT PRIMARY KEY,
            holder TEXT NOT NULL
        )",
        LOCK_TABLE
    ))
    .map_err(|e| from_rusqlite("prepare_database", e))?;
    Ok(())
}

/// Round-trip a trivial statement to prove the connection works
pub fn probe(conn: &Connection) -> Result<()> {
    let one: i64 = conn
        .query_row("SELECT 1", [], |row| row.get(0))
        .map_err(|e| {
            ExError::new(ExErrorKind::Connectivity)
                .with_op("probe")
                .with_message(e.to_string())
        })?;
    if one != 1 {
        return Err(ExError::new(ExErrorKind::Connectivity)
            .with_op("probe")
            .with_message("unexpected probe result"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_enables_foreign_keys() {
        let conn = open_in_memory().unwrap();
        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
        probe(&conn).unwrap();
    }

    #[test]
    fn test_prepare_database_creates_lock_table() {
        let conn = open_in_memory().unwrap();
        prepare_database(&conn).unwrap();
        prepare_database(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                [LOCK_TABLE],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_open_missing_directory_is_connectivity_error() {
        let err = open("/nonexistent-quarry-dir/x/db.sqlite", Duration::ZERO).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::Connectivity);
    }
}
