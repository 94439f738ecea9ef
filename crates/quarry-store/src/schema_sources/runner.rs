//! Schema source runner
//!
//! Applies each source once inside a transaction and records it in
//! `schema_version` with its checksum.

#![allow(clippy::result_large_err)]

use super::checksums::compute_checksum;
use crate::errors::{checksum_mismatch, from_rusqlite, schema_source_error, Result};
use rusqlite::{Connection, OptionalExtension};

/// A row of `schema_version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedSource {
    pub source_id: String,
    pub applied_at: i64,
    pub checksum: String,
}

/// Create the schema_version table if it doesn't exist
pub fn create_schema_version_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY,
            migration_id TEXT NOT NULL UNIQUE,
            applied_at INTEGER NOT NULL,
            checksum TEXT
        )",
        [],
    )
    .map_err(|e| from_rusqlite("create_schema_version_table", e))?;
    Ok(())
}

/// Apply `sql` under `source_id` unless already applied
///
/// Returns `true` when the source was applied by this call.
///
/// # Errors
///
/// Returns a SchemaSource error if the SQL fails, or if `source_id` was
/// applied before with different text.
pub fn apply_schema_source(conn: &mut Connection, source_id: &str, sql: &str) -> Result<bool> {
    create_schema_version_table(conn)?;
    let checksum = compute_checksum(sql);

    let recorded: Option<Option<String>> = conn
        .query_row(
            "SELECT checksum FROM schema_version WHERE migration_id = ?1",
            [source_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| from_rusqlite("apply_schema_source", e))?;

    match recorded {
        Some(Some(previous)) if previous != checksum => {
            return Err(checksum_mismatch(source_id, &previous, &checksum));
        }
        Some(_) => return Ok(false),
        None => {}
    }

    let tx = conn
        .transaction()
        .map_err(|e| from_rusqlite("apply_schema_source", e))?;

    tx.execute_batch(sql)
        .map_err(|e| schema_source_error(source_id, &e.to_string()))?;

    let now = chrono::Utc::now().timestamp();
    tx.execute(
        "INSERT INTO schema_version (migration_id, applied_at, checksum) VALUES (?1, ?2, ?3)",
        rusqlite::params![source_id, now, checksum],
    )
    .map_err(|e| from_rusqlite("apply_schema_source", e))?;

    tx.commit()
        .map_err(|e| from_rusqlite("apply_schema_source", e))?;

    Ok(true)
}

/// Applied sources in application order
pub fn applied_sources(conn: &Connection) -> Result<Vec<AppliedSource>> {
    create_schema_version_table(conn)?;
    let mut stmt = conn
        .prepare("SELECT migration_id, applied_at, COALESCE(checksum, '') FROM schema_version ORDER BY id")
        .map_err(|e| from_rusqlite("applied_sources", e))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(AppliedSource {
                source_id: row.get(0)?,
                applied_at: row.get(1)?,
                checksum: row.get(2)?,
            })
        })
        .map_err(|e| from_rusqlite("applied_sources", e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| from_rusqlite("applied_sources", e))?;
    Ok(rows)
}
