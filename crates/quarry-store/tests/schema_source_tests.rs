// Tests for extension schema sources: discovery, one-time application and
// edit detection

mod common;

use common::{Fixture, METRIC_SCHEMA};
use quarry_core::engine::PersistenceEngine;
use quarry_core::errors::ExErrorKind;
use quarry_core::model::Value;
use quarry_core::query::{DynamicQueryExt, DynamicQueryInterface, Params};
use quarry_store::discover_schema_sources;
use quarry_store::schema_sources::applied_sources;
use std::fs;

const LATENCY_SCHEMA: &str =
    "CREATE TABLE latency (id INTEGER PRIMARY KEY AUTOINCREMENT, millis REAL NOT NULL);";

#[test]
fn test_schema_source_is_applied_once() {
    // Given: An engine with the core schema source applied at setup
    let fx = Fixture::new();
    let path = fx.dir.path().join("metrics-core.sql");

    // When: The same source is added again
    fx.engine.add_schema_source(&path).unwrap();

    // Then: It is recorded exactly once
    let conn = rusqlite_conn(&fx);
    let applied = applied_sources(&conn).unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].source_id, "metrics-core");
}

#[test]
fn test_edited_schema_source_is_rejected() {
    let fx = Fixture::new();
    let path = fx.dir.path().join("metrics-core.sql");
    fs::write(&path, format!("{}\n-- edited", METRIC_SCHEMA)).unwrap();

    let err = fx.engine.add_schema_source(&path).unwrap_err();

    assert_eq!(err.kind(), ExErrorKind::SchemaSource);
}

#[test]
fn test_added_source_tables_are_queryable() {
    let fx = Fixture::new();
    let path = fx.dir.path().join("metrics-latency.sql");
    fs::write(&path, LATENCY_SCHEMA).unwrap();
    fx.engine.add_schema_source(&path).unwrap();

    let mut ctx = fx.active();
    let mut p = Params::new();
    p.insert("ms".to_string(), Value::Real(12.5));
    fx.generic
        .execute_update(&mut ctx, "insert into latency (millis) values (:ms)", &p)
        .unwrap();
    let rows = fx
        .generic
        .do_query(&mut ctx, "from latency as l", &Params::new())
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("millis"), Some(&Value::Real(12.5)));
}

#[test]
fn test_missing_schema_source_file_is_io_error() {
    let fx = Fixture::new();

    let err = fx
        .engine
        .add_schema_source(&fx.dir.path().join("metrics-absent.sql"))
        .unwrap_err();

    assert_eq!(err.kind(), ExErrorKind::Io);
}

#[test]
fn test_discovery_skips_duplicates_and_other_files() {
    // Given: Two extension directories sharing a file name
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    fs::write(first.path().join("metrics-a.sql"), LATENCY_SCHEMA).unwrap();
    fs::write(second.path().join("metrics-a.sql"), "-- shadowed").unwrap();
    fs::write(second.path().join("metrics-b.sql"), "-- b").unwrap();
    fs::write(second.path().join("notes.sql"), "-- not a metric source").unwrap();
    fs::write(second.path().join("metrics-c.txt"), "-- wrong extension").unwrap();

    // When: Both are scanned in order
    let found = discover_schema_sources(&[first.path().to_path_buf(), second.path().to_path_buf()]);

    // Then: The first occurrence wins and unrelated files are ignored
    assert_eq!(
        found,
        vec![
            first.path().join("metrics-a.sql"),
            second.path().join("metrics-b.sql"),
        ]
    );
}

fn rusqlite_conn(fx: &Fixture) -> rusqlite::Connection {
    rusqlite::Connection::open(fx.path()).unwrap()
}
