//! Service fixtures over temp directories

#![allow(dead_code)]

use quarry_core::config::PropertyBag;
use quarry_core::errors::QueryError;
use quarry_core::model::{Entity, EntityMapping, Row, Value};
use std::fs;
use tempfile::TempDir;

pub const METRIC_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS metric (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    mnemonic TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL
);";

#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub id: Option<i64>,
    pub mnemonic: String,
    pub description: String,
}

pub static METRIC: EntityMapping = EntityMapping {
    entity: "Metric",
    table: "metric",
    id_column: "id",
    columns: &["mnemonic", "description"],
};

impl Metric {
    pub fn new(mnemonic: &str) -> Self {
        Self {
            id: None,
            mnemonic: mnemonic.to_string(),
            description: format!("{} metric", mnemonic),
        }
    }
}

impl Entity for Metric {
    fn mapping() -> &'static EntityMapping {
        &METRIC
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            self.mnemonic.clone().into(),
            self.description.clone().into(),
        ]
    }

    fn from_row(row: &Row) -> Result<Self, QueryError> {
        Ok(Self {
            id: row.try_get("id")?,
            mnemonic: row.try_get("mnemonic")?,
            description: row.try_get("description")?,
        })
    }
}

/// A database directory plus an extension directory holding the metric
/// schema source
pub struct Workspace {
    pub db_dir: TempDir,
    pub ext_dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let db_dir = tempfile::tempdir().unwrap();
        let ext_dir = tempfile::tempdir().unwrap();
        fs::write(ext_dir.path().join("metrics-core.sql"), METRIC_SCHEMA).unwrap();
        Self { db_dir, ext_dir }
    }

    pub fn props(&self) -> PropertyBag {
        PropertyBag::new()
            .with("db", "sqlite")
            .with("db.host", self.db_dir.path().to_str().unwrap())
            .with("db.schema", "quarry")
            .with("db.schema.dirs", self.ext_dir.path().to_str().unwrap())
    }

    pub fn add_extension(&self, name: &str, sql: &str) {
        fs::write(self.ext_dir.path().join(name), sql).unwrap();
    }
}
