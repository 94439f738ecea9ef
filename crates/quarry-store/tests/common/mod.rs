//! On-disk SQLite fixtures for exercising the facade end to end

#![allow(dead_code)]

use quarry_core::config::{ConnectionSettings, PropertyBag};
use quarry_core::engine::PersistenceEngine;
use quarry_core::errors::QueryError;
use quarry_core::model::{Entity, EntityMapping, Properties, Row, Value};
use quarry_core::query::{DefaultQueryInterface, NativeSqlQueryInterface, QueryInterfaceExt};
use quarry_core::session::{SessionContext, SessionManager};
use quarry_core::validation::SessionValidation;
use quarry_store::SqliteEngine;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
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

/// A database in a temp directory with the metric schema applied
pub struct Fixture {
    pub dir: TempDir,
    pub engine: Arc<SqliteEngine>,
    pub sessions: Arc<SessionManager>,
    pub validation: Arc<SessionValidation>,
    pub generic: DefaultQueryInterface,
    pub native: NativeSqlQueryInterface,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_pool("default")
    }

    pub fn with_pool(pool: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let props = PropertyBag::new()
            .with("db", "sqlite")
            .with("db.host", dir.path().to_str().unwrap())
            .with("db.schema", "quarry")
            .with("db.conpool", pool)
            .with("db.busy_timeout_ms", "5000");
        let settings = ConnectionSettings::resolve(&props).unwrap();
        let engine = Arc::new(SqliteEngine::open(&settings).unwrap());

        let schema = dir.path().join("metrics-core.sql");
        std::fs::write(&schema, METRIC_SCHEMA).unwrap();
        engine.add_schema_source(&schema).unwrap();

        let sessions = Arc::new(SessionManager::new(
            engine.clone(),
            Arc::new(AtomicBool::new(true)),
        ));
        let validation = Arc::new(SessionValidation::new(sessions.clone()));
        Self {
            generic: DefaultQueryInterface::new(validation.clone()),
            native: NativeSqlQueryInterface::new(validation.clone()),
            dir,
            engine,
            sessions,
            validation,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().join("quarry.db")
    }

    /// A context with a started session
    pub fn active(&self) -> SessionContext {
        let mut ctx = SessionContext::new();
        assert!(self.sessions.start_session(&mut ctx));
        ctx
    }

    /// Add and commit metrics in their own session
    pub fn seed(&self, mnemonics: &[&str]) -> Vec<Metric> {
        let mut ctx = self.active();
        let mut metrics: Vec<Metric> = mnemonics.iter().map(|m| Metric::new(m)).collect();
        assert!(self.generic.add_all(&mut ctx, &mut metrics));
        assert!(self.sessions.commit_session(&mut ctx));
        metrics
    }

    /// Every metric, read in a fresh session
    pub fn all_metrics(&self) -> Vec<Metric> {
        let mut ctx = self.active();
        let found = self
            .generic
            .find_by_properties::<Metric>(&mut ctx, &Properties::new(), false);
        assert!(self.sessions.rollback_session(&mut ctx));
        found
    }
}
