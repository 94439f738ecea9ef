//! The SQLite persistence engine

#![allow(clippy::result_large_err)]

use crate::db;
use crate::errors::{io_error, schema_source_error, Result};
use crate::pool::ConnectionSource;
use crate::schema_sources::{apply_schema_source, create_schema_version_table};
use crate::session::{release, ConnectionSlot, SqliteSession};
use quarry_core::config::{ConnectionSettings, Dialect, PoolProvider};
use quarry_core::engine::{EngineSession, PersistenceEngine};
use quarry_core::errors::{ExError, ExErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Engine over one SQLite database file
pub struct SqliteEngine {
    path: PathBuf,
    source: ConnectionSource,
    closed: AtomicBool,
    // Connections of sessions handed out and not yet dropped
    live: Mutex<Vec<Weak<ConnectionSlot>>>,
    // Serialises schema source application
    schema_lock: Mutex<()>,
}

impl SqliteEngine {
    /// Open the database described by `settings` and verify it answers
    ///
    /// # Errors
    ///
    /// Returns a Connectivity error if the database cannot be opened or
    /// probed.
    pub fn open(settings: &ConnectionSettings) -> Result<Self> {
        match settings.dialect {
            Dialect::Sqlite => {}
        }
        if settings.user.is_some() {
            tracing::debug!(
                component = "quarry_store",
                op = "open_engine",
                "sqlite ignores db.user and db.passwd"
            );
        }

        let path = PathBuf::from(&settings.url);
        let conn = db::open(&path, settings.busy_timeout)?;
        db::probe(&conn)?;
        db::prepare_database(&conn)?;
        create_schema_version_table(&conn)?;
        drop(conn);

        let source = ConnectionSource::new(settings)?;
        tracing::info!(
            component = "quarry_store",
            op = "open_engine",
            path = %path.display(),
            pool = ?source.provider(),
            "sqlite engine ready"
        );
        Ok(Self {
            path,
            source,
            closed: AtomicBool::new(false),
            live: Mutex::new(Vec::new()),
            schema_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool_provider(&self) -> PoolProvider {
        self.source.provider()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of sessions still holding a connection
    pub fn live_sessions(&self) -> usize {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).is_some())
            .count()
    }

    fn ensure_open(&self, op: &str) -> Result<()> {
        if self.is_closed() {
            return Err(ExError::new(ExErrorKind::NotInitialised)
                .with_op(op)
                .with_message("engine is closed"));
        }
        Ok(())
    }
}

impl PersistenceEngine for SqliteEngine {
    fn open_session(&self) -> Result<Box<dyn EngineSession>> {
        self.ensure_open("open_session")?;
        let session = SqliteSession::new(self.source.get()?);
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        // close() may have drained the list since the check above
        self.ensure_open("open_session")?;
        live.retain(|weak| weak.strong_count() > 0);
        live.push(session.slot());
        Ok(Box::new(session))
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn add_schema_source(&self, path: &Path) -> Result<()> {
        self.ensure_open("add_schema_source")?;
        let source_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| schema_source_error(&path.display().to_string(), "no usable file name"))?
            .to_string();
        let sql = std::fs::read_to_string(path).map_err(|e| io_error("add_schema_source", e))?;

        let _guard = self
            .schema_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut conn = self.source.get()?;
        let applied = apply_schema_source(&mut conn, &source_id, &sql)?;
        tracing::info!(
            component = "quarry_store",
            op = "add_schema_source",
            source_id = %source_id,
            applied,
            "schema source processed"
        );
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let slots: Vec<Arc<ConnectionSlot>> = self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .collect();
        let released = slots
            .iter()
            .filter(|slot| release(slot, "close_engine"))
            .count();
        tracing::info!(
            component = "quarry_store",
            op = "close_engine",
            path = %self.path.display(),
            released,
            "sqlite engine closed"
        );
    }
}

impl std::fmt::Debug for SqliteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteEngine")
            .field("path", &self.path)
            .field("source", &self.source)
            .field("closed", &self.is_closed())
            .finish()
    }
}
