//! Persistence engine contract
//!
//! The facade never talks to a database directly. It drives a
//! [`PersistenceEngine`] that opens [`EngineSession`]s; every session call
//! returns an [`EngineResult`], whose error side tells the caller whether
//! the failure was a query-shape problem (recoverable) or an engine-level
//! failure that must end the session (fatal).

use crate::config::Dialect;
use crate::errors::{ExError, QueryError};
use crate::model::{EntityKey, EntityMapping, Row, Value};
use crate::query::Page;
use std::path::Path;
use thiserror::Error;

/// Failure side of an engine call
#[derive(Error, Debug, Clone)]
pub enum EngineFailure {
    /// The query text or parameters were rejected; the engine is healthy
    #[error(transparent)]
    Recoverable(#[from] QueryError),
    /// Connectivity, constraint, locking or I/O failure
    #[error(transparent)]
    Fatal(#[from] ExError),
}

impl EngineFailure {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineFailure::Recoverable(_))
    }
}

impl From<EngineFailure> for ExError {
    fn from(failure: EngineFailure) -> Self {
        match failure {
            EngineFailure::Recoverable(q) => q.into(),
            EngineFailure::Fatal(ex) => ex,
        }
    }
}

/// Success, recoverable failure, or fatal failure
pub type EngineResult<T> = std::result::Result<T, EngineFailure>;

/// Row-lock request for a read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    #[default]
    None,
    /// Write-intent lock held until the transaction ends
    PessimisticWrite,
}

/// A validated query ready for the engine
///
/// `sql` uses `:name` placeholders; every placeholder has exactly one
/// entry in `params`.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedQuery {
    pub sql: String,
    pub params: Vec<(String, Value)>,
    pub page: Option<Page>,
}

impl PreparedQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            page: None,
        }
    }
}

/// A process-wide engine handle
pub trait PersistenceEngine: Send + Sync {
    /// Open a new session with no transaction started
    ///
    /// # Errors
    ///
    /// Returns an engine-category error if no connection can be obtained.
    fn open_session(&self) -> Result<Box<dyn EngineSession>, ExError>;

    fn dialect(&self) -> Dialect;

    /// Fold an extension schema source into the engine's schema
    ///
    /// # Errors
    ///
    /// Returns a SchemaSource error if the source cannot be read or applied.
    fn add_schema_source(&self, path: &Path) -> Result<(), ExError>;

    /// Release all engine resources; later `open_session` calls fail
    fn close(&self);
}

/// One unit of work: a connection, a transaction and a cache of loaded
/// entity states
pub trait EngineSession: Send {
    fn begin(&mut self) -> EngineResult<()>;

    /// Whether the session's transaction is open
    fn is_active(&mut self) -> EngineResult<bool>;

    fn commit(&mut self) -> EngineResult<()>;

    fn rollback(&mut self) -> EngineResult<()>;

    /// Push pending writes to the store without ending the transaction
    fn flush(&mut self) -> EngineResult<()>;

    /// Detach every tracked entity state
    fn clear(&mut self);

    /// Release the connection; an open transaction is abandoned
    fn close(&mut self);

    /// Whether `key` is tracked with exactly `state` as its column values
    fn contains(&self, key: &EntityKey, state: &[Value]) -> bool;

    fn get(
        &mut self,
        mapping: &'static EntityMapping,
        id: i64,
        lock: LockMode,
    ) -> EngineResult<Option<Row>>;

    /// Insert a new row and return its id
    fn save(&mut self, mapping: &'static EntityMapping, values: &[Value]) -> EngineResult<i64>;

    fn delete(&mut self, mapping: &'static EntityMapping, id: i64) -> EngineResult<()>;

    /// Track `values` as the state of `id` (or a new instance), to be
    /// written on the next flush; returns the tracked id
    fn merge(
        &mut self,
        mapping: &'static EntityMapping,
        id: Option<i64>,
        values: &[Value],
    ) -> EngineResult<i64>;

    fn list(&mut self, query: &PreparedQuery) -> EngineResult<Vec<Row>>;

    fn execute_update(&mut self, query: &PreparedQuery) -> EngineResult<usize>;

    /// Take a write-intent lock covering `table` for the rest of the
    /// transaction
    fn acquire_lock(&mut self, table: &str) -> EngineResult<()>;
}
