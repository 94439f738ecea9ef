//! quarry core - session and query facade over a persistence engine
//!
//! This crate provides:
//! - Explicit per-worker sessions with start/commit/rollback/flush/attach
//! - A validation guard that logs failure chains and ends broken sessions
//! - Generic entity queries, a dynamic query language with locking and
//!   paging, and native SQL with an automatic session
//! - A registry mapping capability types to lazily built implementations
//! - The persistence engine contract the facade drives
//!
//! Only query-shape errors (`QueryError`) are returned to callers. Every
//! other failure is logged and reported as `false`, `None` or an empty
//! result.

pub mod config;
pub mod engine;
pub mod errors;
pub mod logging_facility;
pub mod model;
pub mod query;
pub mod registry;
pub mod session;
pub mod validation;

pub use quarry_core_types as types;

// Re-export commonly used types
pub use config::{ConnectionSettings, Dialect, PoolProvider, PropertyBag};
pub use engine::{EngineFailure, EngineResult, EngineSession, LockMode, PersistenceEngine, PreparedQuery};
pub use errors::{ErrorCategory, ExError, ExErrorKind, QueryError, Result};
pub use model::{Entity, EntityKey, EntityMapping, Properties, Record, Row, Value};
pub use query::{
    DefaultQueryInterface, DynamicQuery, DynamicQueryExt, DynamicQueryInterface,
    NativeSqlQueryInterface, Page, Params, QueryInterface, QueryInterfaceExt, SqlQueryInterface,
};
pub use registry::{FactoryContext, QueryInterfaceRegistry};
pub use session::{SessionContext, SessionManager, SessionState};
pub use validation::SessionValidation;
