//! quarry store - the bundled SQLite persistence engine
//!
//! Provides:
//! - The `PersistenceEngine` contract from quarry-core on top of rusqlite
//! - A connection per session, or sessions drawn from an r2d2 pool
//! - Extension schema sources with checksummed bookkeeping

pub mod db;
pub mod engine;
pub mod errors;
pub mod pool;
pub mod schema_sources;
pub mod session;

// Re-export key types
pub use engine::SqliteEngine;
pub use errors::Result;
pub use schema_sources::discover_schema_sources;
pub use session::SqliteSession;
