//! Connection sources
//!
//! `default` opens a fresh connection per session; `r2d2` draws sessions
//! from a bounded pool.

#![allow(clippy::result_large_err)]

use crate::db;
use crate::errors::Result;
use quarry_core::config::{ConnectionSettings, PoolProvider};
use quarry_core::errors::{ExError, ExErrorKind};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::time::Duration;

/// A connection owned by one session
pub enum SessionConnection {
    Direct(Connection),
    Pooled(PooledConnection<SqliteConnectionManager>),
}

impl Deref for SessionConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match self {
            SessionConnection::Direct(conn) => conn,
            SessionConnection::Pooled(conn) => conn,
        }
    }
}

impl DerefMut for SessionConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        match self {
            SessionConnection::Direct(conn) => conn,
            SessionConnection::Pooled(conn) => conn,
        }
    }
}

/// Where sessions get their connections from
pub enum ConnectionSource {
    Direct { path: PathBuf, busy_timeout: Duration },
    Pooled(Pool<SqliteConnectionManager>),
}

impl ConnectionSource {
    pub fn new(settings: &ConnectionSettings) -> Result<Self> {
        let path = PathBuf::from(&settings.url);
        let busy_timeout = settings.busy_timeout;
        match settings.pool {
            PoolProvider::Default => Ok(ConnectionSource::Direct { path, busy_timeout }),
            PoolProvider::R2d2 => {
                let manager = SqliteConnectionManager::file(&path).with_init(move |conn| {
                    conn.pragma_update(None, "foreign_keys", "ON")?;
                    conn.busy_timeout(busy_timeout)
                });
                let pool = Pool::builder()
                    .max_size(settings.pool_size)
                    .build(manager)
                    .map_err(|e| {
                        ExError::new(ExErrorKind::Connectivity)
                            .with_op("build_pool")
                            .with_message(e.to_string())
                    })?;
                Ok(ConnectionSource::Pooled(pool))
            }
        }
    }

    pub fn provider(&self) -> PoolProvider {
        match self {
            ConnectionSource::Direct { .. } => PoolProvider::Default,
            ConnectionSource::Pooled(_) => PoolProvider::R2d2,
        }
    }

    pub fn get(&self) -> Result<SessionConnection> {
        match self {
            ConnectionSource::Direct { path, busy_timeout } => {
                db::open(path, *busy_timeout).map(SessionConnection::Direct)
            }
            ConnectionSource::Pooled(pool) => {
                pool.get().map(SessionConnection::Pooled).map_err(|e| {
                    ExError::new(ExErrorKind::Connectivity)
                        .with_op("checkout")
                        .with_message(e.to_string())
                })
            }
        }
    }
}

impl std::fmt::Debug for ConnectionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionSource::Direct { path, .. } => {
                f.debug_struct("Direct").field("path", path).finish()
            }
            ConnectionSource::Pooled(pool) => f
                .debug_struct("Pooled")
                .field("max_size", &pool.max_size())
                .finish(),
        }
    }
}
