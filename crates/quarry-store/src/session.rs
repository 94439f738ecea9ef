//! SQLite engine sessions
//!
//! A session owns one connection, drives its transaction with explicit
//! `BEGIN DEFERRED`/`COMMIT`/`ROLLBACK`, and keeps an identity map of the
//! entity states it has loaded or written. Merged states are queued and
//! written on flush, on commit, and before any query runs.
//!
//! Before its first write (or locked read) a transaction is restarted as
//! `BEGIN IMMEDIATE`. Nothing has been written at that point, so only the
//! read snapshot is dropped, and the restart waits on the busy timeout for
//! other writers instead of failing on a stale snapshot.
//!
//! The connection lives in a [`ConnectionSlot`] shared with the engine, so
//! closing the engine can release sessions still held by workers.

use crate::db::LOCK_TABLE;
use crate::errors::{classify, from_rusqlite, session_closed, Phase};
use crate::pool::SessionConnection;
use quarry_core::engine::{EngineResult, EngineSession, LockMode, PreparedQuery};
use quarry_core::model::{EntityKey, EntityMapping, Row, Value};
use rusqlite::types::{ToSql, Value as SqlValue, ValueRef};
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// The connection of one session; emptied when the session is released
pub(crate) type ConnectionSlot = Mutex<Option<SessionConnection>>;

fn lock_slot(slot: &ConnectionSlot) -> MutexGuard<'_, Option<SessionConnection>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Take the connection out of `slot`, rolling back any open transaction
///
/// Returns whether a connection was released.
pub(crate) fn release(slot: &ConnectionSlot, op: &str) -> bool {
    let Some(conn) = lock_slot(slot).take() else {
        return false;
    };
    if !conn.is_autocommit() {
        if let Err(e) = conn.execute_batch("ROLLBACK") {
            tracing::warn!(
                component = "quarry_store",
                op,
                error = %e,
                "rollback on release failed"
            );
        }
    }
    true
}

/// A merged state waiting for the next flush
#[derive(Debug)]
struct PendingWrite {
    mapping: &'static EntityMapping,
    id: i64,
    values: Vec<Value>,
}

pub struct SqliteSession {
    slot: Arc<ConnectionSlot>,
    holder: String,
    // The open transaction holds the write lock
    writer: bool,
    tracked: HashMap<EntityKey, Vec<Value>>,
    pending: Vec<PendingWrite>,
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Real(r) => SqlValue::Real(*r),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Blob(b) => SqlValue::Blob(b.clone()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(r) => Value::Real(r),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

fn read_row(row: &rusqlite::Row<'_>, width: usize) -> rusqlite::Result<Vec<Value>> {
    (0..width).map(|i| row.get_ref(i).map(from_sql)).collect()
}

fn column_list(mapping: &EntityMapping) -> String {
    mapping
        .columns
        .iter()
        .map(|c| quote(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Insert a row, optionally with an explicit id
fn insert(
    conn: &Connection,
    mapping: &EntityMapping,
    id: Option<i64>,
    values: &[Value],
) -> EngineResult<i64> {
    let mut columns: Vec<String> = Vec::with_capacity(values.len() + 1);
    let mut bound: Vec<SqlValue> = Vec::with_capacity(values.len() + 1);
    if let Some(id) = id {
        columns.push(quote(mapping.id_column));
        bound.push(SqlValue::Integer(id));
    }
    columns.extend(mapping.columns.iter().map(|c| quote(c)));
    bound.extend(values.iter().map(to_sql));

    let marks = (1..=bound.len()).map(|i| format!("?{}", i)).collect::<Vec<_>>();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(mapping.table),
        columns.join(", "),
        marks.join(", ")
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| classify("save", Phase::Prepare, e))?;
    stmt.execute(rusqlite::params_from_iter(bound.iter()))
        .map_err(|e| classify("save", Phase::Step, e))?;
    Ok(id.unwrap_or_else(|| conn.last_insert_rowid()))
}

/// Update a row in place; returns the number of rows changed
fn update(conn: &Connection, mapping: &EntityMapping, id: i64, values: &[Value]) -> EngineResult<usize> {
    let assignments = mapping
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ?{}", quote(c), i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        quote(mapping.table),
        assignments,
        quote(mapping.id_column),
        mapping.columns.len() + 1
    );
    let mut bound: Vec<SqlValue> = values.iter().map(to_sql).collect();
    bound.push(SqlValue::Integer(id));
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| classify("flush", Phase::Prepare, e))?;
    stmt.execute(rusqlite::params_from_iter(bound.iter()))
        .map_err(|e| classify("flush", Phase::Step, e))
}

/// Bound values for a prepared query, as `(":name", value)` pairs
fn named_params(query: &PreparedQuery) -> Vec<(String, SqlValue)> {
    query
        .params
        .iter()
        .map(|(name, value)| (format!(":{}", name), to_sql(value)))
        .collect()
}

fn paged_sql(query: &PreparedQuery) -> String {
    match query.page {
        Some(page) => format!(
            "SELECT * FROM ({}) LIMIT {} OFFSET {}",
            query.sql, page.limit, page.offset
        ),
        None => query.sql.clone(),
    }
}

impl SqliteSession {
    pub(crate) fn new(conn: SessionConnection) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(conn))),
            holder: uuid::Uuid::now_v7().to_string(),
            writer: false,
            tracked: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// Handle the engine keeps to release this session on close
    pub(crate) fn slot(&self) -> Weak<ConnectionSlot> {
        Arc::downgrade(&self.slot)
    }

    fn with_conn<R>(
        &self,
        op: &str,
        f: impl FnOnce(&Connection) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let guard = lock_slot(&self.slot);
        let conn = guard.as_deref().ok_or_else(|| session_closed(op))?;
        f(conn)
    }

    fn batch(&self, op: &str, sql: &str) -> EngineResult<()> {
        self.with_conn(op, |conn| {
            conn.execute_batch(sql)
                .map_err(|e| from_rusqlite(op, e).into())
        })
    }

    /// Restart the open transaction as a writer ahead of its first write
    fn ensure_writer(&mut self, op: &str) -> EngineResult<()> {
        if self.writer {
            return Ok(());
        }
        self.writer = self.with_conn(op, |conn| {
            if conn.is_autocommit() {
                return Ok(false);
            }
            conn.execute_batch("ROLLBACK; BEGIN IMMEDIATE")
                .map_err(|e| from_rusqlite(op, e))?;
            Ok(true)
        })?;
        if self.writer {
            tracing::trace!(
                component = "quarry_store",
                op,
                "transaction restarted as writer"
            );
        }
        Ok(())
    }

    /// Write every queued merge
    fn flush_pending(&mut self, op: &str) -> EngineResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.ensure_writer(op)?;
        let pending = std::mem::take(&mut self.pending);
        self.with_conn(op, |conn| {
            for write in &pending {
                if update(conn, write.mapping, write.id, &write.values)? == 0 {
                    insert(conn, write.mapping, Some(write.id), &write.values)?;
                }
            }
            Ok(())
        })?;
        tracing::trace!(
            component = "quarry_store",
            op,
            writes = pending.len(),
            "flushed pending writes"
        );
        Ok(())
    }

    fn forget(&mut self, key: &EntityKey) {
        self.tracked.remove(key);
        self.pending
            .retain(|w| w.mapping.table != key.table || w.id != key.id);
    }
}

impl EngineSession for SqliteSession {
    fn begin(&mut self) -> EngineResult<()> {
        self.writer = false;
        self.batch("begin", "BEGIN DEFERRED")
    }

    fn is_active(&mut self) -> EngineResult<bool> {
        Ok(lock_slot(&self.slot)
            .as_deref()
            .is_some_and(|conn| !conn.is_autocommit()))
    }

    fn commit(&mut self) -> EngineResult<()> {
        self.flush_pending("commit")?;
        self.batch("commit", "COMMIT")?;
        self.writer = false;
        self.tracked.clear();
        Ok(())
    }

    fn rollback(&mut self) -> EngineResult<()> {
        self.pending.clear();
        self.tracked.clear();
        self.writer = false;
        self.with_conn("rollback", |conn| {
            // SQLite may already have rolled back on its own after some errors
            if conn.is_autocommit() {
                return Ok(());
            }
            conn.execute_batch("ROLLBACK")
                .map_err(|e| from_rusqlite("rollback", e).into())
        })
    }

    fn flush(&mut self) -> EngineResult<()> {
        self.flush_pending("flush")
    }

    fn clear(&mut self) {
        self.pending.clear();
        self.tracked.clear();
    }

    fn close(&mut self) {
        self.clear();
        self.writer = false;
        release(&self.slot, "close");
    }

    fn contains(&self, key: &EntityKey, state: &[Value]) -> bool {
        self.tracked
            .get(key)
            .is_some_and(|tracked| tracked.as_slice() == state)
    }

    fn get(
        &mut self,
        mapping: &'static EntityMapping,
        id: i64,
        lock: LockMode,
    ) -> EngineResult<Option<Row>> {
        self.flush_pending("get")?;
        if lock == LockMode::PessimisticWrite {
            self.acquire_lock(mapping.table)?;
        }
        let sql = format!(
            "SELECT {}{}{} FROM {} WHERE {} = ?1",
            quote(mapping.id_column),
            if mapping.columns.is_empty() { "" } else { ", " },
            column_list(mapping),
            quote(mapping.table),
            quote(mapping.id_column)
        );
        let width = mapping.columns.len() + 1;
        let found = self.with_conn("get", |conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| classify("get", Phase::Prepare, e))?;
            stmt.query_row([id], |row| read_row(row, width))
                .optional()
                .map_err(|e| classify("get", Phase::Step, e))
        })?;
        Ok(found.map(|values| {
            self.tracked.insert(mapping.key(id), values[1..].to_vec());
            let columns = std::iter::once(mapping.id_column)
                .chain(mapping.columns.iter().copied())
                .map(str::to_string)
                .collect();
            Row::new(columns, values)
        }))
    }

    fn save(&mut self, mapping: &'static EntityMapping, values: &[Value]) -> EngineResult<i64> {
        self.ensure_writer("save")?;
        let id = self.with_conn("save", |conn| insert(conn, mapping, None, values))?;
        self.tracked.insert(mapping.key(id), values.to_vec());
        Ok(id)
    }

    fn delete(&mut self, mapping: &'static EntityMapping, id: i64) -> EngineResult<()> {
        self.ensure_writer("delete")?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote(mapping.table),
            quote(mapping.id_column)
        );
        let removed = self.with_conn("delete", |conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| classify("delete", Phase::Prepare, e))?;
            stmt.execute([id])
                .map_err(|e| classify("delete", Phase::Step, e))
        })?;
        if removed == 0 {
            tracing::debug!(
                component = "quarry_store",
                op = "delete",
                entity = mapping.entity,
                entity_id = id,
                "no row to delete"
            );
        }
        self.forget(&mapping.key(id));
        Ok(())
    }

    fn merge(
        &mut self,
        mapping: &'static EntityMapping,
        id: Option<i64>,
        values: &[Value],
    ) -> EngineResult<i64> {
        let Some(id) = id else {
            return self.save(mapping, values);
        };
        let key = mapping.key(id);
        self.pending
            .retain(|w| w.mapping.table != key.table || w.id != key.id);
        self.pending.push(PendingWrite {
            mapping,
            id,
            values: values.to_vec(),
        });
        self.tracked.insert(key, values.to_vec());
        Ok(id)
    }

    fn list(&mut self, query: &PreparedQuery) -> EngineResult<Vec<Row>> {
        self.flush_pending("list")?;
        let sql = paged_sql(query);
        let owned = named_params(query);
        let bound: Vec<(&str, &dyn ToSql)> = owned
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect();

        self.with_conn("list", |conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| classify("list", Phase::Prepare, e))?;
            let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let width = columns.len();
            let mut rows = stmt
                .query(bound.as_slice())
                .map_err(|e| classify("list", Phase::Bind, e))?;

            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(|e| classify("list", Phase::Step, e))? {
                let values = read_row(row, width).map_err(|e| classify("list", Phase::Step, e))?;
                out.push(Row::new(columns.clone(), values));
            }
            Ok(out)
        })
    }

    fn execute_update(&mut self, query: &PreparedQuery) -> EngineResult<usize> {
        self.flush_pending("execute_update")?;
        self.ensure_writer("execute_update")?;
        let owned = named_params(query);
        let bound: Vec<(&str, &dyn ToSql)> = owned
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect();

        let changed = self.with_conn("execute_update", |conn| {
            let mut stmt = conn
                .prepare(&query.sql)
                .map_err(|e| classify("execute_update", Phase::Prepare, e))?;
            stmt.execute(bound.as_slice())
                .map_err(|e| classify("execute_update", Phase::Step, e))
        })?;
        // Bulk statements bypass the identity map
        self.tracked.clear();
        Ok(changed)
    }

    fn acquire_lock(&mut self, table: &str) -> EngineResult<()> {
        self.ensure_writer("acquire_lock")?;
        let sql = format!(
            "INSERT OR REPLACE INTO {} (name, holder) VALUES (?1, ?2)",
            LOCK_TABLE
        );
        self.with_conn("acquire_lock", |conn| {
            conn.execute(&sql, [table, self.holder.as_str()])
                .map_err(|e| classify("acquire_lock", Phase::Step, e))
        })?;
        tracing::debug!(
            component = "quarry_store",
            op = "acquire_lock",
            table,
            "write lock taken"
        );
        Ok(())
    }
}

impl Drop for SqliteSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SqliteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSession")
            .field("open", &lock_slot(&self.slot).is_some())
            .field("writer", &self.writer)
            .field("tracked", &self.tracked.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}
