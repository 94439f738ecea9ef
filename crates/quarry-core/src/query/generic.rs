use super::dql;
use super::{DynamicQuery, DynamicQueryInterface, Params, QueryInterface};
use crate::engine::{EngineFailure, EngineResult, EngineSession, LockMode, PreparedQuery};
use crate::errors::{ExError, ExErrorKind, QueryError};
use crate::model::{EntityMapping, Properties, Record, Row};
use crate::session::SessionContext;
use crate::validation::SessionValidation;
use crate::{log_op_end, log_op_start};
use std::sync::Arc;
use std::time::Instant;

/// Default implementation of the generic and dynamic query capabilities
#[derive(Debug, Clone)]
pub struct DefaultQueryInterface {
    guard: Arc<SessionValidation>,
}

/// Index of the record that failed, or `None` when the final flush failed
type BatchFailure = (Option<usize>, EngineFailure);

fn list_locked(
    session: &mut dyn EngineSession,
    lock_table: Option<&str>,
    query: &PreparedQuery,
) -> EngineResult<Vec<Row>> {
    if let Some(table) = lock_table {
        session.acquire_lock(table)?;
    }
    session.list(query)
}

fn save_all(
    session: &mut dyn EngineSession,
    records: &mut [&mut dyn Record],
) -> Result<(), BatchFailure> {
    for (index, record) in records.iter_mut().enumerate() {
        let id = session
            .save(record.record_mapping(), &record.record_values())
            .map_err(|f| (Some(index), f))?;
        record.assign_id(id);
    }
    session.flush().map_err(|f| (None, f))
}

fn delete_all(session: &mut dyn EngineSession, records: &[&dyn Record]) -> Result<(), BatchFailure> {
    for (index, record) in records.iter().enumerate() {
        let mapping = record.record_mapping();
        let Some(id) = record.record_id() else {
            let err = ExError::new(ExErrorKind::Persistence)
                .with_op("delete_records")
                .with_entity(mapping.entity)
                .with_message("record was never persisted");
            return Err((Some(index), err.into()));
        };
        session.delete(mapping, id).map_err(|f| (Some(index), f))?;
    }
    session.flush().map_err(|f| (None, f))
}

impl DefaultQueryInterface {
    pub fn new(guard: Arc<SessionValidation>) -> Self {
        Self { guard }
    }

    pub fn validation(&self) -> &Arc<SessionValidation> {
        &self.guard
    }

    /// Shape-check a query and find its lock target
    fn plan(query: &DynamicQuery) -> Result<(PreparedQuery, Option<String>), QueryError> {
        let prepared = dql::prepare_dynamic(query)?;
        let lock_table = if query.is_for_update() {
            Some(dql::lock_target(query.text())?)
        } else {
            None
        };
        Ok((prepared, lock_table))
    }

    /// Run a query on the active session
    ///
    /// Shape errors roll the session back and are returned; engine
    /// failures roll it back and yield an empty list.
    fn run_query(
        &self,
        ctx: &mut SessionContext,
        op: &str,
        query: &DynamicQuery,
    ) -> Result<Vec<Row>, QueryError> {
        let start = Instant::now();
        let (prepared, lock_table) = match Self::plan(query) {
            Ok(plan) => plan,
            Err(err) => {
                self.guard
                    .terminate_on_error(ctx, op, &EngineFailure::Recoverable(err.clone()));
                return Err(err);
            }
        };
        let result = match ctx.engine_session() {
            Some(session) => list_locked(session, lock_table.as_deref(), &prepared),
            None => return Ok(Vec::new()),
        };
        match result {
            Ok(rows) => {
                log_op_end!(
                    op,
                    duration_ms = start.elapsed().as_millis() as u64,
                    row_count = rows.len()
                );
                Ok(rows)
            }
            Err(failure) => {
                self.guard.terminate_on_error(ctx, op, &failure);
                match failure {
                    EngineFailure::Recoverable(err) => Err(err),
                    EngineFailure::Fatal(_) => Ok(Vec::new()),
                }
            }
        }
    }

    /// Caller error in an internally built query: start over on a fresh
    /// session and report no rows
    fn restart_after_shape_error(&self, ctx: &mut SessionContext, op: &str, err: QueryError) -> Vec<Row> {
        tracing::warn!(
            component = module_path!(),
            op,
            message = %err,
            "invalid query built from properties; restarting session"
        );
        if ctx.has_session() {
            self.guard
                .terminate_on_error(ctx, op, &EngineFailure::Recoverable(err));
        }
        self.guard.sessions().start_session(ctx);
        Vec::new()
    }

    fn report_batch_failure(
        &self,
        ctx: &mut SessionContext,
        op: &str,
        failed: Option<&dyn Record>,
        failure: &EngineFailure,
    ) {
        match failed {
            Some(record) => tracing::error!(
                component = module_path!(),
                op,
                entity = record.record_mapping().entity,
                entity_id = ?record.record_id(),
                "batch aborted at record"
            ),
            None => tracing::error!(component = module_path!(), op, "batch flush failed"),
        }
        self.guard.terminate_on_error(ctx, op, failure);
    }
}

impl QueryInterface for DefaultQueryInterface {
    fn find_row_by_id(
        &self,
        ctx: &mut SessionContext,
        mapping: &'static EntityMapping,
        id: i64,
        for_update: bool,
    ) -> Option<Row> {
        if !self.guard.check_session(ctx, "find_by_id") {
            return None;
        }
        log_op_start!("find_by_id", entity = mapping.entity, entity_id = id, for_update);
        let lock = if for_update {
            LockMode::PessimisticWrite
        } else {
            LockMode::None
        };
        let result = ctx.engine_session()?.get(mapping, id, lock);
        match result {
            Ok(row) => row,
            Err(failure) => {
                self.guard.terminate_on_error(ctx, "find_by_id", &failure);
                None
            }
        }
    }

    fn find_rows_by_properties(
        &self,
        ctx: &mut SessionContext,
        mapping: &'static EntityMapping,
        properties: &Properties,
        for_update: bool,
    ) -> Vec<Row> {
        const OP: &str = "find_by_properties";
        if !self.guard.check_session(ctx, OP) {
            return Vec::new();
        }
        log_op_start!(OP, entity = mapping.entity, filters = properties.len(), for_update);
        let query = match dql::property_query(mapping, properties) {
            Ok(query) => query.for_update(for_update),
            Err(err) => return self.restart_after_shape_error(ctx, OP, err),
        };
        match self.run_query(ctx, OP, &query) {
            Ok(rows) => rows,
            Err(err) => self.restart_after_shape_error(ctx, OP, err),
        }
    }

    fn add_records(&self, ctx: &mut SessionContext, records: &mut [&mut dyn Record]) -> bool {
        const OP: &str = "add_records";
        if !self.guard.check_session(ctx, OP) {
            return false;
        }
        let start = Instant::now();
        let result = match ctx.engine_session() {
            Some(session) => save_all(session, records),
            None => return false,
        };
        match result {
            Ok(()) => {
                log_op_end!(OP, duration_ms = start.elapsed().as_millis() as u64, row_count = records.len());
                true
            }
            Err((index, failure)) => {
                let failed = index.and_then(|i| records.get(i)).map(|r| &**r as &dyn Record);
                self.report_batch_failure(ctx, OP, failed, &failure);
                false
            }
        }
    }

    fn delete_records(&self, ctx: &mut SessionContext, records: &[&dyn Record]) -> bool {
        const OP: &str = "delete_records";
        if !self.guard.check_session(ctx, OP) {
            return false;
        }
        let start = Instant::now();
        let result = match ctx.engine_session() {
            Some(session) => delete_all(session, records),
            None => return false,
        };
        match result {
            Ok(()) => {
                log_op_end!(OP, duration_ms = start.elapsed().as_millis() as u64, row_count = records.len());
                true
            }
            Err((index, failure)) => {
                let failed = index.and_then(|i| records.get(i)).copied();
                self.report_batch_failure(ctx, OP, failed, &failure);
                false
            }
        }
    }
}

impl DynamicQueryInterface for DefaultQueryInterface {
    fn execute_query(
        &self,
        ctx: &mut SessionContext,
        query: &DynamicQuery,
    ) -> Result<Vec<Row>, QueryError> {
        const OP: &str = "execute_query";
        if !self.guard.check_session(ctx, OP) {
            return Ok(Vec::new());
        }
        log_op_start!(OP, query = query.text(), for_update = query.is_for_update());
        self.run_query(ctx, OP, query)
    }

    fn execute_update(
        &self,
        ctx: &mut SessionContext,
        text: &str,
        params: &Params,
    ) -> Result<Option<usize>, QueryError> {
        const OP: &str = "execute_update";
        if !self.guard.check_session(ctx, OP) {
            return Ok(None);
        }
        let start = Instant::now();
        log_op_start!(OP, query = text);
        let prepared = match dql::prepare_native(text, params) {
            Ok(prepared) => prepared,
            Err(err) => {
                self.guard
                    .terminate_on_error(ctx, OP, &EngineFailure::Recoverable(err.clone()));
                return Err(err);
            }
        };
        let result = match ctx.engine_session() {
            Some(session) => session.execute_update(&prepared),
            None => return Ok(None),
        };
        match result {
            Ok(count) => {
                log_op_end!(OP, duration_ms = start.elapsed().as_millis() as u64, row_count = count);
                Ok(Some(count))
            }
            Err(failure) => {
                self.guard.terminate_on_error(ctx, OP, &failure);
                match failure {
                    EngineFailure::Recoverable(err) => Err(err),
                    EngineFailure::Fatal(_) => Ok(None),
                }
            }
        }
    }
}
