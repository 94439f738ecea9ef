use super::dql;
use super::generic::DefaultQueryInterface;
use super::{Params, QueryInterface, SqlQueryInterface};
use crate::engine::{EngineFailure, EngineResult, EngineSession, PreparedQuery};
use crate::errors::QueryError;
use crate::log_op_start;
use crate::model::{EntityMapping, Properties, Record, Row};
use crate::session::SessionContext;
use crate::validation::SessionValidation;
use std::sync::Arc;

/// Native SQL capability
///
/// Statements are passed to the engine as written (no short-form
/// expansion), after parameter validation. Generic entity operations are
/// delegated to a [`DefaultQueryInterface`].
#[derive(Debug, Clone)]
pub struct NativeSqlQueryInterface {
    guard: Arc<SessionValidation>,
    generic: DefaultQueryInterface,
}

impl NativeSqlQueryInterface {
    pub fn new(guard: Arc<SessionValidation>) -> Self {
        let generic = DefaultQueryInterface::new(guard.clone());
        Self { guard, generic }
    }

    /// Run `call` inside the caller's session, or inside one opened and
    /// committed just for this call
    fn with_auto_session<T>(
        &self,
        ctx: &mut SessionContext,
        op: &str,
        sql: &str,
        params: &Params,
        empty: T,
        call: impl FnOnce(&mut dyn EngineSession, &PreparedQuery) -> EngineResult<T>,
    ) -> Result<T, QueryError> {
        let sessions = self.guard.sessions();
        let auto_session = !sessions.is_session_active(ctx);
        if auto_session && !sessions.start_session(ctx) {
            return Ok(empty);
        }
        log_op_start!(op, query = sql, auto_session);

        let prepared = match dql::prepare_native(sql, params) {
            Ok(prepared) => prepared,
            Err(err) => {
                self.guard
                    .terminate_on_error(ctx, op, &EngineFailure::Recoverable(err.clone()));
                return Err(err);
            }
        };
        let result = match ctx.engine_session() {
            Some(session) => call(session, &prepared),
            None => return Ok(empty),
        };
        match result {
            Ok(value) => {
                if auto_session && !sessions.commit_session(ctx) {
                    return Ok(empty);
                }
                Ok(value)
            }
            Err(failure) => {
                self.guard.terminate_on_error(ctx, op, &failure);
                match failure {
                    EngineFailure::Recoverable(err) => Err(err),
                    EngineFailure::Fatal(_) => Ok(empty),
                }
            }
        }
    }
}

impl SqlQueryInterface for NativeSqlQueryInterface {
    fn do_sql(
        &self,
        ctx: &mut SessionContext,
        sql: &str,
        params: &Params,
    ) -> Result<Vec<Row>, QueryError> {
        self.with_auto_session(ctx, "do_sql", sql, params, Vec::new(), |session, query| {
            session.list(query)
        })
    }

    fn execute_sql(
        &self,
        ctx: &mut SessionContext,
        sql: &str,
        params: &Params,
    ) -> Result<Option<usize>, QueryError> {
        self.with_auto_session(ctx, "execute_sql", sql, params, None, |session, query| {
            session.execute_update(query).map(Some)
        })
    }
}

impl QueryInterface for NativeSqlQueryInterface {
    fn find_row_by_id(
        &self,
        ctx: &mut SessionContext,
        mapping: &'static EntityMapping,
        id: i64,
        for_update: bool,
    ) -> Option<Row> {
        self.generic.find_row_by_id(ctx, mapping, id, for_update)
    }

    fn find_rows_by_properties(
        &self,
        ctx: &mut SessionContext,
        mapping: &'static EntityMapping,
        properties: &Properties,
        for_update: bool,
    ) -> Vec<Row> {
        self.generic
            .find_rows_by_properties(ctx, mapping, properties, for_update)
    }

    fn add_records(&self, ctx: &mut SessionContext, records: &mut [&mut dyn Record]) -> bool {
        self.generic.add_records(ctx, records)
    }

    fn delete_records(&self, ctx: &mut SessionContext, records: &[&dyn Record]) -> bool {
        self.generic.delete_records(ctx, records)
    }
}
