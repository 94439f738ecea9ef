//! Session validation guard
//!
//! The chokepoint every failure path funnels through: it checks liveness
//! before an operation and, after an engine failure, logs the whole cause
//! chain and ends the session so nothing is left half-committed or locked.

use crate::engine::EngineFailure;
use crate::session::{SessionContext, SessionManager};
use quarry_core_types::schema::{EVENT_NO_SESSION, EVENT_SESSION_TERMINATED};
use quarry_core_types::SessionId;
use std::backtrace::Backtrace;
use std::sync::Arc;

/// Liveness check and terminate-on-error helper
#[derive(Debug, Clone)]
pub struct SessionValidation {
    sessions: Arc<SessionManager>,
}

impl SessionValidation {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Whether `ctx` has an active session
    ///
    /// Logs a warning with a call-site backtrace when it does not.
    pub fn check_session(&self, ctx: &mut SessionContext, op: &str) -> bool {
        self.sessions.require_active(ctx, op)
    }

    /// Log every link of `failure` and end the active session
    ///
    /// The transaction is rolled back; if the rollback fails the session is
    /// closed anyway. Returns whether the rollback was clean.
    pub fn terminate_on_error(
        &self,
        ctx: &mut SessionContext,
        op: &str,
        failure: &EngineFailure,
    ) -> bool {
        terminate_session(ctx, op, failure)
    }
}

/// Log `failure`, then roll back and close the session held by `ctx`
pub(crate) fn terminate_session(ctx: &mut SessionContext, op: &str, failure: &EngineFailure) -> bool {
    log_failure_chain(op, ctx.session_id(), failure);
    let session_id = ctx.session_id().cloned();
    let rolled_back = ctx.terminate();
    tracing::warn!(
        component = module_path!(),
        op,
        event = EVENT_SESSION_TERMINATED,
        session_id = session_id.as_ref().map(SessionId::as_str).unwrap_or("-"),
        rolled_back,
    );
    rolled_back
}

pub(crate) fn report_missing_session(op: &str, ctx: &SessionContext) {
    // Captured regardless of RUST_BACKTRACE
    let trace = Backtrace::force_capture();
    tracing::warn!(
        component = module_path!(),
        op,
        event = EVENT_NO_SESSION,
        worker_id = %ctx.worker_id(),
        backtrace = %trace,
        "operation attempted without an active session"
    );
}

/// Log a failure; fatal failures log one event per chained cause
pub(crate) fn log_failure_chain(op: &str, session: Option<&SessionId>, failure: &EngineFailure) {
    let session_id = session.map(SessionId::as_str).unwrap_or("-");
    match failure {
        EngineFailure::Recoverable(err) => {
            tracing::warn!(
                component = module_path!(),
                op,
                session_id,
                err_code = "ERR_QUERY_SHAPE",
                message = %err,
                "query rejected"
            );
        }
        EngineFailure::Fatal(err) => {
            for (depth, link) in err.chain().enumerate() {
                tracing::error!(
                    component = module_path!(),
                    op,
                    session_id,
                    depth,
                    err_code = link.code(),
                    sql_state = link.sql_state().unwrap_or("-"),
                    vendor_code = link.vendor_code().unwrap_or_default(),
                    message = link.message(),
                    "engine failure"
                );
            }
        }
    }
}
