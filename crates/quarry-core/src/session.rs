//! Session lifecycle
//!
//! A [`SessionContext`] is the per-worker handle that owns at most one
//! engine session. The [`SessionManager`] drives the state machine
//! `NoSession -> Active -> (committed | rolled back | force-closed) ->
//! NoSession` on a context passed in by the caller. No operation here
//! returns an error: failures are logged and reported as `false`/`None`.

use crate::engine::{EngineSession, PersistenceEngine};
use crate::model::Entity;
use crate::validation::{log_failure_chain, report_missing_session, terminate_session};
use crate::{log_op_end, log_op_error, log_op_start};
use quarry_core_types::{SessionId, WorkerId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Observable state of a context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    Active,
}

struct OpenSession {
    id: SessionId,
    engine: Box<dyn EngineSession>,
}

/// Per-worker session handle
///
/// One context per logical worker; it moves between threads freely but is
/// only ever used through `&mut`, so two threads never share a session.
/// Dropping a context with a session still open rolls that session back.
pub struct SessionContext {
    worker: WorkerId,
    current: Option<OpenSession>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self {
            worker: WorkerId::new(),
            current: None,
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker
    }

    /// Id of the open session, if any
    pub fn session_id(&self) -> Option<&SessionId> {
        self.current.as_ref().map(|s| &s.id)
    }

    pub fn has_session(&self) -> bool {
        self.current.is_some()
    }

    /// The open engine session, for query interfaces
    pub fn engine_session(&mut self) -> Option<&mut (dyn EngineSession + 'static)> {
        self.current.as_mut().map(|s| s.engine.as_mut())
    }

    fn install(&mut self, engine: Box<dyn EngineSession>) -> &SessionId {
        let open = self.current.insert(OpenSession {
            id: SessionId::new(),
            engine,
        });
        &open.id
    }

    fn take(&mut self) -> Option<OpenSession> {
        self.current.take()
    }

    /// Roll back and close the open session; returns whether the rollback
    /// was clean. A failed rollback still closes the session.
    pub(crate) fn terminate(&mut self) -> bool {
        let Some(mut open) = self.take() else {
            return false;
        };
        let clean = match open.engine.rollback() {
            Ok(()) => true,
            Err(failure) => {
                log_failure_chain("rollback", Some(&open.id), &failure);
                false
            }
        };
        open.engine.close();
        clean
    }

    /// Close the open session without attempting a rollback
    pub(crate) fn force_close(&mut self) {
        if let Some(mut open) = self.take() {
            tracing::warn!(
                component = module_path!(),
                op = "force_close",
                session_id = %open.id,
                worker_id = %self.worker,
                "force-closing session"
            );
            open.engine.close();
        }
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        if let Some(id) = self.session_id() {
            tracing::warn!(
                component = module_path!(),
                op = "drop_context",
                session_id = %id,
                worker_id = %self.worker,
                "context dropped with an open session; rolling back"
            );
            self.terminate();
        }
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("worker", &self.worker)
            .field("session", &self.session_id())
            .finish()
    }
}

/// Drives session lifecycle on caller-supplied contexts
pub struct SessionManager {
    engine: Arc<dyn PersistenceEngine>,
    initialised: Arc<AtomicBool>,
}

impl SessionManager {
    /// `initialised` is shared with the owning service, which clears it on
    /// shutdown so that surviving handles stop opening sessions.
    pub fn new(engine: Arc<dyn PersistenceEngine>, initialised: Arc<AtomicBool>) -> Self {
        Self {
            engine,
            initialised,
        }
    }

    pub fn engine(&self) -> &Arc<dyn PersistenceEngine> {
        &self.engine
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised.load(Ordering::Acquire)
    }

    pub fn state(&self, ctx: &mut SessionContext) -> SessionState {
        if self.is_session_active(ctx) {
            SessionState::Active
        } else {
            SessionState::NoSession
        }
    }

    /// Open a session and begin its transaction
    ///
    /// Idempotent: returns `true` without touching the engine when the
    /// context already has an active session.
    pub fn start_session(&self, ctx: &mut SessionContext) -> bool {
        let start = Instant::now();
        if !self.is_initialised() {
            tracing::warn!(
                component = module_path!(),
                op = "start_session",
                worker_id = %ctx.worker_id(),
                "persistence engine not initialised"
            );
            return false;
        }
        if self.is_session_active(ctx) {
            return true;
        }
        // transaction already ended; start over on a fresh session
        ctx.force_close();

        log_op_start!("start_session", worker_id = %ctx.worker_id());
        let mut engine = match self.engine.open_session() {
            Ok(engine) => engine,
            Err(err) => {
                log_op_error!("start_session", err, duration_ms = start.elapsed().as_millis() as u64);
                return false;
            }
        };
        match engine.begin() {
            Ok(()) => {
                let id = ctx.install(engine);
                log_op_end!(
                    "start_session",
                    duration_ms = start.elapsed().as_millis() as u64,
                    session_id = %id
                );
                true
            }
            Err(failure) => {
                log_op_error!("start_session", failure, duration_ms = start.elapsed().as_millis() as u64);
                engine.close();
                false
            }
        }
    }

    /// Commit and close the active session
    ///
    /// On commit failure the transaction is rolled back; if that fails too
    /// the session is closed regardless. The context has no session
    /// afterwards either way.
    pub fn commit_session(&self, ctx: &mut SessionContext) -> bool {
        if !self.require_active(ctx, "commit_session") {
            return false;
        }
        let start = Instant::now();
        let Some(mut open) = ctx.take() else {
            return false;
        };
        log_op_start!("commit_session", session_id = %open.id);
        match open.engine.commit() {
            Ok(()) => {
                open.engine.close();
                log_op_end!(
                    "commit_session",
                    duration_ms = start.elapsed().as_millis() as u64,
                    session_id = %open.id
                );
                true
            }
            Err(failure) => {
                log_failure_chain("commit_session", Some(&open.id), &failure);
                if let Err(rollback) = open.engine.rollback() {
                    log_failure_chain("rollback", Some(&open.id), &rollback);
                }
                open.engine.close();
                false
            }
        }
    }

    /// Roll back and close the active session
    pub fn rollback_session(&self, ctx: &mut SessionContext) -> bool {
        if !self.require_active(ctx, "rollback_session") {
            return false;
        }
        let start = Instant::now();
        let Some(mut open) = ctx.take() else {
            return false;
        };
        let result = open.engine.rollback();
        open.engine.close();
        match result {
            Ok(()) => {
                log_op_end!(
                    "rollback_session",
                    duration_ms = start.elapsed().as_millis() as u64,
                    session_id = %open.id
                );
                true
            }
            Err(failure) => {
                log_failure_chain("rollback_session", Some(&open.id), &failure);
                false
            }
        }
    }

    /// Write pending changes, then detach every loaded entity
    pub fn flush_session(&self, ctx: &mut SessionContext) -> bool {
        if !self.require_active(ctx, "flush_session") {
            return false;
        }
        let result = match ctx.engine_session() {
            Some(session) => session.flush().map(|()| session.clear()),
            None => return false,
        };
        match result {
            Ok(()) => true,
            Err(failure) => {
                terminate_session(ctx, "flush_session", &failure);
                false
            }
        }
    }

    /// Whether the engine is initialised and the context holds a session
    /// whose transaction is open
    ///
    /// An engine error while probing force-closes the probed session. A
    /// session left over from before a shutdown is dropped.
    pub fn is_session_active(&self, ctx: &mut SessionContext) -> bool {
        if !self.is_initialised() {
            ctx.force_close();
            return false;
        }
        let probe = match ctx.engine_session() {
            Some(session) => session.is_active(),
            None => return false,
        };
        match probe {
            Ok(active) => active,
            Err(failure) => {
                log_failure_chain("is_session_active", ctx.session_id(), &failure);
                ctx.force_close();
                false
            }
        }
    }

    /// Make `entity` part of the active session
    ///
    /// An entity already tracked with identical state is handed back as is.
    /// Otherwise its values are merged into the session (they win over any
    /// tracked state) and the tracked copy is returned.
    pub fn attach_to_session<T: Entity>(&self, ctx: &mut SessionContext, entity: T) -> Option<T> {
        if !self.require_active(ctx, "attach_to_session") {
            return None;
        }
        let mapping = T::mapping();
        let values = entity.to_values();
        let merged = {
            let session = ctx.engine_session()?;
            if let Some(id) = entity.id() {
                if session.contains(&mapping.key(id), &values) {
                    return Some(entity);
                }
            }
            session.merge(mapping, entity.id(), &values)
        };
        match merged {
            Ok(id) => {
                let mut copy = entity;
                copy.set_id(id);
                Some(copy)
            }
            Err(failure) => {
                terminate_session(ctx, "attach_to_session", &failure);
                None
            }
        }
    }

    /// Liveness check that logs a no-session warning on failure
    pub(crate) fn require_active(&self, ctx: &mut SessionContext, op: &str) -> bool {
        if self.is_session_active(ctx) {
            true
        } else {
            report_missing_session(op, ctx);
            false
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("dialect", &self.engine.dialect())
            .field("initialised", &self.is_initialised())
            .finish()
    }
}
