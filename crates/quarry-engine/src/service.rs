//! The database service and its lifecycle hooks

use quarry_core::config::{ConnectionSettings, PropertyBag};
use quarry_core::engine::PersistenceEngine;
use quarry_core::errors::ExError;
use quarry_core::query::QueryInterface;
use quarry_core::registry::{FactoryContext, QueryInterfaceRegistry};
use quarry_core::session::SessionManager;
use quarry_core::validation::SessionValidation;
use quarry_core::{log_op_end, log_op_error, log_op_start};
use quarry_store::{discover_schema_sources, SqliteEngine};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Everything built by a successful start-up
struct Running {
    engine: Arc<dyn PersistenceEngine>,
    sessions: Arc<SessionManager>,
    validation: Arc<SessionValidation>,
    registry: QueryInterfaceRegistry,
}

impl Running {
    fn wire(engine: Arc<dyn PersistenceEngine>, initialised: Arc<AtomicBool>) -> Self {
        let sessions = Arc::new(SessionManager::new(engine.clone(), initialised));
        let validation = Arc::new(SessionValidation::new(sessions.clone()));
        let registry = QueryInterfaceRegistry::new(FactoryContext {
            engine: engine.clone(),
            sessions: sessions.clone(),
            validation: validation.clone(),
        });
        Self {
            engine,
            sessions,
            validation,
            registry,
        }
    }
}

/// Host-facing database service
///
/// Construct it with the startup properties, call [`DbService::start_up`]
/// once, hand the session manager and query capabilities to workers, and
/// call [`DbService::shut_down`] at exit.
pub struct DbService {
    props: PropertyBag,
    initialised: Arc<AtomicBool>,
    running: Option<Running>,
}

impl DbService {
    pub fn new(props: PropertyBag) -> Self {
        Self {
            props,
            initialised: Arc::new(AtomicBool::new(false)),
            running: None,
        }
    }

    /// A started service over an engine built elsewhere
    pub fn with_engine(engine: Arc<dyn PersistenceEngine>, initialised: Arc<AtomicBool>) -> Self {
        initialised.store(true, Ordering::SeqCst);
        Self {
            props: PropertyBag::new(),
            running: Some(Running::wire(engine, initialised.clone())),
            initialised,
        }
    }

    pub fn properties(&self) -> &PropertyBag {
        &self.props
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised.load(Ordering::SeqCst)
    }

    /// Validate the properties, open the engine, fold in extension schema
    /// sources and preload the default query capabilities
    ///
    /// Returns `false` (after logging) if the properties are invalid or
    /// the engine cannot be opened. Starting an already started service
    /// does nothing and returns `true`.
    pub fn start_up(&mut self) -> bool {
        const OP: &str = "start_up";
        if self.running.is_some() && self.is_initialised() {
            return true;
        }
        let start = Instant::now();
        log_op_start!(OP);

        let engine = match self.open_engine() {
            Ok(engine) => engine,
            Err(err) => {
                log_op_error!(OP, err, duration_ms = start.elapsed().as_millis() as u64);
                return false;
            }
        };

        let running = Running::wire(engine, self.initialised.clone());
        let capabilities = running.registry.capabilities().len();
        self.running = Some(running);
        self.initialised.store(true, Ordering::SeqCst);

        log_op_end!(
            OP,
            duration_ms = start.elapsed().as_millis() as u64,
            capabilities
        );
        true
    }

    fn open_engine(&self) -> Result<Arc<dyn PersistenceEngine>, ExError> {
        let settings = ConnectionSettings::resolve(&self.props)?;
        let engine = SqliteEngine::open(&settings)?;
        for source in discover_schema_sources(&settings.schema_dirs) {
            // A broken extension must not keep the core from starting
            if let Err(err) = engine.add_schema_source(&source) {
                tracing::error!(
                    component = module_path!(),
                    op = "add_schema_source",
                    path = %source.display(),
                    err_code = err.code(),
                    message = %err,
                    "skipping extension schema source"
                );
            }
        }
        let engine: Arc<dyn PersistenceEngine> = Arc::new(engine);
        Ok(engine)
    }

    /// Mark the service uninitialised and close the engine
    ///
    /// Closing the engine releases every session still held by a worker;
    /// open transactions are rolled back. Session managers handed out
    /// earlier refuse to start new sessions from here on. Shutting down a
    /// stopped service does nothing.
    pub fn shut_down(&mut self) {
        self.initialised.store(false, Ordering::SeqCst);
        if let Some(running) = self.running.take() {
            running.engine.close();
            tracing::info!(
                component = module_path!(),
                op = "shut_down",
                "database service stopped"
            );
        }
    }

    pub fn engine(&self) -> Option<Arc<dyn PersistenceEngine>> {
        self.running.as_ref().map(|r| r.engine.clone())
    }

    pub fn session_manager(&self) -> Option<Arc<SessionManager>> {
        self.running.as_ref().map(|r| r.sessions.clone())
    }

    pub fn validation(&self) -> Option<Arc<SessionValidation>> {
        self.running.as_ref().map(|r| r.validation.clone())
    }

    /// The default generic query capability
    pub fn query_interface(&self) -> Option<Arc<dyn QueryInterface>> {
        self.get_query_interface::<dyn QueryInterface>()
    }

    /// The instance registered for capability `C`
    ///
    /// `None` (logged) when the service is not started or nothing is
    /// registered for `C`.
    pub fn get_query_interface<C>(&self) -> Option<Arc<C>>
    where
        C: ?Sized + Send + Sync + 'static,
    {
        match &self.running {
            Some(running) => running.registry.get_interface::<C>(),
            None => {
                tracing::error!(
                    component = module_path!(),
                    op = "get_query_interface",
                    err_code = "ERR_NOT_INITIALISED",
                    "database service is not started"
                );
                None
            }
        }
    }

    /// Register (or replace) the factory for capability `C`
    ///
    /// Returns `false` if the service is not started.
    pub fn register_query_interface<C, F>(&self, factory: F) -> bool
    where
        C: ?Sized + Send + Sync + 'static,
        F: Fn(&FactoryContext) -> Arc<C> + Send + Sync + 'static,
    {
        match &self.running {
            Some(running) => {
                running.registry.register_factory::<C, F>(factory);
                true
            }
            None => false,
        }
    }
}

impl Drop for DbService {
    fn drop(&mut self) {
        self.shut_down();
    }
}

impl std::fmt::Debug for DbService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbService")
            .field("initialised", &self.is_initialised())
            .field("running", &self.running.is_some())
            .finish()
    }
}
