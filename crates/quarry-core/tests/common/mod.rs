//! Scripted in-memory engine for exercising facade failure paths

use quarry_core::config::Dialect;
use quarry_core::engine::{
    EngineFailure, EngineResult, EngineSession, LockMode, PersistenceEngine, PreparedQuery,
};
use quarry_core::errors::{ExError, ExErrorKind, QueryError};
use quarry_core::model::{Entity, EntityKey, EntityMapping, Row, Value};
use quarry_core::registry::{FactoryContext, QueryInterfaceRegistry};
use quarry_core::session::SessionManager;
use quarry_core::validation::SessionValidation;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub id: Option<i64>,
    pub mnemonic: String,
    pub description: String,
}

pub static METRIC: EntityMapping = EntityMapping {
    entity: "Metric",
    table: "metric",
    id_column: "id",
    columns: &["mnemonic", "description"],
};

impl Metric {
    #[allow(dead_code)]
    pub fn new(mnemonic: &str) -> Self {
        Self {
            id: None,
            mnemonic: mnemonic.to_string(),
            description: format!("{} metric", mnemonic),
        }
    }
}

impl Entity for Metric {
    fn mapping() -> &'static EntityMapping {
        &METRIC
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            self.mnemonic.clone().into(),
            self.description.clone().into(),
        ]
    }

    fn from_row(row: &Row) -> Result<Self, QueryError> {
        Ok(Self {
            id: row.try_get("id")?,
            mnemonic: row.try_get("mnemonic")?,
            description: row.try_get("description")?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Fatal,
    Recoverable,
}

#[derive(Debug, Clone, Copy)]
struct Injected {
    fault: Fault,
    /// Successful calls allowed before the fault fires
    after: usize,
}

#[derive(Default)]
pub struct FakeState {
    pub calls: Vec<&'static str>,
    faults: HashMap<&'static str, Injected>,
    counts: HashMap<&'static str, usize>,
    stored: HashMap<EntityKey, Vec<Value>>,
    next_id: i64,
    pub list_rows: Vec<Row>,
    pub update_count: usize,
    pub last_query: Option<PreparedQuery>,
}

/// Engine whose sessions log every call and fail on request
#[derive(Clone, Default)]
pub struct FakeEngine {
    state: Arc<Mutex<FakeState>>,
}

#[allow(dead_code)]
impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Make every call to `op` fail
    pub fn fail(&self, op: &'static str, fault: Fault) {
        self.fail_after(op, 0, fault);
    }

    /// Let `after` calls to `op` succeed, then fail the rest
    pub fn fail_after(&self, op: &'static str, after: usize, fault: Fault) {
        self.state().faults.insert(op, Injected { fault, after });
    }

    pub fn heal(&self) {
        self.state().faults.clear();
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state().calls.clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.state().calls.iter().filter(|c| **c == op).count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn set_list_rows(&self, rows: Vec<Row>) {
        self.state().list_rows = rows;
    }

    pub fn set_update_count(&self, n: usize) {
        self.state().update_count = n;
    }

    pub fn last_query(&self) -> Option<PreparedQuery> {
        self.state().last_query.clone()
    }

    pub fn stored(&self, key: &EntityKey) -> Option<Vec<Value>> {
        self.state().stored.get(key).cloned()
    }

    fn step(&self, op: &'static str) -> EngineResult<()> {
        let mut state = self.state();
        state.calls.push(op);
        let seen = state.counts.entry(op).or_insert(0);
        *seen += 1;
        let seen = *seen;
        match state.faults.get(op) {
            Some(injected) if seen > injected.after => Err(match injected.fault {
                Fault::Fatal => EngineFailure::Fatal(
                    ExError::new(ExErrorKind::Connectivity)
                        .with_op(op)
                        .with_message(format!("{} failed", op))
                        .with_sql_state("08006")
                        .with_vendor_code(17002)
                        .with_source(
                            ExError::new(ExErrorKind::Io)
                                .with_message("connection reset by peer")
                                .with_sql_state("08S01"),
                        ),
                ),
                Fault::Recoverable => EngineFailure::Recoverable(QueryError::Malformed {
                    reason: format!("{} rejected", op),
                }),
            }),
            _ => Ok(()),
        }
    }
}

#[allow(dead_code)]
pub fn metric_row(id: i64, mnemonic: &str) -> Row {
    Row::new(
        vec!["id".into(), "mnemonic".into(), "description".into()],
        vec![
            Value::Integer(id),
            Value::from(mnemonic),
            Value::from(format!("{} metric", mnemonic)),
        ],
    )
}

impl PersistenceEngine for FakeEngine {
    fn open_session(&self) -> Result<Box<dyn EngineSession>, ExError> {
        self.step("open").map_err(ExError::from)?;
        Ok(Box::new(FakeSession {
            engine: self.clone(),
            active: false,
            tracked: HashMap::new(),
        }))
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn add_schema_source(&self, _path: &Path) -> Result<(), ExError> {
        self.step("add_schema_source").map_err(ExError::from)
    }

    fn close(&self) {
        self.state().calls.push("engine_close");
    }
}

struct FakeSession {
    engine: FakeEngine,
    active: bool,
    tracked: HashMap<EntityKey, Vec<Value>>,
}

impl EngineSession for FakeSession {
    fn begin(&mut self) -> EngineResult<()> {
        self.engine.step("begin")?;
        self.active = true;
        Ok(())
    }

    fn is_active(&mut self) -> EngineResult<bool> {
        self.engine.step("is_active")?;
        Ok(self.active)
    }

    fn commit(&mut self) -> EngineResult<()> {
        self.engine.step("commit")?;
        self.active = false;
        Ok(())
    }

    fn rollback(&mut self) -> EngineResult<()> {
        self.engine.step("rollback")?;
        self.active = false;
        Ok(())
    }

    fn flush(&mut self) -> EngineResult<()> {
        self.engine.step("flush")
    }

    fn clear(&mut self) {
        self.engine.state().calls.push("clear");
        self.tracked.clear();
    }

    fn close(&mut self) {
        self.engine.state().calls.push("close");
        self.active = false;
    }

    fn contains(&self, key: &EntityKey, state: &[Value]) -> bool {
        self.tracked.get(key).is_some_and(|v| v.as_slice() == state)
    }

    fn get(
        &mut self,
        mapping: &'static EntityMapping,
        id: i64,
        lock: LockMode,
    ) -> EngineResult<Option<Row>> {
        self.engine.step("get")?;
        if lock == LockMode::PessimisticWrite {
            self.engine.step("lock")?;
        }
        let Some(values) = self.engine.stored(&mapping.key(id)) else {
            return Ok(None);
        };
        self.tracked.insert(mapping.key(id), values.clone());
        let mut columns = vec![mapping.id_column.to_string()];
        columns.extend(mapping.columns.iter().map(|c| c.to_string()));
        let mut all = vec![Value::Integer(id)];
        all.extend(values);
        Ok(Some(Row::new(columns, all)))
    }

    fn save(&mut self, mapping: &'static EntityMapping, values: &[Value]) -> EngineResult<i64> {
        self.engine.step("save")?;
        let mut state = self.engine.state();
        state.next_id += 1;
        let id = state.next_id;
        state.stored.insert(mapping.key(id), values.to_vec());
        drop(state);
        self.tracked.insert(mapping.key(id), values.to_vec());
        Ok(id)
    }

    fn delete(&mut self, mapping: &'static EntityMapping, id: i64) -> EngineResult<()> {
        self.engine.step("delete")?;
        self.engine.state().stored.remove(&mapping.key(id));
        self.tracked.remove(&mapping.key(id));
        Ok(())
    }

    fn merge(
        &mut self,
        mapping: &'static EntityMapping,
        id: Option<i64>,
        values: &[Value],
    ) -> EngineResult<i64> {
        self.engine.step("merge")?;
        let id = match id {
            Some(id) => id,
            None => {
                let mut state = self.engine.state();
                state.next_id += 1;
                state.next_id
            }
        };
        self.tracked.insert(mapping.key(id), values.to_vec());
        Ok(id)
    }

    fn list(&mut self, query: &PreparedQuery) -> EngineResult<Vec<Row>> {
        self.engine.step("list")?;
        let mut state = self.engine.state();
        state.last_query = Some(query.clone());
        Ok(state.list_rows.clone())
    }

    fn execute_update(&mut self, query: &PreparedQuery) -> EngineResult<usize> {
        self.engine.step("update")?;
        let mut state = self.engine.state();
        state.last_query = Some(query.clone());
        Ok(state.update_count)
    }

    fn acquire_lock(&mut self, _table: &str) -> EngineResult<()> {
        self.engine.step("lock")
    }
}

/// Facade wired over a fake engine
#[allow(dead_code)]
pub struct Harness {
    pub engine: FakeEngine,
    pub initialised: Arc<AtomicBool>,
    pub sessions: Arc<SessionManager>,
    pub validation: Arc<SessionValidation>,
}

#[allow(dead_code)]
impl Harness {
    pub fn new() -> Self {
        let engine = FakeEngine::new();
        let initialised = Arc::new(AtomicBool::new(true));
        let sessions = Arc::new(SessionManager::new(
            Arc::new(engine.clone()),
            initialised.clone(),
        ));
        let validation = Arc::new(SessionValidation::new(sessions.clone()));
        Self {
            engine,
            initialised,
            sessions,
            validation,
        }
    }

    pub fn factory_context(&self) -> FactoryContext {
        FactoryContext {
            engine: Arc::new(self.engine.clone()),
            sessions: self.sessions.clone(),
            validation: self.validation.clone(),
        }
    }

    pub fn registry(&self) -> QueryInterfaceRegistry {
        QueryInterfaceRegistry::new(self.factory_context())
    }
}
