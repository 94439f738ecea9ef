// Lifecycle tests for the database service

mod common;

use common::{Metric, Workspace};
use quarry_core::config::PropertyBag;
use quarry_core::engine::PersistenceEngine;
use quarry_core::model::{Properties, Row};
use quarry_core::query::{
    DefaultQueryInterface, DynamicQueryExt, DynamicQueryInterface, Params, QueryInterface,
    QueryInterfaceExt, SqlQueryInterface,
};
use quarry_core::registry::FactoryContext;
use quarry_core::session::{SessionContext, SessionManager};
use quarry_engine::DbService;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_start_up_wires_a_working_facade() {
    // Given: A service over a temp database with the metric extension
    let ws = Workspace::new();
    let mut service = DbService::new(ws.props());

    // When: It starts
    assert!(service.start_up());

    // Then: Sessions and the default capability work end to end
    let sessions = service.session_manager().unwrap();
    let qi = service.query_interface().unwrap();
    let mut ctx = SessionContext::new();
    assert!(sessions.start_session(&mut ctx));
    let mut metric = Metric::new("LOC");
    assert!(qi.add_record(&mut ctx, &mut metric));
    assert!(sessions.commit_session(&mut ctx));

    assert!(sessions.start_session(&mut ctx));
    let found: Vec<Metric> = qi.find_by_properties(&mut ctx, &Properties::new(), false);
    assert_eq!(found, vec![metric]);
}

#[test]
fn test_start_up_twice_keeps_the_running_service() {
    let ws = Workspace::new();
    let mut service = DbService::new(ws.props());
    assert!(service.start_up());
    let before = service.session_manager().unwrap();

    assert!(service.start_up());

    assert!(Arc::ptr_eq(&before, &service.session_manager().unwrap()));
}

#[test]
fn test_shut_down_disables_surviving_session_managers() {
    // Given: A worker holding the session manager of a running service
    let ws = Workspace::new();
    let mut service = DbService::new(ws.props());
    assert!(service.start_up());
    let sessions: Arc<SessionManager> = service.session_manager().unwrap();

    // When: The service shuts down
    service.shut_down();

    // Then: The worker can no longer start sessions
    let mut ctx = SessionContext::new();
    assert!(!sessions.start_session(&mut ctx));
    assert!(!service.is_initialised());
    assert!(service.query_interface().is_none());
}

#[test]
fn test_shut_down_releases_sessions_held_by_workers() {
    // Given: A worker with an uncommitted write in a running service
    let ws = Workspace::new();
    let mut service = DbService::new(ws.props());
    assert!(service.start_up());
    let sessions = service.session_manager().unwrap();
    let qi = service.query_interface().unwrap();
    let mut worker = SessionContext::new();
    assert!(sessions.start_session(&mut worker));
    let mut held = Metric::new("HELD");
    assert!(qi.add_record(&mut worker, &mut held));

    // When: The service shuts down
    service.shut_down();

    // Then: The worker's session is gone
    assert!(!sessions.is_session_active(&mut worker));
    assert!(!worker.has_session());

    // And: A new service writes without waiting on the old transaction
    let mut next = DbService::new(ws.props());
    assert!(next.start_up());
    let sessions = next.session_manager().unwrap();
    let qi = next.query_interface().unwrap();
    let mut ctx = SessionContext::new();
    assert!(sessions.start_session(&mut ctx));
    let mut metric = Metric::new("NEXT");
    assert!(qi.add_record(&mut ctx, &mut metric));
    assert!(sessions.commit_session(&mut ctx));

    assert!(sessions.start_session(&mut ctx));
    let names: Vec<String> = qi
        .find_by_properties::<Metric>(&mut ctx, &Properties::new(), false)
        .into_iter()
        .map(|m| m.mnemonic)
        .collect();
    assert_eq!(names, vec!["NEXT"]);
}

#[test]
fn test_restart_after_shut_down() {
    let ws = Workspace::new();
    let mut service = DbService::new(ws.props());
    assert!(service.start_up());
    service.shut_down();

    assert!(service.start_up());

    let sessions = service.session_manager().unwrap();
    let mut ctx = SessionContext::new();
    assert!(sessions.start_session(&mut ctx));
}

#[test]
fn test_extension_schema_sources_are_applied_and_broken_ones_skipped() {
    // Given: One valid and one broken extension source
    let ws = Workspace::new();
    ws.add_extension(
        "metrics-latency.sql",
        "CREATE TABLE latency (id INTEGER PRIMARY KEY, millis REAL);",
    );
    ws.add_extension("metrics-broken.sql", "CREATE TABLEX nope;");
    let mut service = DbService::new(ws.props());

    // When: The service starts
    assert!(service.start_up());

    // Then: The valid source's table is queryable
    let dynamic = service
        .get_query_interface::<dyn DynamicQueryInterface>()
        .unwrap();
    let sessions = service.session_manager().unwrap();
    let mut ctx = SessionContext::new();
    assert!(sessions.start_session(&mut ctx));
    let rows = dynamic
        .do_query(&mut ctx, "from latency as l", &Params::new())
        .unwrap();
    assert!(rows.is_empty());
}

#[test]
fn test_native_capability_is_preloaded() {
    let ws = Workspace::new();
    let mut service = DbService::new(ws.props());
    assert!(service.start_up());

    let native = service.get_query_interface::<dyn SqlQueryInterface>().unwrap();
    let mut ctx = SessionContext::new();
    let rows = native
        .do_sql(&mut ctx, "select count(*) as n from metric", &Params::new())
        .unwrap();

    assert_eq!(rows.len(), 1);
}

/// Capability counting how often it was built
struct CountingQueryInterface {
    inner: DefaultQueryInterface,
}

impl QueryInterface for CountingQueryInterface {
    fn find_row_by_id(
        &self,
        ctx: &mut SessionContext,
        mapping: &'static quarry_core::model::EntityMapping,
        id: i64,
        for_update: bool,
    ) -> Option<Row> {
        self.inner.find_row_by_id(ctx, mapping, id, for_update)
    }

    fn find_rows_by_properties(
        &self,
        ctx: &mut SessionContext,
        mapping: &'static quarry_core::model::EntityMapping,
        properties: &Properties,
        for_update: bool,
    ) -> Vec<Row> {
        self.inner
            .find_rows_by_properties(ctx, mapping, properties, for_update)
    }

    fn add_records(
        &self,
        ctx: &mut SessionContext,
        records: &mut [&mut dyn quarry_core::model::Record],
    ) -> bool {
        self.inner.add_records(ctx, records)
    }

    fn delete_records(
        &self,
        ctx: &mut SessionContext,
        records: &[&dyn quarry_core::model::Record],
    ) -> bool {
        self.inner.delete_records(ctx, records)
    }
}

#[test]
fn test_registering_a_factory_evicts_the_cached_instance() {
    // Given: A started service with a counting factory registered
    let ws = Workspace::new();
    let mut service = DbService::new(ws.props());
    assert!(service.start_up());
    let builds = Arc::new(AtomicUsize::new(0));
    let factory = {
        let builds = builds.clone();
        move |cx: &FactoryContext| -> Arc<dyn QueryInterface> {
            builds.fetch_add(1, Ordering::SeqCst);
            Arc::new(CountingQueryInterface {
                inner: DefaultQueryInterface::new(cx.validation.clone()),
            })
        }
    };
    assert!(service.register_query_interface::<dyn QueryInterface, _>(factory.clone()));

    // When: The capability is requested twice
    let first = service.query_interface().unwrap();
    let second = service.query_interface().unwrap();

    // Then: One instance is built and shared
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(builds.load(Ordering::SeqCst), 1);

    // When: The factory is registered again
    assert!(service.register_query_interface::<dyn QueryInterface, _>(factory));
    let third = service.query_interface().unwrap();

    // Then: A fresh instance is built
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(builds.load(Ordering::SeqCst), 2);
}

trait MetricCounter: Send + Sync {
    fn count(&self, ctx: &mut SessionContext) -> usize;
}

struct TableCounter {
    dynamic: DefaultQueryInterface,
}

impl MetricCounter for TableCounter {
    fn count(&self, ctx: &mut SessionContext) -> usize {
        self.dynamic
            .do_query(ctx, "from metric as m", &Params::new())
            .map(|rows| rows.len())
            .unwrap_or(0)
    }
}

#[test]
fn test_custom_capability_round_trip() {
    let ws = Workspace::new();
    let mut service = DbService::new(ws.props());
    assert!(service.start_up());
    assert!(service.get_query_interface::<dyn MetricCounter>().is_none());

    service.register_query_interface::<dyn MetricCounter, _>(|cx| {
        Arc::new(TableCounter {
            dynamic: DefaultQueryInterface::new(cx.validation.clone()),
        })
    });

    let counter = service.get_query_interface::<dyn MetricCounter>().unwrap();
    let sessions = service.session_manager().unwrap();
    let mut ctx = SessionContext::new();
    assert!(sessions.start_session(&mut ctx));
    assert_eq!(counter.count(&mut ctx), 0);
}

#[test]
fn test_with_engine_marks_service_started() {
    let ws = Workspace::new();
    let mut bootstrap = DbService::new(ws.props());
    assert!(bootstrap.start_up());
    let engine: Arc<dyn PersistenceEngine> = bootstrap.engine().unwrap();

    let initialised = Arc::new(AtomicBool::new(false));
    let service = DbService::with_engine(engine, initialised.clone());

    assert!(initialised.load(Ordering::SeqCst));
    assert!(service.is_initialised());
    assert!(service.query_interface().is_some());
    assert!(service.properties().is_empty());
}

#[test]
fn test_bad_properties_leave_service_stopped() {
    let mut service = DbService::new(PropertyBag::new().with("db", "sqlite"));

    assert!(!service.start_up());
    assert!(service.engine().is_none());
}
