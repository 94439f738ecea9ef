//! Query capabilities
//!
//! Three capability traits are exposed, each usable as a trait object from
//! the [`registry`](crate::registry):
//!
//! - [`QueryInterface`]: find by id or by properties, add and delete records
//! - [`DynamicQueryInterface`]: parameterised queries with locking and
//!   paging, and bulk updates
//! - [`SqlQueryInterface`]: native SQL that opens its own session when the
//!   caller has none
//!
//! The typed conveniences live in the blanket extension traits
//! [`QueryInterfaceExt`] and [`DynamicQueryExt`].

pub mod dql;
pub mod generic;
pub mod native;
pub mod params;

pub use generic::DefaultQueryInterface;
pub use native::NativeSqlQueryInterface;

use crate::errors::QueryError;
use crate::model::{Entity, EntityMapping, Properties, Record, Row, Value};
use crate::session::SessionContext;
use std::collections::BTreeMap;

/// Named scalar parameters
pub type Params = BTreeMap<String, Value>;

/// Named collection parameters, bound as `IN` lists
pub type ListParams = BTreeMap<String, Vec<Value>>;

/// A result page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: u64,
    pub limit: u64,
}

impl Page {
    /// Page only when both bounds are non-negative
    ///
    /// A negative value for either bound disables paging altogether, even
    /// if the other bound is valid. `limit == 0` is an explicit empty page.
    pub fn from_bounds(offset: i64, limit: i64) -> Option<Page> {
        match (u64::try_from(offset), u64::try_from(limit)) {
            (Ok(offset), Ok(limit)) => Some(Page { offset, limit }),
            _ => None,
        }
    }
}

/// A dynamic query and its bindings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicQuery {
    text: String,
    params: Params,
    list_params: ListParams,
    for_update: bool,
    page: Option<Page>,
}

impl DynamicQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params.extend(params);
        self
    }

    pub fn list_param<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.list_params
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn list_params(mut self, lists: ListParams) -> Self {
        self.list_params.extend(lists);
        self
    }

    /// Lock the rows of the table aliased `foo` until the transaction ends
    pub fn for_update(mut self, for_update: bool) -> Self {
        self.for_update = for_update;
        self
    }

    /// See [`Page::from_bounds`] for how negative bounds behave
    pub fn page(mut self, offset: i64, limit: i64) -> Self {
        self.page = Page::from_bounds(offset, limit);
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn scalar_params(&self) -> &Params {
        &self.params
    }

    pub fn list_param_map(&self) -> &ListParams {
        &self.list_params
    }

    pub fn is_for_update(&self) -> bool {
        self.for_update
    }

    pub fn page_bounds(&self) -> Option<Page> {
        self.page
    }
}

/// Generic entity queries, at row level
///
/// None of these return errors: a missing session or an engine failure is
/// logged and reported through the sentinel (`None`, empty, `false`).
pub trait QueryInterface: Send + Sync {
    fn find_row_by_id(
        &self,
        ctx: &mut SessionContext,
        mapping: &'static EntityMapping,
        id: i64,
        for_update: bool,
    ) -> Option<Row>;

    /// Rows whose columns equal every entry of `properties`
    ///
    /// An invalid property ends the session and opens a fresh one, then
    /// returns an empty list.
    fn find_rows_by_properties(
        &self,
        ctx: &mut SessionContext,
        mapping: &'static EntityMapping,
        properties: &Properties,
        for_update: bool,
    ) -> Vec<Row>;

    /// Insert every record in order, then flush; assigns ids on success
    fn add_records(&self, ctx: &mut SessionContext, records: &mut [&mut dyn Record]) -> bool;

    /// Delete every record in order, then flush
    fn delete_records(&self, ctx: &mut SessionContext, records: &[&dyn Record]) -> bool;
}

fn map_rows<T: Entity>(rows: &[Row]) -> Result<Vec<T>, QueryError> {
    rows.iter()
        .map(|row| {
            T::from_row(row).map_err(|e| match e {
                QueryError::ResultMapping { reason, .. } => QueryError::ResultMapping {
                    entity: T::mapping().entity.to_string(),
                    reason,
                },
                other => other,
            })
        })
        .collect()
}

fn log_mapping_failure(op: &str, err: &QueryError) {
    tracing::error!(component = module_path!(), op, message = %err, "result mapping failed");
}

/// Typed conveniences over [`QueryInterface`]
pub trait QueryInterfaceExt: QueryInterface {
    fn find_by_id<T: Entity>(&self, ctx: &mut SessionContext, id: i64, for_update: bool) -> Option<T> {
        let row = self.find_row_by_id(ctx, T::mapping(), id, for_update)?;
        match map_rows::<T>(std::slice::from_ref(&row)) {
            Ok(mut found) => found.pop(),
            Err(err) => {
                log_mapping_failure("find_by_id", &err);
                None
            }
        }
    }

    fn find_by_properties<T: Entity>(
        &self,
        ctx: &mut SessionContext,
        properties: &Properties,
        for_update: bool,
    ) -> Vec<T> {
        let rows = self.find_rows_by_properties(ctx, T::mapping(), properties, for_update);
        map_rows(&rows).unwrap_or_else(|err| {
            log_mapping_failure("find_by_properties", &err);
            Vec::new()
        })
    }

    fn add_record(&self, ctx: &mut SessionContext, record: &mut dyn Record) -> bool {
        self.add_records(ctx, &mut [record])
    }

    fn add_all<T: Entity>(&self, ctx: &mut SessionContext, records: &mut [T]) -> bool {
        let mut refs: Vec<&mut dyn Record> =
            records.iter_mut().map(|r| r as &mut dyn Record).collect();
        self.add_records(ctx, &mut refs)
    }

    fn delete_record(&self, ctx: &mut SessionContext, record: &dyn Record) -> bool {
        self.delete_records(ctx, &[record])
    }

    fn delete_all<T: Entity>(&self, ctx: &mut SessionContext, records: &[T]) -> bool {
        let refs: Vec<&dyn Record> = records.iter().map(|r| r as &dyn Record).collect();
        self.delete_records(ctx, &refs)
    }
}

impl<Q: QueryInterface + ?Sized> QueryInterfaceExt for Q {}

/// Parameterised queries and bulk updates
///
/// A malformed query (missing, unknown or mistyped parameter, rejected
/// text) is returned as a `QueryError` after the session is rolled back.
/// Engine failures end the session and yield an empty result.
pub trait DynamicQueryInterface: Send + Sync {
    fn execute_query(
        &self,
        ctx: &mut SessionContext,
        query: &DynamicQuery,
    ) -> Result<Vec<Row>, QueryError>;

    /// Run an insert/update/delete statement
    ///
    /// `Ok(None)` means no row count is available: there was no active
    /// session, or the engine failed.
    fn execute_update(
        &self,
        ctx: &mut SessionContext,
        text: &str,
        params: &Params,
    ) -> Result<Option<usize>, QueryError>;
}

/// Shorthand forms over [`DynamicQueryInterface`]
pub trait DynamicQueryExt: DynamicQueryInterface {
    fn do_query(
        &self,
        ctx: &mut SessionContext,
        text: &str,
        params: &Params,
    ) -> Result<Vec<Row>, QueryError> {
        self.execute_query(ctx, &DynamicQuery::new(text).params(params.clone()))
    }

    /// First `limit` rows; a negative limit returns every row
    fn do_query_limit(
        &self,
        ctx: &mut SessionContext,
        text: &str,
        params: &Params,
        limit: i64,
    ) -> Result<Vec<Row>, QueryError> {
        let query = DynamicQuery::new(text).params(params.clone()).page(0, limit);
        self.execute_query(ctx, &query)
    }

    fn do_query_for_update(
        &self,
        ctx: &mut SessionContext,
        text: &str,
        params: &Params,
    ) -> Result<Vec<Row>, QueryError> {
        let query = DynamicQuery::new(text).params(params.clone()).for_update(true);
        self.execute_query(ctx, &query)
    }

    fn query_entities<T: Entity>(
        &self,
        ctx: &mut SessionContext,
        query: &DynamicQuery,
    ) -> Result<Vec<T>, QueryError> {
        let rows = self.execute_query(ctx, query)?;
        map_rows(&rows)
    }
}

impl<Q: DynamicQueryInterface + ?Sized> DynamicQueryExt for Q {}

/// Native SQL with an automatic session
///
/// When the caller has no active session, each call opens one, runs the
/// statement and commits. With an active session the statement joins it.
pub trait SqlQueryInterface: QueryInterface {
    fn do_sql(
        &self,
        ctx: &mut SessionContext,
        sql: &str,
        params: &Params,
    ) -> Result<Vec<Row>, QueryError>;

    fn execute_sql(
        &self,
        ctx: &mut SessionContext,
        sql: &str,
        params: &Params,
    ) -> Result<Option<usize>, QueryError>;
}
