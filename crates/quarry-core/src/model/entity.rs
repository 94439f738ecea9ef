use super::row::Row;
use super::value::Value;
use crate::errors::QueryError;

/// Static table layout of an entity type
#[derive(Debug, PartialEq, Eq)]
pub struct EntityMapping {
    /// Entity type name used in logs and errors
    pub entity: &'static str,
    pub table: &'static str,
    /// Surrogate numeric primary key column
    pub id_column: &'static str,
    /// Non-id columns, in the order `Entity::to_values` produces them
    pub columns: &'static [&'static str],
}

impl EntityMapping {
    /// Whether `name` is the id column or a mapped column
    pub fn has_column(&self, name: &str) -> bool {
        self.id_column.eq_ignore_ascii_case(name)
            || self.columns.iter().any(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn key(&self, id: i64) -> EntityKey {
        EntityKey {
            table: self.table,
            id,
        }
    }
}

/// Identity of a persisted instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub table: &'static str,
    pub id: i64,
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.table, self.id)
    }
}

/// A persisted domain object identified by a surrogate numeric id
///
/// # Example
///
/// ```
/// use quarry_core::errors::QueryError;
/// use quarry_core::model::{Entity, EntityMapping, Row, Value};
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct Project {
///     id: Option<i64>,
///     name: String,
/// }
///
/// static PROJECT: EntityMapping = EntityMapping {
///     entity: "Project",
///     table: "project",
///     id_column: "id",
///     columns: &["name"],
/// };
///
/// impl Entity for Project {
///     fn mapping() -> &'static EntityMapping {
///         &PROJECT
///     }
///     fn id(&self) -> Option<i64> {
///         self.id
///     }
///     fn set_id(&mut self, id: i64) {
///         self.id = Some(id);
///     }
///     fn to_values(&self) -> Vec<Value> {
///         vec![self.name.clone().into()]
///     }
///     fn from_row(row: &Row) -> Result<Self, QueryError> {
///         Ok(Project {
///             id: row.try_get("id")?,
///             name: row.try_get("name")?,
///         })
///     }
/// }
/// ```
pub trait Entity: Clone + Send + 'static {
    fn mapping() -> &'static EntityMapping;

    /// `None` until the instance has been persisted
    fn id(&self) -> Option<i64>;

    fn set_id(&mut self, id: i64);

    /// Values for `mapping().columns`, in the same order
    fn to_values(&self) -> Vec<Value>;

    /// # Errors
    ///
    /// Returns `QueryError::ResultMapping` if the row does not carry the
    /// mapped columns with compatible types.
    fn from_row(row: &Row) -> Result<Self, QueryError>;
}

/// Object-safe view of an entity, for heterogeneous batches
pub trait Record: Send {
    fn record_mapping(&self) -> &'static EntityMapping;
    fn record_id(&self) -> Option<i64>;
    fn assign_id(&mut self, id: i64);
    fn record_values(&self) -> Vec<Value>;
}

impl<T: Entity> Record for T {
    fn record_mapping(&self) -> &'static EntityMapping {
        T::mapping()
    }

    fn record_id(&self) -> Option<i64> {
        self.id()
    }

    fn assign_id(&mut self, id: i64) {
        self.set_id(id);
    }

    fn record_values(&self) -> Vec<Value> {
        self.to_values()
    }
}
