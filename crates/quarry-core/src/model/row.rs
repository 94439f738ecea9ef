use super::value::{FromValue, Value};
use crate::errors::QueryError;

/// A result row: ordered column names with their values
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Build a row; `columns` and `values` are paired by position
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Look up a value by column name (case-insensitive, like SQL)
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|i| self.values.get(i))
    }

    /// Fetch and convert a column value
    ///
    /// # Errors
    ///
    /// Returns `QueryError::ResultMapping` if the column is absent or its
    /// value does not convert to `T`.
    pub fn try_get<T: FromValue>(&self, column: &str) -> Result<T, QueryError> {
        let value = self.get(column).ok_or_else(|| QueryError::ResultMapping {
            entity: "row".to_string(),
            reason: format!("no column named '{}'", column),
        })?;
        T::from_value(value).map_err(|e| match e {
            QueryError::ResultMapping { entity, reason } => QueryError::ResultMapping {
                entity,
                reason: format!("column '{}': {}", column, reason),
            },
            other => other,
        })
    }
}
