use quarry_core_types::SessionId;
use thiserror::Error;

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

// ========== Error Facility ==========

/// The four failure categories of the database facade
///
/// Only [`ErrorCategory::QueryShape`] is allowed to cross the facade
/// boundary as an error value; every other category is logged and turned
/// into a sentinel return (`false`, `None`, empty list).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing/invalid startup properties, unknown capability types
    Configuration,
    /// Operation attempted without an active session
    SessionState,
    /// Malformed query text or parameters (caller bug)
    QueryShape,
    /// Broken connection, constraint violation, deadlock
    EngineConnectivity,
}

impl ErrorCategory {
    /// Whether errors of this category propagate to the caller
    pub fn propagates(&self) -> bool {
        matches!(self, ErrorCategory::QueryShape)
    }
}

/// Canonical error kind taxonomy
///
/// Each kind maps to a stable error code used in log fields and tests, and
/// to exactly one [`ErrorCategory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    // Configuration
    Configuration,
    UnknownDialect,
    UnknownCapability,
    NotInitialised,

    // Session state
    NoActiveSession,
    SessionClosed,

    // Query shape
    QueryShape,
    InvalidProperty,
    ResultMapping,

    // Engine / connectivity
    ConstraintViolation,
    Busy,
    Connectivity,
    Io,
    SchemaSource,
    Persistence,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::Configuration => "ERR_CONFIGURATION",
            ExErrorKind::UnknownDialect => "ERR_UNKNOWN_DIALECT",
            ExErrorKind::UnknownCapability => "ERR_UNKNOWN_CAPABILITY",
            ExErrorKind::NotInitialised => "ERR_NOT_INITIALISED",
            ExErrorKind::NoActiveSession => "ERR_NO_ACTIVE_SESSION",
            ExErrorKind::SessionClosed => "ERR_SESSION_CLOSED",
            ExErrorKind::QueryShape => "ERR_QUERY_SHAPE",
            ExErrorKind::InvalidProperty => "ERR_INVALID_PROPERTY",
            ExErrorKind::ResultMapping => "ERR_RESULT_MAPPING",
            ExErrorKind::ConstraintViolation => "ERR_CONSTRAINT_VIOLATION",
            ExErrorKind::Busy => "ERR_BUSY",
            ExErrorKind::Connectivity => "ERR_CONNECTIVITY",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::SchemaSource => "ERR_SCHEMA_SOURCE",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }

    /// Get the failure category this kind belongs to
    pub fn category(&self) -> ErrorCategory {
        match self {
            ExErrorKind::Configuration
            | ExErrorKind::UnknownDialect
            | ExErrorKind::UnknownCapability
            | ExErrorKind::NotInitialised => ErrorCategory::Configuration,
            ExErrorKind::NoActiveSession | ExErrorKind::SessionClosed => {
                ErrorCategory::SessionState
            }
            ExErrorKind::QueryShape | ExErrorKind::InvalidProperty | ExErrorKind::ResultMapping => {
                ErrorCategory::QueryShape
            }
            ExErrorKind::ConstraintViolation
            | ExErrorKind::Busy
            | ExErrorKind::Connectivity
            | ExErrorKind::Io
            | ExErrorKind::SchemaSource
            | ExErrorKind::Persistence
            | ExErrorKind::Internal => ErrorCategory::EngineConnectivity,
        }
    }
}

/// Canonical structured error type
///
/// Carries classification fields for programmatic handling and the
/// engine-level detail (`sql_state`, `vendor_code`) the validation guard
/// logs for every link of a cause chain.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    entity: Option<String>,
    entity_id: Option<i64>,
    session_id: Option<SessionId>,
    message: String,
    sql_state: Option<String>,
    vendor_code: Option<i32>,
    source: Option<Box<ExError>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            entity: None,
            entity_id: None,
            session_id: None,
            message: String::new(),
            sql_state: None,
            vendor_code: None,
            source: None,
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add entity type context
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    /// Add entity id context
    pub fn with_entity_id(mut self, id: i64) -> Self {
        self.entity_id = Some(id);
        self
    }

    /// Add session context
    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add the engine state code (e.g. SQLite primary result code)
    pub fn with_sql_state(mut self, state: impl Into<String>) -> Self {
        self.sql_state = Some(state.into());
        self
    }

    /// Add the vendor error code (e.g. SQLite extended result code)
    pub fn with_vendor_code(mut self, code: i32) -> Self {
        self.vendor_code = Some(code);
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Get the failure category
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Get the operation context, if any
    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    /// Get the entity type context, if any
    pub fn entity(&self) -> Option<&str> {
        self.entity.as_deref()
    }

    /// Get the entity id context, if any
    pub fn entity_id(&self) -> Option<i64> {
        self.entity_id
    }

    /// Get the session context, if any
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the engine state code, if any
    pub fn sql_state(&self) -> Option<&str> {
        self.sql_state.as_deref()
    }

    /// Get the vendor error code, if any
    pub fn vendor_code(&self) -> Option<i32> {
        self.vendor_code
    }

    /// Get the source error, if any
    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }

    /// Iterate over this error and every chained cause, outermost first
    pub fn chain(&self) -> impl Iterator<Item = &ExError> {
        std::iter::successors(Some(self), |e| e.source_error())
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(entity) = &self.entity {
            write!(f, " (entity: {})", entity)?;
        }
        if let Some(id) = self.entity_id {
            write!(f, " (id: {})", id)?;
        }
        if let Some(state) = &self.sql_state {
            write!(f, " (state: {})", state)?;
        }
        if let Some(code) = self.vendor_code {
            write!(f, " (vendor code: {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// ========== End Error Facility ==========

/// Errors in how a query was constructed
///
/// This is the only error type that crosses the facade boundary: it means
/// the caller built a bad query, not that the store is unavailable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// A placeholder in the query text has no bound value
    #[error("Missing value for query parameter :{name}")]
    MissingParameter { name: String },

    /// A bound parameter does not appear in the query text
    #[error("Query has no parameter named :{name}")]
    UnknownParameter { name: String },

    /// A parameter value has the wrong runtime shape
    #[error("Invalid query parameter type for :{name}: {reason}")]
    InvalidParameterType { name: String, reason: String },

    /// Property filter names something that is not a column identifier
    #[error("Invalid property '{property}' for entity {entity}")]
    InvalidProperty { entity: String, property: String },

    /// Pessimistic lock requested on a query without the primary alias
    #[error("Lock requested but query has no primary alias '{alias}'")]
    MissingLockAlias { alias: String },

    /// The engine rejected the query text
    #[error("Malformed query: {reason}")]
    Malformed { reason: String },

    /// A result row could not be mapped onto the requested entity type
    #[error("Cannot map result row onto {entity}: {reason}")]
    ResultMapping { entity: String, reason: String },
}

impl From<QueryError> for ExError {
    fn from(err: QueryError) -> Self {
        let kind = match &err {
            QueryError::InvalidProperty { .. } => ExErrorKind::InvalidProperty,
            QueryError::ResultMapping { .. } => ExErrorKind::ResultMapping,
            _ => ExErrorKind::QueryShape,
        };
        let mut ex = ExError::new(kind).with_message(err.to_string());
        match err {
            QueryError::InvalidProperty { entity, .. } | QueryError::ResultMapping { entity, .. } => {
                ex = ex.with_entity(entity);
            }
            _ => {}
        }
        ex
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_distinct_code() {
        let kinds = [
            ExErrorKind::Configuration,
            ExErrorKind::UnknownDialect,
            ExErrorKind::UnknownCapability,
            ExErrorKind::NotInitialised,
            ExErrorKind::NoActiveSession,
            ExErrorKind::SessionClosed,
            ExErrorKind::QueryShape,
            ExErrorKind::InvalidProperty,
            ExErrorKind::ResultMapping,
            ExErrorKind::ConstraintViolation,
            ExErrorKind::Busy,
            ExErrorKind::Connectivity,
            ExErrorKind::Io,
            ExErrorKind::SchemaSource,
            ExErrorKind::Persistence,
            ExErrorKind::Internal,
        ];
        let mut codes: Vec<_> = kinds.iter().map(|k| k.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn test_only_query_shape_propagates() {
        assert!(ExErrorKind::QueryShape.category().propagates());
        assert!(ExErrorKind::ResultMapping.category().propagates());
        assert!(!ExErrorKind::Connectivity.category().propagates());
        assert!(!ExErrorKind::NoActiveSession.category().propagates());
        assert!(!ExErrorKind::UnknownCapability.category().propagates());
    }

    #[test]
    fn test_display_includes_engine_detail() {
        let err = ExError::new(ExErrorKind::ConstraintViolation)
            .with_op("add_records")
            .with_message("UNIQUE constraint failed")
            .with_entity("metric")
            .with_entity_id(7)
            .with_sql_state("ConstraintViolation")
            .with_vendor_code(2067);
        let text = err.to_string();
        assert!(text.starts_with("[ERR_CONSTRAINT_VIOLATION]"));
        assert!(text.contains("add_records"));
        assert!(text.contains("(id: 7)"));
        assert!(text.contains("2067"));
    }

    #[test]
    fn test_chain_walks_all_causes() {
        let root = ExError::new(ExErrorKind::Io).with_message("disk I/O error");
        let mid = ExError::new(ExErrorKind::Persistence)
            .with_message("statement failed")
            .with_source(root);
        let top = ExError::new(ExErrorKind::Connectivity)
            .with_message("commit failed")
            .with_source(mid);

        let kinds: Vec<_> = top.chain().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                ExErrorKind::Connectivity,
                ExErrorKind::Persistence,
                ExErrorKind::Io
            ]
        );
        assert!(std::error::Error::source(&top).is_some());
    }

    #[test]
    fn test_query_error_conversion() {
        let ex: ExError = QueryError::InvalidProperty {
            entity: "metric".into(),
            property: "bogus".into(),
        }
        .into();
        assert_eq!(ex.kind(), ExErrorKind::InvalidProperty);
        assert_eq!(ex.entity(), Some("metric"));

        let ex: ExError = QueryError::MissingParameter {
            name: "p".into(),
        }
        .into();
        assert_eq!(ex.code(), "ERR_QUERY_SHAPE");
        assert!(ex.message().contains(":p"));
    }
}
