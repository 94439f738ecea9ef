//! Error handling for quarry-store
//!
//! Maps rusqlite failures onto the facade's failure split: statements the
//! engine rejects as written are recoverable query errors, everything else
//! is fatal and carries the SQLite result codes.

use quarry_core::engine::EngineFailure;
use quarry_core::errors::{ExError, ExErrorKind, QueryError};
use rusqlite::ErrorCode;

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

/// Where in a statement's life an error surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prepare,
    Bind,
    Step,
}

fn kind_for(code: ErrorCode) -> ExErrorKind {
    match code {
        ErrorCode::ConstraintViolation => ExErrorKind::ConstraintViolation,
        ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => ExErrorKind::Busy,
        ErrorCode::SystemIoFailure | ErrorCode::DiskFull => ExErrorKind::Io,
        ErrorCode::CannotOpen
        | ErrorCode::NotADatabase
        | ErrorCode::PermissionDenied
        | ErrorCode::FileLockingProtocolFailed => ExErrorKind::Connectivity,
        _ => ExErrorKind::Persistence,
    }
}

/// Fatal error from a rusqlite failure, with the engine detail chained
pub fn from_rusqlite(op: &str, err: rusqlite::Error) -> ExError {
    match &err {
        rusqlite::Error::SqliteFailure(ffi, message) => {
            let detail = ExError::new(kind_for(ffi.code))
                .with_message(message.clone().unwrap_or_else(|| ffi.to_string()))
                .with_sql_state(format!("{:?}", ffi.code))
                .with_vendor_code(ffi.extended_code);
            ExError::new(kind_for(ffi.code))
                .with_op(op)
                .with_message(err.to_string())
                .with_sql_state(format!("{:?}", ffi.code))
                .with_vendor_code(ffi.extended_code)
                .with_source(detail)
        }
        _ => ExError::new(ExErrorKind::Persistence)
            .with_op(op)
            .with_message(err.to_string()),
    }
}

/// Classify a statement failure
pub fn classify(op: &str, phase: Phase, err: rusqlite::Error) -> EngineFailure {
    match (&err, phase) {
        (rusqlite::Error::SqliteFailure(ffi, message), Phase::Prepare)
            if ffi.code == ErrorCode::Unknown =>
        {
            EngineFailure::Recoverable(QueryError::Malformed {
                reason: message.clone().unwrap_or_else(|| ffi.to_string()),
            })
        }
        (rusqlite::Error::InvalidParameterName(name), _) => {
            EngineFailure::Recoverable(QueryError::UnknownParameter {
                name: name.trim_start_matches(':').to_string(),
            })
        }
        (rusqlite::Error::ExecuteReturnedResults, _) => {
            EngineFailure::Recoverable(QueryError::Malformed {
                reason: "statement returns rows; use a query".to_string(),
            })
        }
        (_, Phase::Bind) => EngineFailure::Recoverable(QueryError::Malformed {
            reason: err.to_string(),
        }),
        _ => EngineFailure::Fatal(from_rusqlite(op, err)),
    }
}

/// Create a schema source error
pub fn schema_source_error(source_id: &str, reason: &str) -> ExError {
    ExError::new(ExErrorKind::SchemaSource)
        .with_op("add_schema_source")
        .with_message(format!("Schema source {} failed: {}", source_id, reason))
}

/// Create a checksum mismatch error
pub fn checksum_mismatch(source_id: &str, expected: &str, actual: &str) -> ExError {
    ExError::new(ExErrorKind::SchemaSource)
        .with_op("schema_source_checksum")
        .with_message(format!(
            "Checksum mismatch for schema source {}: recorded {}, found {}",
            source_id, expected, actual
        ))
}

/// Create an IO error
pub fn io_error(operation: &str, err: std::io::Error) -> ExError {
    ExError::new(ExErrorKind::Io)
        .with_op(operation.to_string())
        .with_message(err.to_string())
}

/// Error for calls on a session that was already closed
pub fn session_closed(op: &str) -> EngineFailure {
    EngineFailure::Fatal(
        ExError::new(ExErrorKind::SessionClosed)
            .with_op(op)
            .with_message("session is closed"),
    )
}
