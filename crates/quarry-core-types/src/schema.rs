//! Canonical schema constants for structured logging and events
//!
//! These constants keep field names identical across the session, query and
//! engine layers so log consumers can filter on them.

// Canonical field keys for structured logging
pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";
pub const FIELD_SESSION_ID: &str = "session_id";
pub const FIELD_WORKER_ID: &str = "worker_id";

// Entity identifiers
pub const FIELD_ENTITY: &str = "entity";
pub const FIELD_ENTITY_ID: &str = "entity_id";

// Query shape
pub const FIELD_QUERY: &str = "query";
pub const FIELD_ROW_COUNT: &str = "row_count";

// Error fields
pub const FIELD_ERR_KIND: &str = "err.kind";
pub const FIELD_ERR_CODE: &str = "err.code";
pub const FIELD_SQL_STATE: &str = "sql_state";
pub const FIELD_VENDOR_CODE: &str = "vendor_code";

// Canonical event names
pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";
pub const EVENT_NO_SESSION: &str = "no_session";
pub const EVENT_SESSION_TERMINATED: &str = "session_terminated";
