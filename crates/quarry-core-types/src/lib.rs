//! Core types shared across quarry facilities
//!
//! This crate provides foundational types used by the error, logging and
//! session layers:
//!
//! - **Correlation types**: SessionId, WorkerId
//! - **Sensitive data**: Sensitive<T> marker for credential redaction
//! - **Schema constants**: Canonical log field keys and event names

pub mod correlation;
pub mod schema;
pub mod sensitive;

pub use correlation::{SessionId, WorkerId};
pub use sensitive::Sensitive;
