//! Value, row and entity model
//!
//! Entities are plain Rust structs that describe their table layout through
//! a static [`EntityMapping`] and convert to and from column values.

pub mod entity;
pub mod row;
pub mod value;

pub use entity::{Entity, EntityKey, EntityMapping, Record};
pub use row::Row;
pub use value::{FromValue, Value};

use std::collections::BTreeMap;

/// Property filter: column name to required value, in deterministic order
pub type Properties = BTreeMap<String, Value>;
