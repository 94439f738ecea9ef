//! quarry engine - service lifecycle
//!
//! Wires configuration, the SQLite engine, the session manager, the
//! validation guard and the query capability registry into one
//! [`DbService`] with start-up and shut-down hooks.

pub mod service;

pub use service::DbService;
