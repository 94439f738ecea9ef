//! Connectivity check
//!
//! Usage: quarry check

use super::{open_session, CommandResult};
use quarry_core::engine::PersistenceEngine;
use quarry_engine::DbService;

pub fn execute(service: &DbService) -> CommandResult {
    let (sessions, mut ctx) = open_session(service)?;
    if !sessions.is_session_active(&mut ctx) {
        return Err("session did not become active".into());
    }
    if !sessions.rollback_session(&mut ctx) {
        return Err("session could not be rolled back".into());
    }
    let dialect = service
        .engine()
        .map(|engine| engine.dialect().to_string())
        .unwrap_or_default();
    println!("ok: {} session round-trip succeeded", dialect);
    Ok(())
}
