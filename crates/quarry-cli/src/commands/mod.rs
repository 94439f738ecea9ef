//! Sub-command implementations

pub mod check;
pub mod query;
pub mod update;

use quarry_core::config::PropertyBag;
use quarry_core::model::Value;
use quarry_core::query::Params;
use quarry_core::session::{SessionContext, SessionManager};
use quarry_engine::DbService;
use std::path::Path;
use std::sync::Arc;

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Build and start the service from the config file and environment
pub fn load_service(config: Option<&Path>) -> Result<DbService, Box<dyn std::error::Error>> {
    let file = match config {
        Some(path) => PropertyBag::from_toml_file(path)?,
        None => PropertyBag::new(),
    };
    let mut service = DbService::new(file.with_env());
    if !service.start_up() {
        return Err("database service failed to start (see log)".into());
    }
    Ok(service)
}

/// A context with a started session
pub fn open_session(
    service: &DbService,
) -> Result<(Arc<SessionManager>, SessionContext), Box<dyn std::error::Error>> {
    let sessions = service
        .session_manager()
        .ok_or("database service is not started")?;
    let mut ctx = SessionContext::new();
    if !sessions.start_session(&mut ctx) {
        return Err("could not start a session (see log)".into());
    }
    Ok((sessions, ctx))
}

/// Parse `name=value`; integers, reals and `null` are typed, anything
/// else is text
pub fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing parameter name in '{}'", raw));
    }
    let value = if value.eq_ignore_ascii_case("null") {
        Value::Null
    } else if let Ok(i) = value.parse::<i64>() {
        Value::Integer(i)
    } else if let Ok(r) = value.parse::<f64>() {
        Value::Real(r)
    } else {
        Value::Text(value.to_string())
    };
    Ok((name.to_string(), value))
}

pub fn collect_params(pairs: Vec<(String, Value)>) -> Params {
    pairs.into_iter().collect()
}
