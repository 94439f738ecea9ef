//! Update command
//!
//! Usage: quarry update <TEXT> [--param name=value]...

use super::{collect_params, open_session, parse_param, CommandResult};
use clap::Args;
use quarry_core::model::Value;
use quarry_core::query::DynamicQueryInterface;
use quarry_engine::DbService;

#[derive(Debug, Args)]
pub struct UpdateArgs {
    /// Statement text, e.g. "delete from metric where mnemonic = :m"
    pub text: String,

    /// Bound parameter (repeatable)
    #[arg(long = "param", value_parser = parse_param)]
    pub params: Vec<(String, Value)>,
}

pub fn execute(service: &DbService, args: UpdateArgs) -> CommandResult {
    let dynamic = service
        .get_query_interface::<dyn DynamicQueryInterface>()
        .ok_or("dynamic query capability is not registered")?;
    let (sessions, mut ctx) = open_session(service)?;

    let changed = dynamic
        .execute_update(&mut ctx, &args.text, &collect_params(args.params))?
        .ok_or("statement failed (see log)")?;
    if !sessions.commit_session(&mut ctx) {
        return Err("commit failed (see log)".into());
    }

    println!("{} row(s) updated", changed);
    Ok(())
}
