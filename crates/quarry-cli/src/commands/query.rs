//! Query command
//!
//! Usage: quarry query <TEXT> [--param name=value]... [--limit N] [--offset N]

use super::{collect_params, open_session, parse_param, CommandResult};
use clap::Args;
use quarry_core::model::{Row, Value};
use quarry_core::query::{DynamicQuery, DynamicQueryInterface};
use quarry_engine::DbService;

#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Query text, e.g. "from metric as m where m.mnemonic = :m"
    pub text: String,

    /// Bound parameter (repeatable)
    #[arg(long = "param", value_parser = parse_param)]
    pub params: Vec<(String, Value)>,

    /// Maximum rows; negative returns every row
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub limit: i64,

    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub offset: i64,
}

pub fn execute(service: &DbService, args: QueryArgs) -> CommandResult {
    let dynamic = service
        .get_query_interface::<dyn DynamicQueryInterface>()
        .ok_or("dynamic query capability is not registered")?;
    let (sessions, mut ctx) = open_session(service)?;

    let query = DynamicQuery::new(args.text)
        .params(collect_params(args.params))
        .page(args.offset, args.limit);
    let rows = dynamic.execute_query(&mut ctx, &query)?;
    sessions.rollback_session(&mut ctx);

    print!("{}", render(&rows));
    Ok(())
}

/// Tab-separated rows under a header line
fn render(rows: &[Row]) -> String {
    let Some(first) = rows.first() else {
        return String::from("(no rows)\n");
    };
    let mut out = first.columns().join("\t");
    out.push('\n');
    for row in rows {
        let line: Vec<String> = row.values().iter().map(Value::to_string).collect();
        out.push_str(&line.join("\t"));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_rows() {
        let rows = vec![Row::new(
            vec!["id".into(), "mnemonic".into()],
            vec![Value::Integer(1), Value::from("LOC")],
        )];
        assert_eq!(render(&rows), "id\tmnemonic\n1\tLOC\n");
        assert_eq!(render(&[]), "(no rows)\n");
    }
}
