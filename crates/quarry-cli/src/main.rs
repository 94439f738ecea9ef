//! quarry CLI
//!
//! Command-line access to a quarry database

use clap::{Parser, Subcommand};
use quarry_core::logging_facility::{self, Profile};
use std::path::PathBuf;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "quarry")]
#[command(about = "quarry - sessions and queries over a relational store", long_about = None)]
struct Cli {
    /// TOML file with a [db] section; QUARRY_DB* variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the service and round-trip a session
    Check,
    /// Run a query and print the rows
    Query(commands::query::QueryArgs),
    /// Run an insert/update/delete statement and commit it
    Update(commands::update::UpdateArgs),
}

fn main() {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    logging_facility::init(if cli.json_logs {
        Profile::Production
    } else {
        Profile::Development
    });

    let result = commands::load_service(cli.config.as_deref()).and_then(|service| {
        match cli.command {
            Commands::Check => commands::check::execute(&service),
            Commands::Query(args) => commands::query::execute(&service, args),
            Commands::Update(args) => commands::update::execute(&service, args),
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
