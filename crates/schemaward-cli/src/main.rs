mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use schemaward_config::parse_owner_id;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "schemaward", version, about = "Apply owner-checked SQLite migrations")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply every pending statement in one exclusive transaction
    Migrate(Target),
    /// Show owner id, schema generation and version of a database
    Status {
        #[command(flatten)]
        target: Target,

        /// Print the state as JSON
        #[arg(long)]
        json: bool,
    },
}

// Where to find the database, its owner id and the statement list.
// Flags take precedence over environment variables and the config file.
#[derive(Args, Debug, Default, Clone)]
struct Target {
    /// Config file (YAML or TOML)
    #[arg(short, long, env = "SCHEMAWARD_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Application id, decimal or 0x-prefixed hex
    #[arg(long, value_parser = owner_id_arg)]
    owner_id: Option<u32>,

    /// Directory of *.sql files, applied in file name order
    #[arg(long)]
    dir: Option<PathBuf>,
}

fn owner_id_arg(raw: &str) -> std::result::Result<u32, String> {
    parse_owner_id(raw).map_err(|e| e.to_string())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Migrate(target) => commands::migrate(target).await,
        Command::Status { target, json } => commands::status(target, json),
    }
}
