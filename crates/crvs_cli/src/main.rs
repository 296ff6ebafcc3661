//! Operator CLI for the action ledger.
//!
//! # Responsibility
//! - Inspect a ledger file: record history and projected snapshots.
//! - Drain pending outbox events into the duplicate-candidate index.
//!
//! Reads go straight to the ledger and bypass scope checks; this tool is for
//! operators with file access, not for end users.

use clap::{Parser, Subcommand};
use crvs_core::dedup::SqliteSearchIndex;
use crvs_core::{
    core_version, init_logging, open_db, ActionRepository, OutboxRelay, ProcessSettings, RecordId,
    RecordIndexer, RegistryContext, SqliteActionRepository, SqliteOutboxRepository,
};
use log::info;
use serde_json::json;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Debug, Parser)]
#[command(name = "crvs", version, about = "Civil-registration action ledger tool")]
struct Cli {
    /// Ledger database file. Defaults to CRVS_DB_PATH, then `crvs.sqlite3`.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Registry config file (dedup rules, assignment policy).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the core library version.
    Version,
    /// Print a record's ordered action history as JSON.
    History { record_id: RecordId },
    /// Print a record's projected snapshot as JSON.
    Show { record_id: RecordId },
    /// Deliver pending outbox events to the candidate index.
    Relay {
        /// Maximum events delivered in this pass.
        #[arg(long, default_value_t = 500)]
        limit: u32,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> CliResult<()> {
    let mut settings = ProcessSettings::from_env();
    if let Some(db) = cli.db {
        settings.db_path = db;
    }
    if let Some(config) = cli.config {
        settings.config_path = Some(config);
    }
    if let Some(log_dir) = &settings.log_dir {
        init_logging(&settings.log_level, &log_dir.to_string_lossy())?;
    }

    match cli.command {
        Command::Version => {
            println!("crvs_core version={}", core_version());
            Ok(())
        }
        Command::History { record_id } => history(&settings, record_id),
        Command::Show { record_id } => show(&settings, record_id),
        Command::Relay { limit } => relay(&settings, limit),
    }
}

fn history(settings: &ProcessSettings, record_id: RecordId) -> CliResult<()> {
    let conn = open_db(&settings.db_path)?;
    let actions = SqliteActionRepository::new(&conn).list_actions(record_id)?;
    if actions.is_empty() {
        return Err(format!("record not found: {record_id}").into());
    }
    println!("{}", serde_json::to_string_pretty(&actions)?);
    Ok(())
}

fn show(settings: &ProcessSettings, record_id: RecordId) -> CliResult<()> {
    let context = RegistryContext::from_config(&settings.registry_config()?)?;
    let conn = open_db(&settings.db_path)?;
    let actions = SqliteActionRepository::new(&conn).list_actions(record_id)?;
    let snapshot = context
        .projector
        .project(&actions)?
        .ok_or_else(|| format!("record not found: {record_id}"))?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn relay(settings: &ProcessSettings, limit: u32) -> CliResult<()> {
    let context = RegistryContext::from_config(&settings.registry_config()?)?;
    let conn = open_db(&settings.db_path)?;
    let indexer = RecordIndexer::new(
        SqliteActionRepository::new(&conn),
        SqliteSearchIndex::new(&conn),
        &context.projector,
    );
    let report = OutboxRelay::new(SqliteOutboxRepository::new(&conn)).drain(&indexer, limit)?;
    info!(
        "event=cli_relay module=cli status={} delivered={} remaining={}",
        if report.failed.is_some() { "partial" } else { "ok" },
        report.delivered,
        report.remaining
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "db_path": settings.db_path,
            "report": report,
        }))?
    );
    if let Some(outbox_id) = report.failed {
        return Err(format!("delivery stopped at outbox entry {outbox_id}").into());
    }
    Ok(())
}
