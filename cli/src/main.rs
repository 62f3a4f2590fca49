//! bridgescan CLI — replay block events into a store and inspect the result.
//!
//! # Commands
//! ```text
//! bridgescan run     --config <scanner.yaml> --events <events.jsonl>
//! bridgescan records --db <path> --extractor <id> [--unspent] [--json]
//! bridgescan blocks  --db <path> --scanner <name> [--json]
//! bridgescan info
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use bridgescan_core::{BlockStore, RecordStore, ScannerConfig, ID_CHUNK_SIZE};
use bridgescan_storage::SqliteStorage;

mod cmd_run;
mod config;
mod logging;

use config::RunConfig;
use logging::{init_tracing, LogConfig};

#[derive(Parser)]
#[command(
    name = "bridgescan",
    about = "Fork-consistent bridge scanner — bridgescan CLI",
    long_about = "
bridgescan: apply chain blocks to bridge extractors in height order, undo
them on fork, and keep the extracted records in SQLite.

ENVIRONMENT VARIABLES:
  RUST_LOG    Overrides the configured log filter (e.g. bridgescan_core=debug)
",
    version
)]
struct Cli {
    /// Enable verbose logging for inspection commands
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a block-event file through a scanner into SQLite
    Run {
        /// Path to the YAML scanner config
        #[arg(short, long)]
        config: PathBuf,
        /// Path to the JSON Lines event file
        #[arg(short, long)]
        events: PathBuf,
    },

    /// List records stored by one extractor
    Records {
        /// SQLite database path
        #[arg(long)]
        db: String,
        /// Extractor id
        #[arg(long)]
        extractor: String,
        /// Only records that are not spent
        #[arg(long)]
        unspent: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List blocks a scanner has applied or started applying
    Blocks {
        /// SQLite database path
        #[arg(long)]
        db: String,
        /// Scanner name
        #[arg(long)]
        scanner: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show bridgescan build and default configuration info
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, events } => {
            let config = RunConfig::load(&config)?;
            init_tracing(&config.log);
            cmd_run::run(config, &events).await
        }

        Commands::Records { db, extractor, unspent, json } => {
            init_tracing(&inspect_log(cli.verbose));
            cmd_records(&db, &extractor, unspent, json).await
        }

        Commands::Blocks { db, scanner, json } => {
            init_tracing(&inspect_log(cli.verbose));
            cmd_blocks(&db, &scanner, json).await
        }

        Commands::Info => {
            cmd_info();
            Ok(())
        }
    }
}

fn inspect_log(verbose: bool) -> LogConfig {
    LogConfig::with_level(if verbose { "debug" } else { "warn" })
}

// ─── Command implementations ─────────────────────────────────────────────────

async fn cmd_records(db: &str, extractor: &str, unspent: bool, as_json: bool) -> Result<()> {
    let store = SqliteStorage::open(db)
        .await
        .with_context(|| format!("opening database {db}"))?;

    let rows = if unspent {
        store.unspent(extractor).await?
    } else {
        store.records(extractor).await?
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if rows.is_empty() {
        println!("no records for extractor '{extractor}'");
    } else {
        println!("{:<66} {:>10} {:>10}  spent by", "record", "created", "spent");
        for row in &rows {
            println!(
                "{:<66} {:>10} {:>10}  {}",
                row.record_id,
                row.creation_height,
                row.spend_height.map(|h| h.to_string()).unwrap_or_else(|| "-".into()),
                row.spend_tx_id.as_deref().unwrap_or("-"),
            );
        }
        println!("{} record(s)", rows.len());
    }

    store.close().await;
    Ok(())
}

async fn cmd_blocks(db: &str, scanner: &str, as_json: bool) -> Result<()> {
    let store = SqliteStorage::open(db)
        .await
        .with_context(|| format!("opening database {db}"))?;

    let blocks = store.blocks(scanner).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&blocks)?);
    } else if blocks.is_empty() {
        println!("no blocks for scanner '{scanner}'");
    } else {
        println!("{:>10}  {:<10}  {:<20}  hash", "height", "status", "updated");
        for row in &blocks {
            let updated = chrono::DateTime::<chrono::Utc>::from_timestamp(row.updated_at, 0)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| row.updated_at.to_string());
            println!(
                "{:>10}  {:<10}  {:<20}  {}",
                row.block.height,
                row.status.as_str(),
                updated,
                row.block.hash
            );
        }
    }

    store.close().await;
    Ok(())
}

fn cmd_info() {
    let defaults = ScannerConfig::default();
    println!("bridgescan v{}", env!("CARGO_PKG_VERSION"));
    println!("  Retry ceiling: {} attempts per block", defaults.retry_ceiling);
    println!("  Retry delay: {} ms", defaults.retry_delay_ms);
    println!("  Step delay: {} ms", defaults.step_delay_ms);
    println!("  On retry exhaustion: {:?}", defaults.on_retry_exhausted);
    println!("  Id-list chunk size: {ID_CHUNK_SIZE}");
    println!("  Storage backends: memory, SQLite");
    println!("  Extractors: ergo_box, event_trigger (Ergo node API), cardano_observation (Koios), tx_id (any)");
}
