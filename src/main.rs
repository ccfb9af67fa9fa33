//! # Contact Ledger CLI (`cledger`)
//!
//! The `cledger` binary is the primary interface for Contact Ledger. It
//! provides commands for database initialization, file import, filtered
//! export, snapshot and report inspection, and starting the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! cledger --config ./config/ledger.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cledger init` | Create the SQLite database and run schema migrations |
//! | `cledger import <file>` | Ingest a CSV or XLSX file |
//! | `cledger export` | Export filtered records to CSV or XLSX |
//! | `cledger snapshots list` | List export snapshots, newest first |
//! | `cledger snapshots show <id>` | Print snapshot metadata |
//! | `cledger snapshots items <id>` | Replay a page of a snapshot (redacted) |
//! | `cledger report <id>` | Print an upload report |
//! | `cledger stats` | Database statistics |
//! | `cledger serve` | Start the HTTP server |
//!
//! Logs go to stderr and honour `RUST_LOG` (default `info`); command output
//! goes to stdout.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use contact_ledger_core::models::Actor;
use contact_ledger_core::schema::split_field_list;
use contact_ledger::{audit, config, export, migrate, server, stats, upload};

/// Contact Ledger CLI: contact spreadsheet ingestion with dedup,
/// idempotent upserts, and replayable export snapshots.
#[derive(Parser)]
#[command(
    name = "cledger",
    about = "Contact Ledger — contact spreadsheet ingestion, export, and snapshot replay",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ledger.toml")]
    config: PathBuf,

    /// Username recorded on reports, snapshots, and activities.
    #[arg(long, global = true)]
    actor: Option<String>,

    /// User id recorded alongside the username.
    #[arg(long, global = true)]
    actor_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Ingest a CSV or XLSX file.
    ///
    /// Rows are normalized, checked for duplicates, and upserted by EmailID.
    /// Rows without an EmailID are always inserted as new records.
    Import {
        /// Path to a `.csv` or `.xlsx` file.
        file: PathBuf,

        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Export records to CSV or XLSX and capture a snapshot.
    Export {
        /// Case-insensitive search over name, email, company, and job fields.
        #[arg(long)]
        search: Option<String>,

        /// Field filter `FIELD=VALUE`. `FIELD==v` matches exactly, `FIELD=a,b`
        /// matches any listed value, otherwise a substring match. Repeatable.
        #[arg(short = 'f', long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,

        /// Output format: `csv` or `xlsx`.
        #[arg(long, default_value = "csv")]
        format: String,

        /// Comma-separated column list. Defaults to every column.
        #[arg(long)]
        fields: Option<String>,

        /// Output file. Defaults to a timestamped name in the current directory.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inspect export snapshots.
    Snapshots {
        #[command(subcommand)]
        action: SnapshotAction,
    },

    /// Print an upload report by id.
    Report {
        id: String,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show database statistics.
    Stats {
        /// Print the statistics as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// List snapshots, newest first.
    List {
        /// Only snapshots taken by this username.
        #[arg(long)]
        username: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: u64,

        #[arg(long)]
        limit: Option<u64>,

        /// Print the listing as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print snapshot metadata as JSON.
    Show { id: String },

    /// Replay one page of a snapshot as JSON, with sensitive fields masked.
    Items {
        id: String,

        #[arg(long, default_value_t = 1)]
        page: u64,

        #[arg(long)]
        limit: Option<u64>,
    },
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((field, value)) if !field.trim().is_empty() => {
            Ok((field.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected FIELD=VALUE, got '{}'", raw)),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;
    let actor = match cli.actor {
        Some(username) => Actor::new(cli.actor_id, username),
        None => Actor {
            id: cli.actor_id,
            ..Actor::anonymous()
        },
    };

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { file, json } => {
            upload::run_import(&cfg, &file, actor, json).await?;
        }
        Commands::Export {
            search,
            filters,
            format,
            fields,
            output,
        } => {
            let request = export::ExportRequest {
                search,
                format: Some(format),
                fields: fields.as_deref().map(split_field_list),
                filters,
            };
            export::run_export(&cfg, &request, actor, output.as_deref()).await?;
        }
        Commands::Snapshots { action } => match action {
            SnapshotAction::List {
                username,
                page,
                limit,
                json,
            } => {
                audit::run_snapshot_list(&cfg, username.as_deref(), page, limit, json).await?;
            }
            SnapshotAction::Show { id } => {
                audit::run_snapshot_show(&cfg, &id).await?;
            }
            SnapshotAction::Items { id, page, limit } => {
                audit::run_snapshot_items(&cfg, &id, page, limit).await?;
            }
        },
        Commands::Report { id, json } => {
            audit::run_report(&cfg, &id, json).await?;
        }
        Commands::Stats { json } => {
            stats::run_stats(&cfg, json).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
