//! Tally - QuickBooks Online replication worker
//!
//! Keeps a local SQLite copy of customers and invoices up to date.
//!
//! # Commands
//!
//! - `authorize` - Connect a QuickBooks company (opens a browser)
//! - `run` - Sync on a fixed interval until interrupted
//! - `sync` - Run a single cycle and exit
//! - `status` - Show per-type sync state
//! - `history` - Show recent sync cycles
//! - `reset` - Force a full resync of one object type
//! - `logout` - Forget the connected company

mod commands;

use clap::{Parser, Subcommand};
use log::error;
use quickbooks::{ObjectType, Settings};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "tally")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to ~/.config/tally/settings.json)
    #[arg(global = true, short, long)]
    settings: Option<PathBuf>,

    /// Enable debug logging
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect a QuickBooks company via the OAuth consent page
    Authorize,

    /// Sync every interval until Ctrl+C
    Run,

    /// Run one sync cycle and exit
    Sync {
        /// Only sync this object type (customer, invoice)
        #[arg(short = 't', long = "type")]
        object_type: Option<ObjectType>,
    },

    /// Show sync state for the connected company
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Show recent sync cycles
    History {
        /// Only show this object type
        #[arg(short = 't', long = "type")]
        object_type: Option<ObjectType>,

        /// Number of cycles to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Clear the cursor for one object type so the next cycle refetches everything
    Reset {
        object_type: ObjectType,
    },

    /// Revoke and delete the stored token for the connected company
    Logout,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let settings = match &cli.settings {
        Some(path) => Settings::from_file(path)?,
        None => Settings::load()?,
    };

    match cli.command {
        Commands::Authorize => commands::authorize(&settings)?,
        Commands::Run => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(commands::run_worker(settings))?;
        }
        Commands::Sync { object_type } => {
            let report = commands::sync_once(&settings, object_type)?;
            if report.total_errors() > 0 {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Status { json } => commands::status(&settings, json)?,
        Commands::History { object_type, limit } => {
            commands::history(&settings, object_type, limit)?
        }
        Commands::Reset { object_type } => commands::reset(&settings, object_type)?,
        Commands::Logout => commands::logout(&settings)?,
    }

    Ok(ExitCode::SUCCESS)
}
