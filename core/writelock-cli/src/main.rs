//! writelock: operator CLI for the shared data file write lock.
//!
//! ## Subcommands
//!
//! - `init`: create the session table next to the shared data
//! - `status`: show who holds the lock
//! - `hold`: take the lock and keep it alive for a while
//! - `sweep`: remove stale holders
//! - `force-unlock`: administrative takeover

mod commands;
mod logging;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use writelock_core::config::MAX_STALE_TIMEOUT_MINUTES;

#[derive(Parser)]
#[command(name = "writelock")]
#[command(about = "Single-writer lock for a shared data file")]
#[command(version)]
struct Cli {
    /// Shared data file (the lock file sits next to it)
    #[arg(long, value_name = "PATH")]
    data_file: PathBuf,

    /// Config file (defaults to ~/.writelock/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the session table in the shared data file
    Init,

    /// Print the current lock holder
    Status {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Acquire the write lock and hold it with heartbeats
    Hold {
        #[arg(long)]
        user_id: i64,

        #[arg(long)]
        username: String,

        /// How long to hold the lock before releasing
        #[arg(long, default_value_t = 60)]
        seconds: u64,
    },

    /// Remove write locks whose heartbeat is older than the timeout
    Sweep {
        /// Overrides the configured stale timeout
        #[arg(
            long,
            value_parser = clap::value_parser!(u64).range(1..=MAX_STALE_TIMEOUT_MINUTES)
        )]
        timeout_minutes: Option<u64>,
    },

    /// Remove the lock regardless of holder (administrators only)
    ForceUnlock {
        #[arg(long)]
        admin_id: i64,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();

    let config = match writelock_core::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load config");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Init => commands::init(&cli.data_file, &config),
        Commands::Status { json } => commands::status(&cli.data_file, config, json),
        Commands::Hold {
            user_id,
            username,
            seconds,
        } => commands::hold(&cli.data_file, config, user_id, &username, seconds),
        Commands::Sweep { timeout_minutes } => {
            commands::sweep(&cli.data_file, config, timeout_minutes)
        }
        Commands::ForceUnlock { admin_id } => {
            commands::force_unlock(&cli.data_file, config, admin_id)
        }
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "writelock failed");
        std::process::exit(1);
    }
}
