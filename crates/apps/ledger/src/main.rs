//! Ledger - email ingestion for the finance dashboard
//!
//! Command-line host for the mailsync engine: sign in with a Gmail access
//! token, migrate a legacy archive, run Smart Fetch, and export date ranges.

use clap::{Parser, Subcommand};
use log::error;
use std::path::PathBuf;

mod commands;

#[derive(Subcommand)]
enum Command {
    /// Validate a Gmail access token and start a session
    Login {
        #[arg(long)]
        token: String,
    },
    /// End the session and clear cached results
    Logout {},
    /// Show session and archive state
    Status {},
    /// Convert a legacy flat archive into month partitions
    Migrate {},
    /// Fetch mail newer than the archive's latest item
    Fetch {},
    /// Export a date range week by week to a JSON file
    Export {
        /// First day, YYYY-MM-DD
        #[arg(long)]
        start: chrono::NaiveDate,
        /// Last day (inclusive), YYYY-MM-DD
        #[arg(long)]
        end: chrono::NaiveDate,
        #[arg(long, default_value = "export.json")]
        output: PathBuf,
    },
    /// Inspect or clear the local result cache
    Cache {
        #[arg(long, action, default_value = "false")]
        clear: bool,
    },
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let cli = Cli::parse();
    if let Err(e) = commands::run(cli.command).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
