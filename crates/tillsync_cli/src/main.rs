//! tillsync CLI
//!
//! Command-line tools for inspecting and repairing a till's store
//! directory.
//!
//! # Commands
//!
//! - `status` - Queue counts, store statistics and recovery info
//! - `list` - Queued operations, oldest first
//! - `cache` - Cached records
//! - `verify` - Check every log frame without modifying the log
//! - `ack` - Acknowledge a dead operation
//! - `purge` - Remove completed operations
//! - `compact` - Rewrite the log with live state only

mod commands;

use clap::{Parser, Subcommand};
use commands::Format;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// tillsync store tools.
#[derive(Parser)]
#[command(name = "tillsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show queue counts, store statistics and recovery info
    Status {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// List queued operations, oldest first
    List {
        /// Only this state (pending, in-flight, completed, dead, unresolved, all)
        #[arg(short, long)]
        state: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// List cached records
    Cache {
        /// Only this resource type
        #[arg(short, long)]
        resource: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Verify log integrity without modifying it
    Verify,

    /// Acknowledge a dead operation and remove it from the queue
    Ack {
        /// Operation id
        id: String,
    },

    /// Remove completed operations
    Purge,

    /// Rewrite the log with live state only
    Compact,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Status { format } => {
            let path = cli.path.ok_or("Store path required for status")?;
            commands::status::run(&path, format)?;
        }
        Commands::List { state, format } => {
            let path = cli.path.ok_or("Store path required for list")?;
            commands::list::run(&path, state.as_deref(), format)?;
        }
        Commands::Cache { resource, format } => {
            let path = cli.path.ok_or("Store path required for cache")?;
            commands::cache::run(&path, resource.as_deref(), format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Ack { id } => {
            let path = cli.path.ok_or("Store path required for ack")?;
            commands::ack::run(&path, &id)?;
        }
        Commands::Purge => {
            let path = cli.path.ok_or("Store path required for purge")?;
            commands::purge::run(&path)?;
        }
        Commands::Compact => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path)?;
        }
        Commands::Version => {
            println!("tillsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("tillsync core v{}", tillsync_core::VERSION);
        }
    }

    Ok(())
}
