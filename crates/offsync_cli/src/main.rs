//! offsync CLI
//!
//! Command-line tools for a client's queue directory. Read-only commands
//! replay the journal without taking the directory lock; maintenance
//! commands open the queue and fail if an application holds it.
//!
//! # Commands
//!
//! - `inspect` - Display journal statistics and status counts
//! - `list` - List queued operations
//! - `dump-log` - Dump journal records for debugging
//! - `verify` - Verify journal integrity
//! - `purge` - Remove settled operations
//! - `retry` - Move a failed or conflicted operation back to pending
//! - `compact` - Rewrite the journal with live records only

mod commands;

use clap::{Parser, Subcommand};
use offsync_protocol::{OperationId, OperationStatus};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// offsync queue maintenance tools.
#[derive(Parser)]
#[command(name = "offsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the queue directory
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
    /// Display journal statistics and status counts
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List queued operations in drain order
    List {
        /// Only show operations with this status
        #[arg(short, long)]
        status: Option<OperationStatus>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Dump journal records for debugging
    DumpLog {
        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Skip records before this offset
        #[arg(short, long, default_value = "0")]
        offset: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify journal integrity
    Verify,

    /// Remove completed and superseded operations past retention
    Purge {
        /// Also remove every failed operation
        #[arg(long)]
        failed: bool,
    },

    /// Move a failed or conflicted operation back to pending
    Retry {
        /// Operation id
        id: OperationId,
    },

    /// Rewrite the journal with live records only
    Compact,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

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
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Queue path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::List { status, format } => {
            let path = cli.path.ok_or("Queue path required for list")?;
            commands::list::run(&path, status, &format)?;
        }
        Commands::DumpLog {
            limit,
            offset,
            format,
        } => {
            let path = cli.path.ok_or("Queue path required for dump-log")?;
            commands::dump_log::run(&path, limit, offset, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Queue path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Purge { failed } => {
            let path = cli.path.ok_or("Queue path required for purge")?;
            commands::maintain::purge(&path, failed)?;
        }
        Commands::Retry { id } => {
            let path = cli.path.ok_or("Queue path required for retry")?;
            commands::maintain::retry(&path, &id)?;
        }
        Commands::Compact => {
            let path = cli.path.ok_or("Queue path required for compact")?;
            commands::maintain::compact(&path)?;
        }
        Commands::Version => {
            println!("offsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
