//! Tidemark CLI
//!
//! Operator tools for Tidemark journal files.
//!
//! # Commands
//!
//! - `inspect` - Display records and sync metadata
//! - `queue` - Dump the outbound operation queue
//! - `conflicts` - List or resolve manual-review conflicts
//! - `status` - Summarize sync health
//! - `compact` - Rewrite the journal as a snapshot

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Tidemark journal tools.
#[derive(Parser)]
#[command(name = "tidemark")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the journal file
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
    /// Display records and their sync metadata
    Inspect {
        /// Include soft-deleted tombstones
        #[arg(short, long)]
        tombstones: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Dump the outbound operation queue
    Queue {
        /// Maximum number of operations to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List or resolve manual-review conflicts
    Conflicts {
        #[command(subcommand)]
        action: ConflictAction,
    },

    /// Summarize sync health
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Rewrite the journal as a snapshot of the live state
    Compact {
        /// Dry run - report reclaimable space without rewriting
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ConflictAction {
    /// List open conflicts
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Resolve one conflict by record key
    Resolve {
        /// The record key (UUID)
        key: String,

        /// Keep the local version and push it
        #[arg(long, conflicts_with = "accept_remote")]
        keep_local: bool,

        /// Accept the remote version, discarding local changes
        #[arg(long)]
        accept_remote: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { tombstones, format } => {
            let path = cli.path.ok_or("Journal path required for inspect")?;
            commands::inspect::run(&path, tombstones, &format)?;
        }
        Commands::Queue { limit, format } => {
            let path = cli.path.ok_or("Journal path required for queue")?;
            commands::queue::run(&path, limit, &format)?;
        }
        Commands::Conflicts { action } => {
            let path = cli.path.ok_or("Journal path required for conflicts")?;
            match action {
                ConflictAction::List { format } => {
                    commands::conflicts::list(&path, &format)?;
                }
                ConflictAction::Resolve {
                    key,
                    keep_local,
                    accept_remote,
                } => {
                    if keep_local == accept_remote {
                        return Err("pass exactly one of --keep-local / --accept-remote".into());
                    }
                    commands::conflicts::resolve(&path, &key, keep_local)?;
                }
            }
        }
        Commands::Status { format } => {
            let path = cli.path.ok_or("Journal path required for status")?;
            commands::status::run(&path, &format)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Journal path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("Tidemark CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
