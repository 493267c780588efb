//! raftwal CLI
//!
//! Offline tools for raftwal log directories. None of the commands take the
//! directory lock or modify a file.
//!
//! # Commands
//!
//! - `inspect` - List segment files and their sizes
//! - `verify` - Replay the log read-only and report what a writer would see
//! - `dump` - Print every record for debugging

mod commands;

use clap::{Parser, Subcommand};
use commands::Format;
use raftwal_core::SnapshotBoundary;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// raftwal command-line log tools.
#[derive(Parser)]
#[command(name = "raftwal")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the log directory
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
    /// List segment files
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify log integrity from a snapshot boundary
    Verify {
        /// Snapshot index to replay from
        #[arg(short, long, default_value = "0")]
        index: u64,

        /// Term of the snapshot at `index`
        #[arg(short, long, default_value = "0")]
        term: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Dump log records for debugging
    Dump {
        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

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
            let path = cli.path.ok_or("Log path required for inspect")?;
            debug!(path = %path.display(), "running inspect");
            commands::inspect::run(&path, Format::parse(&format)?)?;
        }
        Commands::Verify {
            index,
            term,
            format,
        } => {
            let path = cli.path.ok_or("Log path required for verify")?;
            debug!(path = %path.display(), "running verify");
            let boundary = SnapshotBoundary::new(index, term);
            commands::verify::run(&path, boundary, Format::parse(&format)?)?;
        }
        Commands::Dump { limit, format } => {
            let path = cli.path.ok_or("Log path required for dump")?;
            debug!(path = %path.display(), "running dump");
            commands::dump::run(&path, limit, Format::parse(&format)?)?;
        }
        Commands::Version => {
            println!("raftwal CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("raftwal core v{}", raftwal_core::VERSION);
        }
    }

    Ok(())
}
