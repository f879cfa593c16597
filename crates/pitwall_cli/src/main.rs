//! Pitwall CLI
//!
//! Command-line tools for Pitwall stores and the sync server.
//!
//! # Commands
//!
//! - `serve` - Run the sync server over a store directory
//! - `sync` - Sync a device replica with a server
//! - `inspect` - Display store statistics and metadata
//! - `verify` - Replay the journal and audit queue invariants
//! - `compact` - Rewrite the journal as a single snapshot

mod commands;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Pitwall race-day store and sync tools.
#[derive(Parser)]
#[command(name = "pitwall")]
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
    /// Run the sync server
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Per-request timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,

        /// Disable permissive CORS headers
        #[arg(long)]
        no_cors: bool,
    },

    /// Sync a device replica with a server
    Sync {
        /// Server base URL
        #[arg(short, long, default_value = "http://127.0.0.1:8080")]
        server: String,

        /// Keep running, syncing every interval, until interrupted
        #[arg(short, long)]
        watch: bool,

        /// Seconds between cycles in watch mode, and between retries while offline
        #[arg(short, long, default_value = "30")]
        interval: u64,
    },

    /// Display store statistics and metadata
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Replay the journal and audit queue invariants
    Verify,

    /// Rewrite the journal as a single snapshot
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve {
            bind,
            timeout,
            no_cors,
        } => {
            let path = cli.path.ok_or("Store path required for serve")?;
            commands::serve::run(&path, bind, Duration::from_secs(timeout), !no_cors)?;
        }
        Commands::Sync {
            server,
            watch,
            interval,
        } => {
            let path = cli.path.ok_or("Store path required for sync")?;
            commands::sync::run(&path, &server, watch, Duration::from_secs(interval))?;
        }
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("Pitwall CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Pitwall Core v{}", pitwall_core::VERSION);
        }
    }

    Ok(())
}
