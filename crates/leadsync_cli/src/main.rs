//! leadsync CLI
//!
//! Command-line tools for the lead sync engine.
//!
//! # Commands
//!
//! - `plan` - Dry-run a reconciliation pass against a lead snapshot
//! - `inspect` - Display lead cache statistics

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Lead sync command-line tools.
#[derive(Parser)]
#[command(name = "leadsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile a contacts file against a lead snapshot without sending anything
    Plan {
        /// JSON array of source contacts
        contacts: PathBuf,

        /// JSON array of leads as held by the remote store
        #[arg(short, long)]
        leads: Option<PathBuf>,

        /// JSON sync configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Treat the contacts as the complete source population
        #[arg(long)]
        full: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Display lead cache statistics
    Inspect {
        /// Path to the cache file
        path: PathBuf,

        /// List source identifiers shared by several leads
        #[arg(short, long)]
        duplicates: bool,

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
        Commands::Plan {
            contacts,
            leads,
            config,
            full,
            format,
        } => {
            commands::plan::run(&contacts, leads.as_deref(), config.as_deref(), full, &format)?;
        }
        Commands::Inspect {
            path,
            duplicates,
            format,
        } => {
            commands::inspect::run(&path, duplicates, &format)?;
        }
        Commands::Version => {
            println!("leadsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
