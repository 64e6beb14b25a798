//! Tally CLI
//!
//! Command-line tools for Tally entity schemas.
//!
//! # Commands
//!
//! - `check` - Build a registry from a schema file and show each entity's layout
//! - `run` - Run a scripted transaction against an in-memory database

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Tally command-line schema tools.
#[derive(Debug, Parser)]
#[command(name = "tally")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build a registry from a schema file and show each entity's layout
    Check {
        /// Schema file (JSON)
        schema: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run a scripted transaction against an in-memory database
    Run {
        /// Schema file (JSON)
        schema: PathBuf,

        /// Script file (JSON)
        script: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

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
        Commands::Check { schema, format } => {
            commands::check::run(&schema, &format)?;
        }
        Commands::Run {
            schema,
            script,
            format,
        } => {
            commands::run::run(&schema, &script, &format)?;
        }
        Commands::Version => {
            println!("Tally CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
