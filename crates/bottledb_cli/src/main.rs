//! BottleDB CLI
//!
//! Command-line tools for BottleDB store directories.
//!
//! # Commands
//!
//! - `inspect` - Display the dictionary, record counts and pending journals
//! - `verify` - Check reverse references against the records that hold them
//! - `recover` - Replay or undo interrupted commits

mod commands;
mod error;

use clap::{Parser, Subcommand};
use commands::OutputFormat;
use error::CliError;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// BottleDB command-line store tools.
#[derive(Parser)]
#[command(name = "bottledb")]
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
    /// Display the dictionary, record counts and pending journals
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Check every reverse reference in the store
    Verify {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Roll interrupted commits back or forward
    Recover {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show version information
    Version,
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or(CliError::MissingPath("inspect"))?;
            commands::inspect::run(&path, format)
        }
        Commands::Verify { format } => {
            let path = cli.path.ok_or(CliError::MissingPath("verify"))?;
            commands::verify::run(&path, format)
        }
        Commands::Recover { format } => {
            let path = cli.path.ok_or(CliError::MissingPath("recover"))?;
            commands::recover::run(&path, format)
        }
        Commands::Version => {
            println!("BottleDB CLI v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
