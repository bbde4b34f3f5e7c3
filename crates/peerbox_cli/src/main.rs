//! Peerbox CLI
//!
//! Command-line tools for running and administering a Peerbox node.
//!
//! # Commands
//!
//! - `run` - Run a node from a configuration file
//! - `keygen` - Generate an identity key pair
//! - `group` - Create groups and manage their membership
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Peerbox command-line tools.
#[derive(Parser)]
#[command(name = "peerbox")]
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
    /// Run a node from a configuration file
    Run {
        /// Path to the node configuration file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Generate an identity key pair
    Keygen {
        /// Where to write the key file
        #[arg(short, long)]
        output: PathBuf,

        /// Overwrite an existing key file
        #[arg(short, long)]
        force: bool,
    },

    /// Create groups and manage their membership
    Group {
        /// Path to the group definitions file
        #[arg(short, long)]
        file: PathBuf,

        #[command(subcommand)]
        action: commands::group::GroupAction,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run { config } => commands::run::run(&config)?,
        Commands::Keygen { output, force } => commands::keygen::run(&output, force)?,
        Commands::Group { file, action } => commands::group::run(&file, action)?,
        Commands::Version => {
            println!("Peerbox CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Protocol v{}", peerbox_proto::PROTOCOL_VERSION);
        }
    }

    Ok(())
}
