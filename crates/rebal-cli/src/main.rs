//! rebal CLI
//!
//! Command-line interface for running replica placement against snapshot files.

mod commands;

use clap::{Parser, Subcommand};
use rebal_core::{EngineConfig, LoggingConfig, ResourceOrder};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// rebal - capacity-aware replica placement for partitioned resources
#[derive(Parser, Debug)]
#[command(name = "rebal")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Engine configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compute a replica assignment for a snapshot
    Assign {
        /// Snapshot file (.toml for TOML, anything else JSON)
        #[arg(long)]
        snapshot: PathBuf,

        /// Resource order (largest-first, declared)
        #[arg(long)]
        order: Option<ResourceOrder>,

        /// Abandon the computation after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that a snapshot builds a consistent cluster model
    Validate {
        /// Snapshot file
        #[arg(long)]
        snapshot: PathBuf,
    },

    /// Show the capacity ledger of every live node
    Nodes {
        /// Snapshot file
        #[arg(long)]
        snapshot: PathBuf,
    },
}

fn init_logging(config: &LoggingConfig, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        config.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let _ = match config.format.as_str() {
        "json" => tracing::subscriber::set_global_default(builder.json().finish()),
        _ => tracing::subscriber::set_global_default(builder.finish()),
    };
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    if cli.config.is_none() && !cli.verbose {
        config.logging.level = "warn".to_string();
    }

    init_logging(&config.logging, cli.verbose);

    match cli.command {
        Commands::Assign {
            snapshot,
            order,
            timeout_ms,
            json,
        } => {
            if let Some(order) = order {
                config.placement.resource_order = order;
            }
            if timeout_ms.is_some() {
                config.placement.timeout_ms = timeout_ms;
            }
            commands::assign(config, snapshot, json).await?;
        }
        Commands::Validate { snapshot } => {
            commands::validate(config, &snapshot)?;
        }
        Commands::Nodes { snapshot } => {
            commands::nodes(config, &snapshot)?;
        }
    }

    Ok(())
}
