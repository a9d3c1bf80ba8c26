//! Gantry Runner
//!
//! Command-line front end of the pipeline engine. Runs pipelines described
//! in JSON files against local source files.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Pipeline files: JSON stage lists turned into engine definitions
//! - Stages: Workspace preparation and child-process commands
//! - Publisher: Final run reports written as JSON
//! - Commands: `run` follows a submission live, `check` validates a file

mod commands;
mod config;
mod pipeline;
mod publisher;
mod stages;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{Commands, handle_command};
use crate::config::Config;

#[derive(Parser)]
#[command(name = "gantry")]
#[command(about = "Gantry CI/CD pipeline runner", long_about = None)]
struct Cli {
    /// Directory holding run workspaces
    #[arg(long, env = "GANTRY_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Max runs executing concurrently
    #[arg(long, env = "GANTRY_WORKERS")]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; stdout is reserved for run output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gantry_runner=info,gantry_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(workspace) = cli.workspace {
        config.workspace = workspace;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    config.validate()?;
    debug!("Loaded configuration: {:?}", config);

    handle_command(cli.command, &config).await
}
