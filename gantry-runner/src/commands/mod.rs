//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod check;
mod run;

use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Submit a source file and follow its pipeline run
    Run {
        /// Source file to submit
        source: PathBuf,

        /// Pipeline file describing the stages
        #[arg(short, long, env = "GANTRY_PIPELINE")]
        pipeline: PathBuf,

        /// Commit message recorded with the submission
        #[arg(short, long)]
        message: Option<String>,

        /// Submission id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
    },
    /// Validate a pipeline file and list its stages
    Check {
        /// Pipeline file to validate
        pipeline: PathBuf,
    },
}

/// Handle a CLI command
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Run {
            source,
            pipeline,
            message,
            id,
        } => run::run_pipeline(&source, &pipeline, message, id, config).await,
        Commands::Check { pipeline } => check::check_pipeline(&pipeline, config),
    }
}
