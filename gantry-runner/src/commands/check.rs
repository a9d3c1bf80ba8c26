//! Pipeline file validation

use anyhow::{Context, Result};
use colored::*;
use std::path::Path;

use crate::config::Config;
use crate::pipeline::PipelineFile;

/// Validate a pipeline file and print its stages
pub fn check_pipeline(path: &Path, config: &Config) -> Result<()> {
    let definition = PipelineFile::load(path)?
        .into_definition(&config.workspace)
        .context("Invalid pipeline definition")?;

    println!(
        "{} Pipeline '{}' is valid ({} stages)",
        "✓".green().bold(),
        definition.name().bold(),
        definition.len()
    );
    println!();

    for (index, stage) in definition.stages().iter().enumerate() {
        println!(
            "  {}. {} {}",
            index + 1,
            stage.name().cyan(),
            format!(
                "(timeout {:?}, retries {}, backoff {:?})",
                stage.timeout(),
                stage.max_retries(),
                stage.retry_backoff()
            )
            .dimmed()
        );
    }

    Ok(())
}
