//! Run command handler
//!
//! Submits a source file to a local scheduler, follows the run's log
//! stream until it finishes and prints a stage summary.

use anyhow::{Context, Result};
use colored::*;
use gantry_core::domain::log::{LogEntry, LogLevel};
use gantry_core::domain::run::{PipelineRun, RunStatus, StageState, StageStatus};
use gantry_core::dto::submission::CreateSubmission;
use gantry_engine::RunScheduler;
use std::path::Path;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::config::Config;
use crate::pipeline::PipelineFile;
use crate::publisher::{JsonReportPublisher, REPORT_FILE};
use crate::stages::run_dir;

/// Submit `source` and follow its run through the pipeline
pub async fn run_pipeline(
    source: &Path,
    pipeline: &Path,
    message: Option<String>,
    id: Option<String>,
    config: &Config,
) -> Result<()> {
    let definition = PipelineFile::load(pipeline)?
        .into_definition(&config.workspace)
        .context("Invalid pipeline definition")?;

    let code = tokio::fs::read_to_string(source)
        .await
        .with_context(|| format!("Failed to read source file {}", source.display()))?;
    let filename = source
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid source file path: {}", source.display()))?;

    let submission = CreateSubmission {
        id,
        code,
        filename: filename.to_string(),
        message,
    }
    .into_submission();

    let scheduler = RunScheduler::builder(definition)
        .config(config.scheduler())
        .publisher(JsonReportPublisher::new(&config.workspace))
        .start()
        .context("Failed to start scheduler")?;

    let run_id = scheduler.submit(submission)?;
    println!(
        "{} {} for {}",
        "Started run".bold(),
        run_id.to_string().cyan(),
        filename
    );
    println!("{}", "─".repeat(80).dimmed());

    let result = follow(&scheduler, run_id, config.poll_interval).await;
    scheduler.shutdown().await;
    let run = result?;

    println!("{}", "─".repeat(80).dimmed());
    print_run_summary(&run);
    println!(
        "{} {}",
        "Report:".bold(),
        run_dir(&config.workspace, run_id).join(REPORT_FILE).display()
    );

    match run.status() {
        RunStatus::Succeeded => Ok(()),
        status => anyhow::bail!("Run {} finished as {}", run_id, status),
    }
}

/// Prints log entries as they arrive until the run is terminal
///
/// Ctrl-C requests cancellation of the run; following continues until the
/// run has actually stopped.
async fn follow(scheduler: &RunScheduler, run_id: Uuid, interval: Duration) -> Result<PipelineRun> {
    let mut cursor = 0;
    let mut cancel_requested = false;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let page = scheduler.log_page(run_id, cursor)?;
        page.entries.iter().for_each(print_log_entry);
        cursor = page.next_cursor;

        let run = scheduler.status(run_id)?;
        if run.status().is_terminal() {
            // Final narration lands right after the last transition
            tokio::time::sleep(interval).await;
            scheduler
                .read_logs(run_id, cursor)
                .unwrap_or_default()
                .iter()
                .for_each(print_log_entry);
            return Ok(run);
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            signal = &mut ctrl_c, if !cancel_requested => {
                signal.context("Failed to listen for Ctrl-C")?;
                cancel_requested = true;
                println!("{}", "Cancelling run...".yellow());
                if let Err(e) = scheduler.cancel(run_id) {
                    warn!("Failed to cancel run {}: {}", run_id, e);
                }
            }
        }
    }
}

/// Print a single log entry with formatting
fn print_log_entry(entry: &LogEntry) {
    let level_str = entry.level.to_string();
    let level_colored = match entry.level {
        LogLevel::Info => level_str.cyan(),
        LogLevel::Success => level_str.green(),
        LogLevel::Warn => level_str.yellow(),
        LogLevel::Error => level_str.red(),
    };

    let stage = entry
        .stage_name
        .as_deref()
        .map(|name| format!("[{}] ", name))
        .unwrap_or_default();

    println!(
        "{} {:>7} {}{}",
        entry.timestamp.format("%H:%M:%S").to_string().dimmed(),
        level_colored,
        stage.bold(),
        entry.message
    );
}

/// Print the final state of every stage
fn print_run_summary(run: &PipelineRun) {
    println!(
        "{} {}",
        "Status:".bold(),
        colorize_run_status(run.status())
    );

    for stage in run.stage_states() {
        let mut line = format!(
            "  {:<16} {:<10}",
            stage.name,
            colorize_stage_status(stage.status)
        );
        if stage.attempt > 1 {
            line.push_str(&format!(" attempts: {}", stage.attempt));
        }
        if let Some(ms) = stage_duration_ms(stage) {
            line.push_str(&format!(" {}", format!("{}ms", ms).dimmed()));
        }
        println!("{}", line);

        if let (StageStatus::Failed, Some(detail)) = (stage.status, &stage.error_detail) {
            for detail_line in detail.lines() {
                println!("    {}", detail_line.red());
            }
        }
    }
}

fn stage_duration_ms(stage: &StageState) -> Option<i64> {
    let started = stage.started_at?;
    let finished = stage.finished_at?;
    Some((finished - started).num_milliseconds())
}

/// Colorize run status for display
fn colorize_run_status(status: RunStatus) -> ColoredString {
    let status_str = status.to_string();
    match status {
        RunStatus::Queued => status_str.yellow(),
        RunStatus::Running => status_str.cyan(),
        RunStatus::Succeeded => status_str.green(),
        RunStatus::Failed => status_str.red(),
        RunStatus::Cancelled => status_str.dimmed(),
    }
}

/// Colorize stage status for display
fn colorize_stage_status(status: StageStatus) -> ColoredString {
    let status_str = status.to_string();
    match status {
        StageStatus::Pending => status_str.dimmed(),
        StageStatus::Running => status_str.cyan(),
        StageStatus::Succeeded => status_str.green(),
        StageStatus::Failed => status_str.red(),
        StageStatus::Skipped => status_str.dimmed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gantry_core::domain::submission::Submission;

    #[test]
    fn test_stage_duration() {
        let mut run = PipelineRun::new(Uuid::new_v4(), Submission::new("x"), ["Build", "Test"]);
        let start = Utc::now();
        run.begin_stage(0, start).unwrap();
        run.complete_stage(0, 1, start + chrono::Duration::milliseconds(1500))
            .unwrap();

        assert_eq!(stage_duration_ms(&run.stage_states()[0]), Some(1500));
        assert_eq!(stage_duration_ms(&run.stage_states()[1]), None);
    }
}
