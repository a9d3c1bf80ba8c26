//! Run report publishing
//!
//! Writes the final snapshot of every finished run as JSON next to its
//! workspace.

use async_trait::async_trait;
use gantry_core::domain::run::PipelineRun;
use gantry_core::dto::run::RunSummary;
use gantry_engine::StageError;
use gantry_engine::contracts::ReportPublisher;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

use crate::stages::run_dir;

/// File name of the report inside a run workspace
pub const REPORT_FILE: &str = "report.json";

#[derive(Serialize)]
struct RunReport<'a> {
    summary: RunSummary,
    run: &'a PipelineRun,
}

/// Publishes run reports as `<workspace>/<run id>/report.json`
pub struct JsonReportPublisher {
    root: PathBuf,
}

impl JsonReportPublisher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ReportPublisher for JsonReportPublisher {
    async fn publish(&self, run: &PipelineRun) -> Result<(), StageError> {
        let dir = run_dir(&self.root, run.run_id());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StageError::Publish(format!("{}: {}", dir.display(), e)))?;

        let report = RunReport {
            summary: RunSummary::from(run),
            run,
        };
        let json = serde_json::to_vec_pretty(&report)
            .map_err(|e| StageError::Publish(e.to_string()))?;

        let path = dir.join(REPORT_FILE);
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| StageError::Publish(format!("{}: {}", path.display(), e)))?;

        info!("Published report for run {} to {}", run.run_id(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gantry_core::domain::run::RunStatus;
    use gantry_core::domain::submission::Submission;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_publish_writes_report() {
        let root = tempfile::tempdir().unwrap();
        let mut run = PipelineRun::new(Uuid::new_v4(), Submission::new("x"), ["Build"]);
        run.begin_stage(0, Utc::now()).unwrap();
        run.complete_stage(0, 1, Utc::now()).unwrap();

        JsonReportPublisher::new(root.path())
            .publish(&run)
            .await
            .unwrap();

        let path = run_dir(root.path(), run.run_id()).join(REPORT_FILE);
        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();

        let summary: RunSummary = serde_json::from_value(report["summary"].clone()).unwrap();
        assert_eq!(summary.id, run.run_id());
        assert_eq!(summary.status, RunStatus::Succeeded);
        assert_eq!(summary.stages_succeeded, 1);

        let stored: PipelineRun = serde_json::from_value(report["run"].clone()).unwrap();
        assert_eq!(stored, run);
    }
}
