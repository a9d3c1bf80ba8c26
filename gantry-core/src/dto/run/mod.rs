//! Run DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::{PipelineRun, RunStatus, StageStatus};

/// Lightweight run summary for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub submission_id: String,
    pub key: String,
    pub status: RunStatus,
    pub stages_total: usize,
    pub stages_succeeded: usize,
    /// Name of the stage currently executing, if any
    pub current_stage: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&PipelineRun> for RunSummary {
    fn from(run: &PipelineRun) -> Self {
        let stages = run.stage_states();
        Self {
            id: run.run_id(),
            submission_id: run.submission().id.clone(),
            key: run.submission().key().to_string(),
            status: run.status(),
            stages_total: stages.len(),
            stages_succeeded: stages
                .iter()
                .filter(|s| s.status == StageStatus::Succeeded)
                .count(),
            current_stage: run.current_stage().map(|i| stages[i].name.clone()),
            started_at: run.started_at(),
            finished_at: run.finished_at(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::submission::Submission;

    #[test]
    fn test_run_summary_conversion() {
        let mut run = PipelineRun::new(
            Uuid::new_v4(),
            Submission::new("code").with_metadata("filename", "App.java"),
            ["Checkout", "Build"],
        );
        run.begin_stage(0, Utc::now()).unwrap();
        run.complete_stage(0, 1, Utc::now()).unwrap();
        run.begin_stage(1, Utc::now()).unwrap();

        let summary = RunSummary::from(&run);
        assert_eq!(summary.id, run.run_id());
        assert_eq!(summary.key, "App.java");
        assert_eq!(summary.status, RunStatus::Running);
        assert_eq!(summary.stages_total, 2);
        assert_eq!(summary.stages_succeeded, 1);
        assert_eq!(summary.current_stage.as_deref(), Some("Build"));
    }
}
