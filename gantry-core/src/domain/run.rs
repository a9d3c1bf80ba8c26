//! Pipeline run domain types
//!
//! A [`PipelineRun`] is one execution of a pipeline definition against one
//! submission. Its overall status is never stored: it is derived from the
//! stage states on every read, so the two can never disagree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::submission::Submission;

/// Overall status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Terminal states are final; no transition leaves them
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Queued => write!(f, "Queued"),
            RunStatus::Running => write!(f, "Running"),
            RunStatus::Succeeded => write!(f, "Succeeded"),
            RunStatus::Failed => write!(f, "Failed"),
            RunStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Status of a single stage within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StageStatus::Succeeded | StageStatus::Failed | StageStatus::Skipped
        )
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Pending => write!(f, "Pending"),
            StageStatus::Running => write!(f, "Running"),
            StageStatus::Succeeded => write!(f, "Succeeded"),
            StageStatus::Failed => write!(f, "Failed"),
            StageStatus::Skipped => write!(f, "Skipped"),
        }
    }
}

/// Progress of one stage of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageState {
    pub name: String,
    pub status: StageStatus,
    /// Number of attempts made so far, 0 until the stage starts
    pub attempt: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_detail: Option<String>,
}

impl StageState {
    /// Creates a stage that has not started yet
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StageStatus::Pending,
            attempt: 0,
            started_at: None,
            finished_at: None,
            error_detail: None,
        }
    }
}

/// Rejected state machine transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("run {run_id} is already {status}")]
    Terminal { run_id: Uuid, status: RunStatus },

    #[error("stage index {index} out of range ({len} stages)")]
    StageOutOfRange { index: usize, len: usize },

    #[error("stage '{stage}' cannot move from {from} to {to}")]
    InvalidStage {
        stage: String,
        from: StageStatus,
        to: StageStatus,
    },

    #[error("stage '{stage}' cannot start before '{previous}' succeeded")]
    PredecessorIncomplete { stage: String, previous: String },
}

/// One execution of a pipeline against one submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    run_id: Uuid,
    submission: Submission,
    stage_states: Vec<StageState>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// Creates a queued run with one pending stage per name, in order
    pub fn new<I, S>(run_id: Uuid, submission: Submission, stage_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            run_id,
            submission,
            stage_states: stage_names.into_iter().map(StageState::pending).collect(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn submission(&self) -> &Submission {
        &self.submission
    }

    pub fn stage_states(&self) -> &[StageState] {
        &self.stage_states
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Overall status, derived from the stage states
    pub fn status(&self) -> RunStatus {
        let states = &self.stage_states;

        if states.iter().any(|s| s.status == StageStatus::Failed) {
            RunStatus::Failed
        } else if states.iter().all(|s| s.status == StageStatus::Succeeded) {
            RunStatus::Succeeded
        } else if states.iter().any(|s| s.status == StageStatus::Running) {
            RunStatus::Running
        } else if states.iter().all(|s| s.status == StageStatus::Pending) {
            RunStatus::Queued
        } else if states.iter().any(|s| s.status == StageStatus::Skipped) {
            RunStatus::Cancelled
        } else {
            // Some stages succeeded, the rest are still pending
            RunStatus::Running
        }
    }

    /// Index of the stage currently running, if any
    pub fn current_stage(&self) -> Option<usize> {
        self.stage_states
            .iter()
            .position(|s| s.status == StageStatus::Running)
    }

    /// Moves stage `index` to Running
    ///
    /// Starting the first stage is what takes the run out of Queued.
    pub fn begin_stage(&mut self, index: usize, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.ensure_active()?;
        self.ensure_stage(index, StageStatus::Pending, StageStatus::Running)?;

        if index > 0 {
            let previous = &self.stage_states[index - 1];
            if previous.status != StageStatus::Succeeded {
                return Err(TransitionError::PredecessorIncomplete {
                    stage: self.stage_states[index].name.clone(),
                    previous: previous.name.clone(),
                });
            }
        }

        if self.started_at.is_none() {
            self.started_at = Some(now);
        }

        let stage = &mut self.stage_states[index];
        stage.status = StageStatus::Running;
        stage.attempt = 1;
        stage.started_at = Some(now);
        Ok(())
    }

    /// Records the attempt number of the running stage
    pub fn record_attempt(&mut self, index: usize, attempt: u32) -> Result<(), TransitionError> {
        self.ensure_active()?;
        self.ensure_stage(index, StageStatus::Running, StageStatus::Running)?;
        self.stage_states[index].attempt = attempt;
        Ok(())
    }

    /// Marks the running stage `index` as succeeded
    pub fn complete_stage(
        &mut self,
        index: usize,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure_active()?;
        self.ensure_stage(index, StageStatus::Running, StageStatus::Succeeded)?;

        let stage = &mut self.stage_states[index];
        stage.status = StageStatus::Succeeded;
        stage.attempt = attempt;
        stage.finished_at = Some(now);

        if self.status() == RunStatus::Succeeded {
            self.finished_at = Some(now);
        }
        Ok(())
    }

    /// Marks the running stage `index` as failed and skips every later stage
    pub fn fail_stage(
        &mut self,
        index: usize,
        attempt: u32,
        detail: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure_active()?;
        self.ensure_stage(index, StageStatus::Running, StageStatus::Failed)?;

        let stage = &mut self.stage_states[index];
        stage.status = StageStatus::Failed;
        stage.attempt = attempt;
        stage.finished_at = Some(now);
        stage.error_detail = Some(detail.into());

        for later in &mut self.stage_states[index + 1..] {
            later.status = StageStatus::Skipped;
        }

        self.finished_at = Some(now);
        Ok(())
    }

    /// Cancels the run
    ///
    /// A stage interrupted mid-flight and every stage not yet started are
    /// marked Skipped; completed stages keep their outcome.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.ensure_active()?;

        for stage in &mut self.stage_states {
            match stage.status {
                StageStatus::Running => {
                    stage.status = StageStatus::Skipped;
                    stage.finished_at = Some(now);
                    stage.error_detail = Some("cancelled".to_string());
                }
                StageStatus::Pending => stage.status = StageStatus::Skipped,
                _ => {}
            }
        }

        self.finished_at = Some(now);
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), TransitionError> {
        let status = self.status();
        if status.is_terminal() {
            return Err(TransitionError::Terminal {
                run_id: self.run_id,
                status,
            });
        }
        Ok(())
    }

    fn ensure_stage(
        &self,
        index: usize,
        expected: StageStatus,
        to: StageStatus,
    ) -> Result<(), TransitionError> {
        let stage = self
            .stage_states
            .get(index)
            .ok_or(TransitionError::StageOutOfRange {
                index,
                len: self.stage_states.len(),
            })?;

        if stage.status != expected {
            return Err(TransitionError::InvalidStage {
                stage: stage.name.clone(),
                from: stage.status,
                to,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_run() -> PipelineRun {
        PipelineRun::new(
            Uuid::new_v4(),
            Submission::new("code").with_id("s1"),
            ["Checkout", "Build", "Test"],
        )
    }

    #[test]
    fn test_new_run_is_queued() {
        let run = new_run();
        assert_eq!(run.status(), RunStatus::Queued);
        assert_eq!(run.stage_states().len(), 3);
        assert!(run.started_at().is_none());
    }

    #[test]
    fn test_successful_run() {
        let mut run = new_run();
        for i in 0..3 {
            run.begin_stage(i, Utc::now()).unwrap();
            assert_eq!(run.status(), RunStatus::Running);
            run.complete_stage(i, 1, Utc::now()).unwrap();
        }

        assert_eq!(run.status(), RunStatus::Succeeded);
        assert!(run.started_at().is_some());
        assert!(run.finished_at().is_some());
    }

    #[test]
    fn test_running_between_stages() {
        let mut run = new_run();
        run.begin_stage(0, Utc::now()).unwrap();
        run.complete_stage(0, 1, Utc::now()).unwrap();

        assert_eq!(run.status(), RunStatus::Running);
        assert_eq!(run.current_stage(), None);
        assert!(run.finished_at().is_none());
    }

    #[test]
    fn test_failure_skips_remaining_stages() {
        let mut run = new_run();
        run.begin_stage(0, Utc::now()).unwrap();
        run.complete_stage(0, 1, Utc::now()).unwrap();
        run.begin_stage(1, Utc::now()).unwrap();
        run.fail_stage(1, 2, "compile error", Utc::now()).unwrap();

        let states = run.stage_states();
        assert_eq!(states[0].status, StageStatus::Succeeded);
        assert_eq!(states[1].status, StageStatus::Failed);
        assert_eq!(states[1].attempt, 2);
        assert_eq!(states[1].error_detail.as_deref(), Some("compile error"));
        assert_eq!(states[2].status, StageStatus::Skipped);
        assert_eq!(run.status(), RunStatus::Failed);
    }

    #[test]
    fn test_stage_cannot_start_out_of_order() {
        let mut run = new_run();
        let err = run.begin_stage(1, Utc::now()).unwrap_err();
        assert!(matches!(err, TransitionError::PredecessorIncomplete { .. }));
        assert_eq!(run.status(), RunStatus::Queued);
    }

    #[test]
    fn test_cancel_queued_run() {
        let mut run = new_run();
        run.cancel(Utc::now()).unwrap();

        assert_eq!(run.status(), RunStatus::Cancelled);
        assert!(
            run.stage_states()
                .iter()
                .all(|s| s.status == StageStatus::Skipped && s.attempt == 0 && s.started_at.is_none())
        );
    }

    #[test]
    fn test_cancel_running_stage() {
        let mut run = new_run();
        run.begin_stage(0, Utc::now()).unwrap();
        run.cancel(Utc::now()).unwrap();

        let first = &run.stage_states()[0];
        assert_eq!(first.status, StageStatus::Skipped);
        assert_eq!(first.error_detail.as_deref(), Some("cancelled"));
        assert_eq!(run.status(), RunStatus::Cancelled);
    }

    #[test]
    fn test_terminal_run_rejects_transitions() {
        let mut run = new_run();
        run.cancel(Utc::now()).unwrap();

        assert!(matches!(
            run.cancel(Utc::now()),
            Err(TransitionError::Terminal {
                status: RunStatus::Cancelled,
                ..
            })
        ));
        assert!(run.begin_stage(0, Utc::now()).is_err());
    }

    #[test]
    fn test_snapshot_serializes_losslessly() {
        let mut run = new_run();
        run.begin_stage(0, Utc::now()).unwrap();
        run.fail_stage(0, 1, "fetch failed", Utc::now()).unwrap();

        let json = serde_json::to_string(&run).unwrap();
        let decoded: PipelineRun = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, run);
        assert_eq!(decoded.status(), RunStatus::Failed);
    }
}
