//! Error types for the engine

use gantry_core::domain::run::RunStatus;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Invalid pipeline or scheduler configuration
///
/// Raised at startup only; a running scheduler never produces one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("pipeline must define at least one stage")]
    EmptyPipeline,

    #[error("stage name cannot be empty")]
    EmptyStageName,

    #[error("duplicate stage name: {0}")]
    DuplicateStage(String),

    #[error("stage '{0}' timeout must be greater than 0")]
    ZeroTimeout(String),

    #[error("invalid scheduler configuration: {0}")]
    InvalidScheduler(String),
}

/// Caller-facing errors returned by [`crate::RunScheduler`] operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("run {run_id} is still active for submission key '{key}'")]
    DuplicateActiveRun { key: String, run_id: Uuid },

    #[error("run not found: {0}")]
    NotFound(Uuid),

    #[error("run {run_id} already finished as {status}")]
    AlreadyTerminal { run_id: Uuid, status: RunStatus },

    #[error("scheduler is shutting down")]
    ShuttingDown,
}

impl SchedulerError {
    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Failure reported by a stage collaborator
///
/// These never escape the engine: the executor turns them into a failed
/// stage outcome and the message becomes the stage's error detail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error("checkout failed: {0}")]
    Vcs(String),

    #[error("build failed: {stderr}")]
    Build { stderr: String },

    #[error("tests failed: {0}")]
    Test(String),

    #[error("deploy failed: {0}")]
    Deploy(String),

    #[error("validation failed: {reason}")]
    Validation { reason: String },

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("timeout")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("collaborator panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

impl StageError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}
