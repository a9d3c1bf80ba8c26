//! Gantry Engine
//!
//! The pipeline orchestration engine. It accepts submissions, drives each one
//! through an ordered list of stages, and exposes live run status and logs.
//!
//! Architecture:
//! - Definition: Immutable, validated list of stage specifications
//! - Collaborators: Async traits for the external systems stages call into
//! - Executor: Runs one stage with timeout, retry and cancellation
//! - Scheduler: Bounded worker pool driving runs through their stages
//! - Store / LogSink: Concurrency-safe run snapshots and per-run log streams
//!
//! Observers never touch run state directly; they poll snapshots from the
//! scheduler and read logs through a sequence cursor.

pub mod collaborator;
pub mod config;
pub mod context;
pub mod contracts;
pub mod definition;
pub mod error;
pub mod executor;
pub mod log_sink;
pub mod scheduler;
pub mod store;

pub use collaborator::{Collaborator, FnCollaborator, from_fn};
pub use config::{RetentionPolicy, SchedulerConfig};
pub use context::{
    Artifact, Produced, RunningInstance, StageOutput, TestReport, WorkingContext, WorkingTree,
};
pub use definition::{PipelineDefinition, StageSpec};
pub use error::{ConfigError, Result, SchedulerError, StageError};
pub use executor::{OutcomeStatus, StageExecutor, StageOutcome};
pub use log_sink::{LogSink, RunLog};
pub use scheduler::{RunScheduler, SchedulerBuilder};
pub use store::StatusStore;
pub use tokio_util::sync::CancellationToken;
