//! Stage executor
//!
//! Runs a single stage's collaborator with a per-attempt timeout and linear
//! retry backoff. The executor never touches run state; it narrates each
//! attempt to the run log and hands a [`StageOutcome`] back to the caller,
//! which decides how the run moves on.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{Produced, WorkingContext};
use crate::definition::StageSpec;
use crate::error::StageError;
use crate::log_sink::RunLog;

/// How a stage ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
    Cancelled,
}

/// Result of running one stage to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub status: OutcomeStatus,
    /// Attempts made, including the final one
    pub attempt: u32,
    pub log_lines: Vec<String>,
    pub error_detail: Option<String>,
    pub produced: Produced,
    pub duration: Duration,
}

impl StageOutcome {
    fn finish(status: OutcomeStatus, attempt: u32, started: Instant) -> Self {
        Self {
            status,
            attempt,
            log_lines: Vec::new(),
            error_detail: None,
            produced: Produced::Nothing,
            duration: started.elapsed(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Succeeded
    }
}

/// Executes stages with timeout, retry and cooperative cancellation
#[derive(Debug, Clone, Copy, Default)]
pub struct StageExecutor;

impl StageExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Runs `spec` against `ctx`
    pub async fn run(
        &self,
        spec: &StageSpec,
        ctx: &WorkingContext,
        log: &RunLog,
        cancel: &CancellationToken,
    ) -> StageOutcome {
        self.run_observed(spec, ctx, log, cancel, |_| {}).await
    }

    /// Runs `spec` against `ctx`, reporting each attempt number as it starts
    pub async fn run_observed(
        &self,
        spec: &StageSpec,
        ctx: &WorkingContext,
        log: &RunLog,
        cancel: &CancellationToken,
        on_attempt: impl Fn(u32),
    ) -> StageOutcome {
        let started = Instant::now();
        let stage = Some(spec.name());
        let total = spec.max_retries().saturating_add(1);
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Self::cancelled(spec, attempt - 1, log, started);
            }

            on_attempt(attempt);
            debug!(
                "Run {}: stage '{}' attempt {}/{}",
                ctx.run_id(),
                spec.name(),
                attempt,
                total
            );
            log.info(
                stage,
                format!("Starting stage '{}' (attempt {}/{})", spec.name(), attempt, total),
            );

            // A panicking collaborator fails the attempt instead of the worker
            let call = AssertUnwindSafe(spec.collaborator().run(ctx, cancel)).catch_unwind();
            let result = match tokio::time::timeout(spec.timeout(), call).await {
                Ok(Ok(result)) => result,
                Ok(Err(payload)) => Err(StageError::Panicked(panic_message(&*payload))),
                Err(_) => Err(StageError::Timeout),
            };

            let error = match result {
                Ok(output) => {
                    for line in &output.log_lines {
                        log.info(stage, line.clone());
                    }
                    log.success(
                        stage,
                        format!("Stage '{}' succeeded (attempt {}/{})", spec.name(), attempt, total),
                    );
                    info!(
                        "Run {}: stage '{}' succeeded after {} attempt(s)",
                        ctx.run_id(),
                        spec.name(),
                        attempt
                    );

                    let mut outcome =
                        StageOutcome::finish(OutcomeStatus::Succeeded, attempt, started);
                    outcome.log_lines = output.log_lines;
                    outcome.produced = output.produced;
                    return outcome;
                }
                Err(StageError::Cancelled) if cancel.is_cancelled() => {
                    return Self::cancelled(spec, attempt, log, started);
                }
                Err(e) => e,
            };

            if cancel.is_cancelled() {
                log.error(
                    stage,
                    format!("Stage '{}' attempt {}/{} failed: {}", spec.name(), attempt, total, error),
                );
                return Self::cancelled(spec, attempt, log, started);
            }

            if attempt < total {
                let backoff = backoff_delay(spec.retry_backoff(), attempt);
                log.warn(
                    stage,
                    format!(
                        "Stage '{}' attempt {}/{} failed: {}; retrying in {:?}",
                        spec.name(),
                        attempt,
                        total,
                        error,
                        backoff
                    ),
                );
                warn!(
                    "Run {}: stage '{}' attempt {} failed: {}",
                    ctx.run_id(),
                    spec.name(),
                    attempt,
                    error
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Self::cancelled(spec, attempt, log, started);
                    }
                    _ = tokio::time::sleep(backoff) => {}
                }

                attempt += 1;
                continue;
            }

            log.error(
                stage,
                format!("Stage '{}' attempt {}/{} failed: {}", spec.name(), attempt, total, error),
            );
            warn!(
                "Run {}: stage '{}' failed after {} attempt(s): {}",
                ctx.run_id(),
                spec.name(),
                attempt,
                error
            );

            let mut outcome = StageOutcome::finish(OutcomeStatus::Failed, attempt, started);
            outcome.error_detail = Some(error.to_string());
            return outcome;
        }
    }

    fn cancelled(spec: &StageSpec, attempt: u32, log: &RunLog, started: Instant) -> StageOutcome {
        log.warn(
            Some(spec.name()),
            format!("Stage '{}' cancelled", spec.name()),
        );
        let mut outcome = StageOutcome::finish(OutcomeStatus::Cancelled, attempt, started);
        outcome.error_detail = Some(StageError::Cancelled.to_string());
        outcome
    }
}

/// Linear backoff before the retry that follows `attempt`
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.checked_mul(attempt).unwrap_or(Duration::MAX)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
