use chrono::Utc;
use gantry_core::domain::run::{RunStatus, StageStatus};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::Shared;
use crate::context::WorkingContext;
use crate::executor::OutcomeStatus;
use crate::log_sink::RunLog;

/// Drives one run through every stage of the pipeline until it is terminal
pub(super) async fn drive(shared: &Shared, run_id: Uuid) {
    let Some(cancel) = shared.token(run_id) else {
        debug!("Run {} was finished before a worker picked it up", run_id);
        return;
    };

    if cancel.is_cancelled() {
        shared.cancel_queued(run_id);
        return;
    }

    let begun = shared.store.update(run_id, |run| {
        run.begin_stage(0, Utc::now())
            .map(|()| run.submission().clone())
    });
    let submission = match begun {
        Some(Ok(submission)) => submission,
        Some(Err(e)) => {
            debug!("Run {} cannot start: {}", run_id, e);
            return;
        }
        None => {
            warn!("Run {} is missing from the status store", run_id);
            return;
        }
    };

    let definition = &shared.definition;
    let log = RunLog::new(run_id, Arc::clone(&shared.logs));
    let mut ctx = WorkingContext::new(run_id, submission);
    let started = tokio::time::Instant::now();

    info!(
        "Run {} started: pipeline '{}' with {} stages",
        run_id,
        definition.name(),
        definition.len()
    );
    log.info(
        None,
        format!(
            "Pipeline '{}' triggered with {} stages",
            definition.name(),
            definition.len()
        ),
    );

    for (index, spec) in definition.stages().iter().enumerate() {
        if index > 0 {
            if cancel.is_cancelled() {
                shared.transition(run_id, |run| run.cancel(Utc::now()));
                break;
            }
            shared.transition(run_id, |run| run.begin_stage(index, Utc::now()));
        }

        let execution = shared.executor.run_observed(spec, &ctx, &log, &cancel, |attempt| {
            shared.transition(run_id, |run| run.record_attempt(index, attempt));
        });

        let outcome = match shared.config.run_timeout {
            Some(limit) => match tokio::time::timeout_at(started + limit, execution).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let detail = format!("run timeout of {:?} exceeded", limit);
                    log.error(
                        Some(spec.name()),
                        format!("Stage '{}' aborted: {}", spec.name(), detail),
                    );
                    shared.transition(run_id, |run| {
                        let attempt = run.stage_states()[index].attempt;
                        run.fail_stage(index, attempt, detail, Utc::now())
                    });
                    break;
                }
            },
            None => execution.await,
        };

        match outcome.status {
            OutcomeStatus::Succeeded => {
                ctx.apply(outcome.produced);
                shared.transition(run_id, |run| {
                    run.complete_stage(index, outcome.attempt, Utc::now())
                });
            }
            OutcomeStatus::Failed => {
                let detail = outcome.error_detail.unwrap_or_default();
                shared.transition(run_id, |run| {
                    run.fail_stage(index, outcome.attempt, detail, Utc::now())
                });
                break;
            }
            OutcomeStatus::Cancelled => {
                shared.transition(run_id, |run| run.cancel(Utc::now()));
                break;
            }
        }
    }

    conclude(shared, run_id, &log);
    shared.finish(run_id);
}

/// Narrates how the run ended
fn conclude(shared: &Shared, run_id: Uuid, log: &RunLog) {
    let Some(run) = shared.store.get(run_id) else {
        return;
    };

    match run.status() {
        RunStatus::Succeeded => {
            info!("Run {} succeeded", run_id);
            log.success(None, "Pipeline completed successfully!");
        }
        RunStatus::Failed => {
            let failed = run
                .stage_states()
                .iter()
                .find(|s| s.status == StageStatus::Failed);
            let (stage, detail) = failed
                .map(|s| (s.name.as_str(), s.error_detail.as_deref().unwrap_or_default()))
                .unwrap_or_default();
            error!("Run {} failed at stage '{}': {}", run_id, stage, detail);
            log.error(None, format!("Pipeline failed at stage '{}': {}", stage, detail));
        }
        RunStatus::Cancelled => {
            info!("Run {} cancelled", run_id);
            log.warn(None, "Pipeline cancelled");
        }
        status => {
            // Only reachable if a transition was rejected; release the run
            error!("Run {} stopped while {}; cancelling it", run_id, status);
            shared.transition(run_id, |run| run.cancel(Utc::now()));
            log.warn(None, "Pipeline cancelled");
        }
    }
}
