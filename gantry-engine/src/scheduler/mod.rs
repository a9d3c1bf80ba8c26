//! Run scheduler
//!
//! Accepts submissions, creates pipeline runs and drives them through the
//! pipeline definition on a bounded pool of workers. Queued runs start in
//! submission order; at most `workers` runs execute at once and at most one
//! run is active per submission key.
//!
//! The status store is the only state shared between workers and
//! observers. Each run is written by exactly one worker while it executes.

mod worker;

use chrono::Utc;
use gantry_core::domain::log::{LogEntry, LogLevel};
use gantry_core::domain::run::{PipelineRun, RunStatus, TransitionError};
use gantry_core::domain::submission::Submission;
use gantry_core::dto::log::LogPage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::contracts::ReportPublisher;
use crate::definition::PipelineDefinition;
use crate::error::{ConfigError, Result, SchedulerError};
use crate::executor::StageExecutor;
use crate::log_sink::LogSink;
use crate::store::StatusStore;

/// Bounds on the pause between retention sweeps
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared by the scheduler handle, the dispatcher and the workers
struct Shared {
    definition: PipelineDefinition,
    config: SchedulerConfig,
    store: StatusStore,
    logs: Arc<LogSink>,
    executor: StageExecutor,
    publisher: Option<Arc<dyn ReportPublisher>>,
    /// Submission key -> non-terminal run holding it
    active_keys: Mutex<HashMap<String, Uuid>>,
    cancellations: Mutex<HashMap<Uuid, CancellationToken>>,
    publications: Mutex<JoinSet<()>>,
    shutdown: CancellationToken,
}

impl Shared {
    fn token(&self, run_id: Uuid) -> Option<CancellationToken> {
        lock(&self.cancellations).get(&run_id).cloned()
    }

    /// Applies a state machine transition to a stored run
    fn transition(
        &self,
        run_id: Uuid,
        f: impl FnOnce(&mut PipelineRun) -> std::result::Result<(), TransitionError>,
    ) {
        match self.store.update(run_id, f) {
            Some(Ok(())) => {}
            Some(Err(e)) => warn!("Run {}: rejected transition: {}", run_id, e),
            None => warn!("Run {} is missing from the status store", run_id),
        }
    }

    /// Cancels a run that never started
    fn cancel_queued(&self, run_id: Uuid) {
        let cancelled = self
            .store
            .update(run_id, |run| {
                run.status() == RunStatus::Queued && run.cancel(Utc::now()).is_ok()
            })
            .unwrap_or(false);

        if cancelled {
            self.logs
                .append(run_id, None, LogLevel::Warn, "Run cancelled before it started");
            info!("Run {} cancelled while queued", run_id);
            self.finish(run_id);
        }
    }

    /// Releases everything a terminal run holds
    ///
    /// Frees the submission key, starts the log retention grace period,
    /// publishes the final snapshot and evicts expired runs.
    fn finish(&self, run_id: Uuid) {
        let snapshot = self.store.get(run_id);

        lock(&self.active_keys).retain(|_, active| *active != run_id);
        lock(&self.cancellations).remove(&run_id);
        self.logs.mark_terminated(run_id);

        if let (Some(publisher), Some(run)) = (&self.publisher, snapshot) {
            let publisher = Arc::clone(publisher);
            let logs = Arc::clone(&self.logs);
            let mut publications = lock(&self.publications);
            while publications.try_join_next().is_some() {}
            publications.spawn(async move {
                if let Err(e) = publisher.publish(&run).await {
                    warn!("Failed to publish report for run {}: {}", run_id, e);
                    logs.append(
                        run_id,
                        None,
                        LogLevel::Warn,
                        format!("Report publishing failed: {}", e),
                    );
                }
            });
        }

        self.evict_expired();
    }

    fn evict_expired(&self) {
        for evicted in self.logs.evict_expired() {
            debug!("Evicting run {} past its retention", evicted);
            self.store.remove(evicted);
        }
    }
}

/// Builder for a [`RunScheduler`]
pub struct SchedulerBuilder {
    definition: PipelineDefinition,
    config: SchedulerConfig,
    publisher: Option<Arc<dyn ReportPublisher>>,
}

impl SchedulerBuilder {
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Publisher invoked once for every run that reaches a terminal state
    pub fn publisher(mut self, publisher: impl ReportPublisher + 'static) -> Self {
        self.publisher = Some(Arc::new(publisher));
        self
    }

    /// Validates the configuration and starts the dispatcher
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> std::result::Result<RunScheduler, ConfigError> {
        self.config.validate()?;

        info!(
            "Starting run scheduler for pipeline '{}' ({} stages, {} workers)",
            self.definition.name(),
            self.definition.len(),
            self.config.workers
        );

        let shared = Arc::new(Shared {
            logs: Arc::new(LogSink::new(self.config.retention)),
            definition: self.definition,
            config: self.config,
            store: StatusStore::new(),
            executor: StageExecutor::new(),
            publisher: self.publisher,
            active_keys: Mutex::new(HashMap::new()),
            cancellations: Mutex::new(HashMap::new()),
            publications: Mutex::new(JoinSet::new()),
            shutdown: CancellationToken::new(),
        });

        let (queue, receiver) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch(Arc::clone(&shared), receiver));
        let sweeper = tokio::spawn(sweep(Arc::clone(&shared)));

        Ok(RunScheduler {
            shared,
            queue,
            dispatcher: Mutex::new(Some(dispatcher)),
            sweeper: Mutex::new(Some(sweeper)),
        })
    }
}

/// Accepts submissions and executes their pipeline runs
pub struct RunScheduler {
    shared: Arc<Shared>,
    queue: mpsc::UnboundedSender<Uuid>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RunScheduler {
    pub fn builder(definition: PipelineDefinition) -> SchedulerBuilder {
        SchedulerBuilder {
            definition,
            config: SchedulerConfig::default(),
            publisher: None,
        }
    }

    /// Starts a scheduler without a report publisher
    pub fn start(
        definition: PipelineDefinition,
        config: SchedulerConfig,
    ) -> std::result::Result<Self, ConfigError> {
        Self::builder(definition).config(config).start()
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.shared.definition
    }

    /// Queues a submission and returns the id of its run
    ///
    /// Never waits for the run to start. Fails while another run for the
    /// same submission key has not reached a terminal state.
    pub fn submit(&self, submission: Submission) -> Result<Uuid> {
        let shared = &self.shared;
        if shared.shutdown.is_cancelled() {
            return Err(SchedulerError::ShuttingDown);
        }

        let key = submission.key().to_string();
        let mut keys = lock(&shared.active_keys);
        if let Some(&run_id) = keys.get(&key) {
            // The key frees up as soon as its run is observably terminal
            let active = shared
                .store
                .get(run_id)
                .is_some_and(|run| !run.status().is_terminal());
            if active {
                return Err(SchedulerError::DuplicateActiveRun { key, run_id });
            }
        }

        let run_id = Uuid::new_v4();
        let received = describe_submission(&submission);
        let run = PipelineRun::new(run_id, submission, shared.definition.stage_names());

        shared.logs.open(run_id);
        shared.logs.append(run_id, None, LogLevel::Info, received);
        shared.store.upsert(run);
        lock(&shared.cancellations).insert(run_id, shared.shutdown.child_token());
        keys.insert(key.clone(), run_id);
        drop(keys);

        if self.queue.send(run_id).is_err() {
            shared.cancel_queued(run_id);
            return Err(SchedulerError::ShuttingDown);
        }

        info!("Run {} queued for submission key '{}'", run_id, key);
        Ok(run_id)
    }

    /// Returns a snapshot of a run
    pub fn status(&self, run_id: Uuid) -> Result<PipelineRun> {
        self.shared
            .store
            .get(run_id)
            .ok_or(SchedulerError::NotFound(run_id))
    }

    /// Requests cancellation of a run
    ///
    /// A queued run is cancelled immediately. A running run is signalled and
    /// halts at its next check point; poll [`RunScheduler::status`] to see
    /// it reach Cancelled.
    pub fn cancel(&self, run_id: Uuid) -> Result<()> {
        let shared = &self.shared;

        let was_queued = shared
            .store
            .update(run_id, |run| {
                let status = run.status();
                if status.is_terminal() {
                    return Err(SchedulerError::AlreadyTerminal { run_id, status });
                }
                if status == RunStatus::Queued {
                    run.cancel(Utc::now())
                        .map_err(|_| SchedulerError::AlreadyTerminal { run_id, status })?;
                    return Ok(true);
                }
                Ok(false)
            })
            .ok_or(SchedulerError::NotFound(run_id))??;

        if let Some(token) = shared.token(run_id) {
            token.cancel();
        }

        if was_queued {
            shared
                .logs
                .append(run_id, None, LogLevel::Warn, "Run cancelled before it started");
            info!("Run {} cancelled while queued", run_id);
            shared.finish(run_id);
        } else {
            shared
                .logs
                .append(run_id, None, LogLevel::Warn, "Cancellation requested");
            info!("Cancellation requested for run {}", run_id);
        }

        Ok(())
    }

    /// Returns the log entries of a run with a sequence number above `since`
    pub fn read_logs(&self, run_id: Uuid, since: u64) -> Result<Vec<LogEntry>> {
        self.shared
            .logs
            .read_from(run_id, since)
            .ok_or(SchedulerError::NotFound(run_id))
    }

    /// Like [`RunScheduler::read_logs`], with the cursor for the next read
    pub fn log_page(&self, run_id: Uuid, since: u64) -> Result<LogPage> {
        let entries = self.read_logs(run_id, since)?;
        Ok(LogPage::new(run_id, since, entries))
    }

    /// Snapshots of all queued and running runs
    pub fn list_active(&self) -> Vec<PipelineRun> {
        self.shared.store.list_active()
    }

    /// Stops accepting submissions, cancels all runs and waits for workers
    ///
    /// Reports still being published are awaited as well.
    pub async fn shutdown(&self) {
        info!("Shutting down run scheduler");
        self.shared.shutdown.cancel();

        let dispatcher = lock(&self.dispatcher).take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                warn!("Dispatcher task failed: {}", e);
            }
        }

        let sweeper = lock(&self.sweeper).take();
        if let Some(handle) = sweeper {
            if let Err(e) = handle.await {
                warn!("Retention sweep task failed: {}", e);
            }
        }

        let mut publications = std::mem::take(&mut *lock(&self.shared.publications));
        while let Some(result) = publications.join_next().await {
            if let Err(e) = result {
                warn!("Report publishing task failed: {}", e);
            }
        }
    }
}

fn describe_submission(submission: &Submission) -> String {
    let mut message = format!(
        "Received {} ({} bytes)",
        submission.filename().unwrap_or(&submission.id),
        submission.payload.len()
    );
    if let Some(commit) = submission.message().filter(|m| !m.is_empty()) {
        message.push_str(&format!(": {}", commit));
    }
    message
}

/// Hands queued runs to workers in FIFO order
///
/// A worker slot is claimed before the next run is dequeued, so a run only
/// leaves the queue once it can start.
async fn dispatch(shared: Arc<Shared>, mut queue: mpsc::UnboundedReceiver<Uuid>) {
    let slots = Arc::new(Semaphore::new(shared.config.workers));
    let mut workers = JoinSet::new();

    loop {
        let permit = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            permit = Arc::clone(&slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let run_id = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            next = queue.recv() => match next {
                Some(run_id) => run_id,
                None => break,
            },
        };

        let shared = Arc::clone(&shared);
        workers.spawn(async move {
            worker::drive(&shared, run_id).await;
            // Slot is released once the run is terminal
            drop(permit);
        });

        while let Some(result) = workers.try_join_next() {
            if let Err(e) = result {
                warn!("Run task panicked: {}", e);
            }
        }
    }

    // Runs still queued never start
    queue.close();
    while let Some(run_id) = queue.recv().await {
        shared.cancel_queued(run_id);
    }

    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            warn!("Run task panicked: {}", e);
        }
    }

    debug!("Dispatcher stopped");
}

/// Evicts runs past their retention even when no run is finishing
async fn sweep(shared: Arc<Shared>) {
    let period = shared
        .config
        .retention
        .grace_period
        .clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL);
    let mut interval = tokio::time::interval(period);
    interval.reset();

    loop {
        tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            _ = interval.tick() => shared.evict_expired(),
        }
    }

    debug!("Retention sweep stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::domain::submission::{FILENAME_KEY, MESSAGE_KEY};

    #[test]
    fn test_describe_submission() {
        let submission = Submission::new("class App {}")
            .with_metadata(FILENAME_KEY, "App.java")
            .with_metadata(MESSAGE_KEY, "Add health endpoint");
        assert_eq!(
            describe_submission(&submission),
            "Received App.java (12 bytes): Add health endpoint"
        );

        let anonymous = Submission::new("x").with_id("sub-1");
        assert_eq!(describe_submission(&anonymous), "Received sub-1 (1 bytes)");
    }
}
