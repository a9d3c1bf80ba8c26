//! Run status store
//!
//! Process-wide map from run id to the current run snapshot. Transitions are
//! applied inside the write lock, so readers never observe stage states and
//! overall status out of step. Readers get clones and never hold the lock
//! beyond the copy.

use gantry_core::domain::run::{PipelineRun, RunStatus};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

#[derive(Default)]
pub struct StatusStore {
    runs: RwLock<HashMap<Uuid, PipelineRun>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, PipelineRun>> {
        self.runs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, PipelineRun>> {
        self.runs.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a snapshot of a run
    pub fn get(&self, run_id: Uuid) -> Option<PipelineRun> {
        self.read().get(&run_id).cloned()
    }

    /// Inserts or replaces a run
    pub fn upsert(&self, run: PipelineRun) {
        self.write().insert(run.run_id(), run);
    }

    /// Applies `f` to a run atomically with respect to readers
    ///
    /// Returns `None` when the run is unknown.
    pub fn update<T>(&self, run_id: Uuid, f: impl FnOnce(&mut PipelineRun) -> T) -> Option<T> {
        self.write().get_mut(&run_id).map(f)
    }

    pub fn remove(&self, run_id: Uuid) -> Option<PipelineRun> {
        self.write().remove(&run_id)
    }

    /// Snapshots of all non-terminal runs, oldest submission first
    pub fn list_active(&self) -> Vec<PipelineRun> {
        let mut active: Vec<PipelineRun> = self
            .read()
            .values()
            .filter(|run| !run.status().is_terminal())
            .cloned()
            .collect();
        active.sort_by_key(|run| run.submission().submitted_at);
        active
    }

    /// Number of runs currently in `status`
    pub fn count_by_status(&self, status: RunStatus) -> usize {
        self.read()
            .values()
            .filter(|run| run.status() == status)
            .count()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gantry_core::domain::submission::Submission;

    fn queued_run() -> PipelineRun {
        PipelineRun::new(Uuid::new_v4(), Submission::new("code"), ["Build"])
    }

    #[test]
    fn test_get_returns_snapshot() {
        let store = StatusStore::new();
        let run = queued_run();
        let id = run.run_id();
        store.upsert(run);

        let mut snapshot = store.get(id).unwrap();
        snapshot.begin_stage(0, Utc::now()).unwrap();

        // Mutating the snapshot does not touch the stored run
        assert_eq!(store.get(id).unwrap().status(), RunStatus::Queued);
    }

    #[test]
    fn test_update_applies_transition() {
        let store = StatusStore::new();
        let run = queued_run();
        let id = run.run_id();
        store.upsert(run);

        let result = store.update(id, |run| run.begin_stage(0, Utc::now()));
        assert_eq!(result, Some(Ok(())));
        assert_eq!(store.get(id).unwrap().status(), RunStatus::Running);

        assert!(store.update(Uuid::new_v4(), |_| ()).is_none());
    }

    #[test]
    fn test_list_active_excludes_terminal_runs() {
        let store = StatusStore::new();
        let active = queued_run();
        let mut cancelled = queued_run();
        cancelled.cancel(Utc::now()).unwrap();

        let active_id = active.run_id();
        store.upsert(active);
        store.upsert(cancelled);

        let listed = store.list_active();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].run_id(), active_id);
        assert_eq!(store.count_by_status(RunStatus::Cancelled), 1);
        assert_eq!(store.len(), 2);
    }
}
