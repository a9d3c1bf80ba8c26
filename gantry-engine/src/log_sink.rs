//! Per-run log streams
//!
//! Every run owns an append-only sequence of log entries that can be read
//! while the run is still in progress. The sink assigns sequence numbers
//! under its lock, so they are strictly increasing and gap-free from 1 for
//! each run and callers can poll with the last sequence they saw.
//!
//! Logs of terminal runs are retained for a grace period, then evicted;
//! when more terminal runs are retained than the cap allows, the ones that
//! finished first are evicted first.

use gantry_core::domain::log::{LogEntry, LogLevel};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use uuid::Uuid;

use crate::config::RetentionPolicy;

#[derive(Default)]
struct RunBuffer {
    entries: Vec<LogEntry>,
    next_sequence: u64,
    terminated_at: Option<Instant>,
}

/// Append-only log streams for all runs
pub struct LogSink {
    runs: Mutex<HashMap<Uuid, RunBuffer>>,
    retention: RetentionPolicy,
}

impl LogSink {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
            retention,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, RunBuffer>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the stream of a new run; reopening an existing one is a no-op
    pub fn open(&self, run_id: Uuid) {
        self.lock().entry(run_id).or_insert_with(|| RunBuffer {
            next_sequence: 1,
            ..RunBuffer::default()
        });
    }

    /// Appends an entry, assigning its sequence number and timestamp
    ///
    /// Returns `None` when the run has no open stream (never opened or
    /// already evicted).
    pub fn append(
        &self,
        run_id: Uuid,
        stage_name: Option<&str>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Option<LogEntry> {
        let mut runs = self.lock();
        let buffer = runs.get_mut(&run_id)?;

        let entry = LogEntry {
            run_id,
            stage_name: stage_name.map(str::to_string),
            sequence: buffer.next_sequence,
            level,
            message: message.into(),
            timestamp: chrono::Utc::now(),
        };
        buffer.next_sequence += 1;
        buffer.entries.push(entry.clone());

        Some(entry)
    }

    /// Returns the entries with a sequence number greater than `since`, in order
    pub fn read_from(&self, run_id: Uuid, since: u64) -> Option<Vec<LogEntry>> {
        let runs = self.lock();
        let buffer = runs.get(&run_id)?;

        let start = buffer.entries.partition_point(|e| e.sequence <= since);
        Some(buffer.entries[start..].to_vec())
    }

    /// Number of entries recorded for a run
    pub fn len(&self, run_id: Uuid) -> Option<usize> {
        self.lock().get(&run_id).map(|b| b.entries.len())
    }

    /// Starts the retention grace period of a finished run
    pub fn mark_terminated(&self, run_id: Uuid) {
        if let Some(buffer) = self.lock().get_mut(&run_id) {
            buffer.terminated_at.get_or_insert_with(Instant::now);
        }
    }

    /// Drops a run's stream immediately
    pub fn remove(&self, run_id: Uuid) {
        self.lock().remove(&run_id);
    }

    /// Evicts terminal runs past their grace period or over the retention cap
    ///
    /// Active runs are never evicted. Returns the ids of the evicted runs.
    pub fn evict_expired(&self) -> Vec<Uuid> {
        let now = Instant::now();
        let mut runs = self.lock();

        let mut terminated: Vec<(Uuid, Instant)> = runs
            .iter()
            .filter_map(|(id, b)| b.terminated_at.map(|at| (*id, at)))
            .collect();
        terminated.sort_by_key(|(_, at)| *at);

        let excess = terminated
            .len()
            .saturating_sub(self.retention.max_retained_runs);

        let evicted: Vec<Uuid> = terminated
            .iter()
            .enumerate()
            .filter(|(i, (_, at))| {
                *i < excess || now.duration_since(*at) >= self.retention.grace_period
            })
            .map(|(_, (id, _))| *id)
            .collect();

        for id in &evicted {
            runs.remove(id);
        }

        evicted
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}

/// Handle for writing to the log stream of one run
#[derive(Clone)]
pub struct RunLog {
    run_id: Uuid,
    sink: Arc<LogSink>,
}

impl RunLog {
    pub fn new(run_id: Uuid, sink: Arc<LogSink>) -> Self {
        Self { run_id, sink }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn append(&self, stage_name: Option<&str>, level: LogLevel, message: impl Into<String>) {
        self.sink.append(self.run_id, stage_name, level, message);
    }

    pub fn info(&self, stage_name: Option<&str>, message: impl Into<String>) {
        self.append(stage_name, LogLevel::Info, message);
    }

    pub fn success(&self, stage_name: Option<&str>, message: impl Into<String>) {
        self.append(stage_name, LogLevel::Success, message);
    }

    pub fn warn(&self, stage_name: Option<&str>, message: impl Into<String>) {
        self.append(stage_name, LogLevel::Warn, message);
    }

    pub fn error(&self, stage_name: Option<&str>, message: impl Into<String>) {
        self.append(stage_name, LogLevel::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_sequences_are_gap_free_per_run() {
        let sink = LogSink::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        sink.open(a);
        sink.open(b);

        for i in 0..3 {
            sink.append(a, None, LogLevel::Info, format!("a{}", i));
        }
        sink.append(b, Some("Build"), LogLevel::Error, "b0");

        let entries = sink.read_from(a, 0).unwrap();
        let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);

        let other = sink.read_from(b, 0).unwrap();
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].sequence, 1);
        assert_eq!(other[0].stage_name.as_deref(), Some("Build"));
    }

    #[test]
    fn test_read_from_cursor() {
        let sink = LogSink::default();
        let run = Uuid::new_v4();
        sink.open(run);
        for i in 0..5 {
            sink.append(run, None, LogLevel::Info, format!("line {}", i));
        }

        let tail = sink.read_from(run, 3).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].sequence, 4);
        assert_eq!(tail[0].message, "line 3");

        assert!(sink.read_from(run, 5).unwrap().is_empty());
        assert!(sink.read_from(run, 42).unwrap().is_empty());
    }

    #[test]
    fn test_append_to_unknown_run_is_dropped() {
        let sink = LogSink::default();
        let run = Uuid::new_v4();
        assert!(sink.append(run, None, LogLevel::Info, "lost").is_none());
        assert!(sink.read_from(run, 0).is_none());
    }

    #[test]
    fn test_reopen_keeps_entries() {
        let sink = LogSink::default();
        let run = Uuid::new_v4();
        sink.open(run);
        sink.append(run, None, LogLevel::Info, "first");
        sink.open(run);

        let entry = sink.append(run, None, LogLevel::Info, "second").unwrap();
        assert_eq!(entry.sequence, 2);
    }

    #[test]
    fn test_active_runs_are_never_evicted() {
        let sink = LogSink::new(RetentionPolicy {
            grace_period: Duration::ZERO,
            max_retained_runs: 1,
        });
        let run = Uuid::new_v4();
        sink.open(run);

        assert!(sink.evict_expired().is_empty());
        assert_eq!(sink.len(run), Some(0));
    }

    #[test]
    fn test_evicts_after_grace_period() {
        let sink = LogSink::new(RetentionPolicy {
            grace_period: Duration::ZERO,
            max_retained_runs: 10,
        });
        let run = Uuid::new_v4();
        sink.open(run);
        sink.mark_terminated(run);

        assert_eq!(sink.evict_expired(), vec![run]);
        assert!(sink.read_from(run, 0).is_none());
    }

    #[test]
    fn test_evicts_oldest_over_cap() {
        let sink = LogSink::new(RetentionPolicy {
            grace_period: Duration::from_secs(3600),
            max_retained_runs: 2,
        });
        let runs: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for run in &runs {
            sink.open(*run);
            sink.mark_terminated(*run);
            std::thread::sleep(Duration::from_millis(2));
        }

        assert_eq!(sink.evict_expired(), vec![runs[0]]);
        assert!(sink.read_from(runs[1], 0).is_some());
        assert!(sink.read_from(runs[2], 0).is_some());
    }
}
