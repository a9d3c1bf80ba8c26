//! Log DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::log::LogEntry;

/// A page of run log entries read from a cursor
///
/// `next_cursor` is the sequence number to pass on the next read; it equals
/// the requested cursor when no new entries were available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogPage {
    pub run_id: Uuid,
    pub entries: Vec<LogEntry>,
    pub next_cursor: u64,
}

impl LogPage {
    /// Builds a page from entries read after `since`
    pub fn new(run_id: Uuid, since: u64, entries: Vec<LogEntry>) -> Self {
        let next_cursor = entries.last().map(|e| e.sequence).unwrap_or(since);
        Self {
            run_id,
            entries,
            next_cursor,
        }
    }
}
