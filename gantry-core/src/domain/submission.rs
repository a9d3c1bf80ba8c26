//! Submission domain types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Metadata key holding the name of the submitted source file
pub const FILENAME_KEY: &str = "filename";

/// Metadata key holding the commit message accompanying a submission
pub const MESSAGE_KEY: &str = "message";

/// Source code handed to the engine for one pipeline run
///
/// The payload is opaque to the engine; only collaborators interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub payload: Vec<u8>,
    pub metadata: HashMap<String, String>,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
}

impl Submission {
    /// Creates a submission with a generated id
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: format!("sub-{}", Uuid::new_v4()),
            payload: payload.into(),
            metadata: HashMap::new(),
            submitted_at: chrono::Utc::now(),
        }
    }

    /// Replaces the generated id with a caller-supplied one
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Adds a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns the submitted filename, if any
    pub fn filename(&self) -> Option<&str> {
        self.metadata
            .get(FILENAME_KEY)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    /// Returns the commit message, if any
    pub fn message(&self) -> Option<&str> {
        self.metadata.get(MESSAGE_KEY).map(String::as_str)
    }

    /// Key used to serialize runs targeting the same logical artifact
    ///
    /// Falls back to the submission id when no filename was supplied, so
    /// anonymous submissions never block each other.
    pub fn key(&self) -> &str {
        self.filename().unwrap_or(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = Submission::new("fn main() {}");
        let b = Submission::new("fn main() {}");
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("sub-"));
    }

    #[test]
    fn test_key_prefers_filename() {
        let submission = Submission::new("code")
            .with_id("s1")
            .with_metadata(FILENAME_KEY, "App.java");
        assert_eq!(submission.key(), "App.java");
    }

    #[test]
    fn test_key_falls_back_to_id() {
        let submission = Submission::new("code")
            .with_id("s1")
            .with_metadata(FILENAME_KEY, "");
        assert_eq!(submission.key(), "s1");
        assert_eq!(submission.filename(), None);
    }
}
