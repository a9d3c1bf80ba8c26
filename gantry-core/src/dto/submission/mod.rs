//! Submission DTOs

use serde::{Deserialize, Serialize};

use crate::domain::submission::{FILENAME_KEY, MESSAGE_KEY, Submission};

/// Request to submit source code to the pipeline
///
/// Mirrors a commit form: the code itself, the file it belongs to and a
/// commit message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubmission {
    /// Caller-supplied submission id; generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub code: String,
    pub filename: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl CreateSubmission {
    /// Converts the request into a domain submission
    pub fn into_submission(self) -> Submission {
        let mut submission =
            Submission::new(self.code.into_bytes()).with_metadata(FILENAME_KEY, self.filename);

        if let Some(message) = self.message {
            submission = submission.with_metadata(MESSAGE_KEY, message);
        }

        match self.id {
            Some(id) => submission.with_id(id),
            None => submission,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_submission() {
        let request: CreateSubmission = serde_json::from_str(
            r#"{"code":"class App {}","filename":"App.java","message":"initial commit"}"#,
        )
        .unwrap();

        let submission = request.into_submission();
        assert_eq!(submission.payload, b"class App {}");
        assert_eq!(submission.filename(), Some("App.java"));
        assert_eq!(submission.message(), Some("initial commit"));
        assert_eq!(submission.key(), "App.java");
        assert!(submission.id.starts_with("sub-"));
    }

    #[test]
    fn test_into_submission_keeps_caller_id() {
        let request = CreateSubmission {
            id: Some("s1".to_string()),
            code: String::new(),
            filename: "main.rs".to_string(),
            message: None,
        };

        let submission = request.into_submission();
        assert_eq!(submission.id, "s1");
        assert_eq!(submission.message(), None);
    }
}
