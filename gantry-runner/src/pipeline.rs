//! Pipeline files
//!
//! A pipeline file is JSON describing the stages to run against each
//! submission:
//!
//! ```json
//! {
//!   "name": "java-app",
//!   "stages": [
//!     { "name": "Build", "command": "javac", "args": ["{file}"], "max_retries": 1 },
//!     { "name": "Test", "command": "java", "args": ["App"], "timeout_secs": 60 }
//!   ]
//! }
//! ```

use anyhow::{Context, Result};
use gantry_engine::{ConfigError, PipelineDefinition, StageSpec};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::stages::{CommandStage, PrepareWorkspace, WORKSPACE_STAGE};

/// One stage of a pipeline file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFile {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Per-attempt timeout; the engine default applies when absent
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_backoff_ms: Option<u64>,
}

/// Parsed pipeline file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineFile {
    pub name: String,
    pub stages: Vec<StageFile>,
}

impl PipelineFile {
    /// Reads and parses a pipeline file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Invalid pipeline file {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Builds the pipeline definition, with the workspace stage first
    pub fn into_definition(self, workspace: &Path) -> Result<PipelineDefinition, ConfigError> {
        if self.stages.is_empty() {
            return Err(ConfigError::EmptyPipeline);
        }

        let mut stages = vec![StageSpec::new(
            WORKSPACE_STAGE,
            PrepareWorkspace::new(workspace),
        )];

        for stage in self.stages {
            let mut spec = StageSpec::new(stage.name, CommandStage::new(stage.command, stage.args))
                .with_max_retries(stage.max_retries);
            if let Some(secs) = stage.timeout_secs {
                spec = spec.with_timeout(Duration::from_secs(secs));
            }
            if let Some(ms) = stage.retry_backoff_ms {
                spec = spec.with_retry_backoff(Duration::from_millis(ms));
            }
            stages.push(spec);
        }

        PipelineDefinition::new(self.name, stages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JAVA_PIPELINE: &str = r#"{
        "name": "java-app",
        "stages": [
            { "name": "Build", "command": "javac", "args": ["{file}"], "max_retries": 1 },
            { "name": "Test", "command": "java", "args": ["App"], "timeout_secs": 60,
              "retry_backoff_ms": 500 }
        ]
    }"#;

    #[test]
    fn test_parse_pipeline_file() {
        let file = PipelineFile::parse(JAVA_PIPELINE).unwrap();
        assert_eq!(file.name, "java-app");
        assert_eq!(file.stages.len(), 2);
        assert_eq!(file.stages[0].args, vec!["{file}".to_string()]);
        assert_eq!(file.stages[0].timeout_secs, None);
        assert_eq!(file.stages[1].max_retries, 0);
    }

    #[test]
    fn test_into_definition_prepends_workspace_stage() {
        let definition = PipelineFile::parse(JAVA_PIPELINE)
            .unwrap()
            .into_definition(Path::new("/tmp/gantry"))
            .unwrap();

        let names: Vec<&str> = definition.stage_names().collect();
        assert_eq!(names, vec![WORKSPACE_STAGE, "Build", "Test"]);

        let test = &definition.stages()[2];
        assert_eq!(test.timeout(), Duration::from_secs(60));
        assert_eq!(test.retry_backoff(), Duration::from_millis(500));
        assert_eq!(definition.stages()[1].max_retries(), 1);
    }

    #[test]
    fn test_invalid_pipeline_files() {
        assert!(PipelineFile::parse("{\"name\": \"x\"}").is_err());

        let empty = PipelineFile::parse(r#"{"name": "x", "stages": []}"#).unwrap();
        assert_eq!(
            empty.into_definition(Path::new("/tmp")).unwrap_err(),
            ConfigError::EmptyPipeline
        );

        let zero = PipelineFile::parse(
            r#"{"name": "x", "stages": [{"name": "Build", "command": "make", "timeout_secs": 0}]}"#,
        )
        .unwrap();
        assert_eq!(
            zero.into_definition(Path::new("/tmp")).unwrap_err(),
            ConfigError::ZeroTimeout("Build".to_string())
        );

        let clash = PipelineFile::parse(
            r#"{"name": "x", "stages": [{"name": "Workspace", "command": "ls"}]}"#,
        )
        .unwrap();
        assert_eq!(
            clash.into_definition(Path::new("/tmp")).unwrap_err(),
            ConfigError::DuplicateStage(WORKSPACE_STAGE.to_string())
        );
    }
}
