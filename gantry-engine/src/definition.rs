//! Pipeline definition
//!
//! The ordered, immutable list of stages every run executes. Built once at
//! startup and shared by all runs.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::collaborator::Collaborator;
use crate::error::ConfigError;

/// Default per-attempt stage timeout (5 minutes)
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default base delay between attempts
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Specification of one stage
#[derive(Clone)]
pub struct StageSpec {
    name: String,
    collaborator: Arc<dyn Collaborator>,
    timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
}

impl StageSpec {
    /// Creates a stage with default timeout and no retries
    pub fn new(name: impl Into<String>, collaborator: impl Collaborator + 'static) -> Self {
        Self::from_arc(name, Arc::new(collaborator))
    }

    /// Creates a stage around a shared collaborator
    pub fn from_arc(name: impl Into<String>, collaborator: Arc<dyn Collaborator>) -> Self {
        Self {
            name: name.into(),
            collaborator,
            timeout: DEFAULT_STAGE_TIMEOUT,
            max_retries: 0,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Base delay; attempt `n` waits `retry_backoff * n` before retrying
    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collaborator(&self) -> &dyn Collaborator {
        self.collaborator.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_backoff(&self) -> Duration {
        self.retry_backoff
    }
}

impl std::fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSpec")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff", &self.retry_backoff)
            .finish_non_exhaustive()
    }
}

/// Validated, ordered sequence of stages
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    name: String,
    stages: Vec<StageSpec>,
}

impl PipelineDefinition {
    /// Builds a definition, rejecting empty stage lists, blank or duplicate
    /// stage names and zero timeouts
    pub fn new(name: impl Into<String>, stages: Vec<StageSpec>) -> Result<Self, ConfigError> {
        if stages.is_empty() {
            return Err(ConfigError::EmptyPipeline);
        }

        let mut seen = HashSet::new();
        for stage in &stages {
            if stage.name.trim().is_empty() {
                return Err(ConfigError::EmptyStageName);
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(ConfigError::DuplicateStage(stage.name.clone()));
            }
            if stage.timeout.is_zero() {
                return Err(ConfigError::ZeroTimeout(stage.name.clone()));
            }
        }

        Ok(Self {
            name: name.into(),
            stages,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(StageSpec::name)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false for a validated definition
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::from_fn;
    use crate::context::StageOutput;
    use crate::error::StageError;

    fn noop(name: &str) -> StageSpec {
        StageSpec::new(
            name,
            from_fn(|_| async { Ok::<_, StageError>(StageOutput::empty()) }),
        )
    }

    #[test]
    fn test_valid_definition() {
        let definition =
            PipelineDefinition::new("ci", vec![noop("Checkout"), noop("Build")]).unwrap();
        assert_eq!(definition.len(), 2);
        assert_eq!(
            definition.stage_names().collect::<Vec<_>>(),
            vec!["Checkout", "Build"]
        );
    }

    #[test]
    fn test_rejects_empty_pipeline() {
        let err = PipelineDefinition::new("ci", Vec::new()).unwrap_err();
        assert_eq!(err, ConfigError::EmptyPipeline);
    }

    #[test]
    fn test_rejects_duplicate_stage_names() {
        let err = PipelineDefinition::new("ci", vec![noop("Build"), noop("Test"), noop("Build")])
            .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateStage("Build".to_string()));
    }

    #[test]
    fn test_rejects_blank_name_and_zero_timeout() {
        assert_eq!(
            PipelineDefinition::new("ci", vec![noop("  ")]).unwrap_err(),
            ConfigError::EmptyStageName
        );

        let stage = noop("Build").with_timeout(Duration::ZERO);
        assert_eq!(
            PipelineDefinition::new("ci", vec![stage]).unwrap_err(),
            ConfigError::ZeroTimeout("Build".to_string())
        );
    }

    #[test]
    fn test_stage_defaults() {
        let stage = noop("Build");
        assert_eq!(stage.timeout(), DEFAULT_STAGE_TIMEOUT);
        assert_eq!(stage.max_retries(), 0);
        assert_eq!(stage.retry_backoff(), DEFAULT_RETRY_BACKOFF);
    }
}
