//! Scheduler configuration
//!
//! Defines the tunables of the run scheduler: worker pool size, the optional
//! whole-run timeout and how long finished runs stay observable.

use std::time::Duration;

use crate::error::ConfigError;

/// How long terminal runs and their logs are retained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Time a terminal run stays readable after it finishes
    pub grace_period: Duration,

    /// Maximum number of terminal runs kept; the oldest are evicted first
    pub max_retained_runs: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(300),
            max_retained_runs: 100,
        }
    }
}

/// Run scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Max runs executing concurrently
    pub workers: usize,

    /// Upper bound on the wall-clock time of a whole run
    pub run_timeout: Option<Duration>,

    pub retention: RetentionPolicy,
}

impl SchedulerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = Some(run_timeout);
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::InvalidScheduler(
                "workers must be greater than 0".to_string(),
            ));
        }

        if self.run_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::InvalidScheduler(
                "run_timeout must be greater than 0".to_string(),
            ));
        }

        if self.retention.max_retained_runs == 0 {
            return Err(ConfigError::InvalidScheduler(
                "max_retained_runs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            run_timeout: None,
            retention: RetentionPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.workers, 2);
        assert_eq!(config.run_timeout, None);
        assert_eq!(config.retention.grace_period, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SchedulerConfig::default().with_workers(0);
        assert!(config.validate().is_err());

        config.workers = 4;
        assert!(config.validate().is_ok());

        config.run_timeout = Some(Duration::ZERO);
        assert!(config.validate().is_err());

        config.run_timeout = Some(Duration::from_secs(60));
        config.retention.max_retained_runs = 0;
        assert!(config.validate().is_err());
    }
}
