//! Runner configuration
//!
//! Defines the settings of the local pipeline runner: worker pool size,
//! whole-run timeout, log retention and where run workspaces live.

use gantry_engine::{RetentionPolicy, SchedulerConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Max runs executing concurrently
    pub workers: usize,

    /// Upper bound on the wall-clock time of a whole run
    pub run_timeout: Option<Duration>,

    /// How long logs of a finished run stay readable
    pub log_grace_period: Duration,

    /// Maximum number of finished runs retained
    pub max_retained_runs: usize,

    /// Directory holding one workspace per run
    pub workspace: PathBuf,

    /// How often the follower polls for new log entries
    pub poll_interval: Duration,
}

impl Config {
    /// Creates a configuration with defaults
    pub fn new() -> Self {
        Self {
            workers: 2,
            run_timeout: None,
            log_grace_period: Duration::from_secs(300),
            max_retained_runs: 100,
            workspace: std::env::temp_dir().join("gantry"),
            poll_interval: Duration::from_millis(250),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - GANTRY_WORKERS (default: 2)
    /// - GANTRY_RUN_TIMEOUT (seconds, default: none)
    /// - GANTRY_LOG_GRACE_PERIOD (seconds, default: 300)
    /// - GANTRY_MAX_RETAINED_RUNS (default: 100)
    /// - GANTRY_WORKSPACE (default: <temp dir>/gantry)
    /// - GANTRY_POLL_INTERVAL (milliseconds, default: 250)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::new();

        let workers = lookup("GANTRY_WORKERS")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.workers);

        let run_timeout = lookup("GANTRY_RUN_TIMEOUT")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);

        let log_grace_period = lookup("GANTRY_LOG_GRACE_PERIOD")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.log_grace_period);

        let max_retained_runs = lookup("GANTRY_MAX_RETAINED_RUNS")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.max_retained_runs);

        let workspace = lookup("GANTRY_WORKSPACE")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.workspace);

        let poll_interval = lookup("GANTRY_POLL_INTERVAL")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);

        Self {
            workers,
            run_timeout,
            log_grace_period,
            max_retained_runs,
            workspace,
            poll_interval,
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            anyhow::bail!("workers must be greater than 0");
        }

        if self.run_timeout.is_some_and(|t| t.is_zero()) {
            anyhow::bail!("run_timeout must be greater than 0");
        }

        if self.max_retained_runs == 0 {
            anyhow::bail!("max_retained_runs must be greater than 0");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        // Logs must outlive the follower's final poll
        if self.log_grace_period < self.poll_interval {
            anyhow::bail!("log_grace_period must be at least poll_interval");
        }

        Ok(())
    }

    /// Scheduler settings derived from this configuration
    pub fn scheduler(&self) -> SchedulerConfig {
        let mut config = SchedulerConfig::default()
            .with_workers(self.workers)
            .with_retention(RetentionPolicy {
                grace_period: self.log_grace_period,
                max_retained_runs: self.max_retained_runs,
            });
        config.run_timeout = self.run_timeout;
        config
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.workers, 2);
        assert_eq!(config.run_timeout, None);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert!(config.workspace.ends_with("gantry"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_env_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("GANTRY_WORKERS", "4"),
            ("GANTRY_RUN_TIMEOUT", "600"),
            ("GANTRY_WORKSPACE", "/srv/gantry"),
            ("GANTRY_POLL_INTERVAL", "not-a-number"),
        ]));

        assert_eq!(config.workers, 4);
        assert_eq!(config.run_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.workspace, PathBuf::from("/srv/gantry"));
        // Unparseable values fall back to defaults
        assert_eq!(config.poll_interval, Duration::from_millis(250));

        let scheduler = config.scheduler();
        assert_eq!(scheduler.workers, 4);
        assert_eq!(scheduler.run_timeout, Some(Duration::from_secs(600)));
        assert_eq!(scheduler.retention.max_retained_runs, 100);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.workers = 0;
        assert!(config.validate().is_err());

        config.workers = 1;
        config.run_timeout = Some(Duration::ZERO);
        assert!(config.validate().is_err());

        config.run_timeout = None;
        config.max_retained_runs = 0;
        assert!(config.validate().is_err());

        config.max_retained_runs = 10;
        config.log_grace_period = Duration::from_millis(100);
        assert!(config.validate().is_err());
    }
}
