//! Scheduler configuration.
//!
//! Loaded from an optional TOML file plus `CHRONOS__`-prefixed environment
//! variables. Durations accept humantime strings ("30s", "5m", "7d").

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Configuration for the scheduling control plane.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Identity stamped on claims made by this process instance.
    #[serde(default = "default_instance_id")]
    pub instance_id: String,

    /// How often the polling loop claims due jobs.
    #[serde(with = "humantime_serde", default = "default_polling_interval")]
    pub polling_interval: Duration,

    /// Maximum jobs claimed per polling round.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Dispatch deadline for jobs without a per-job timeout. `None` means
    /// unbounded.
    #[serde(with = "humantime_serde", default)]
    pub default_job_timeout: Option<Duration>,

    /// Lateness beyond which a due recurring occurrence counts as a misfire.
    #[serde(with = "humantime_serde", default = "default_misfire_threshold")]
    pub misfire_threshold: Duration,

    /// How long a job may sit in Running before stale recovery releases it.
    #[serde(with = "humantime_serde", default = "default_stale_job_threshold")]
    pub stale_job_threshold: Duration,

    /// Cadence of the stale recovery sweep.
    #[serde(with = "humantime_serde", default = "default_stale_job_check_interval")]
    pub stale_job_check_interval: Duration,

    /// Execution history older than this is purged.
    #[serde(with = "humantime_serde", default = "default_execution_retention")]
    pub execution_retention: Duration,

    /// Per-job cron expression overrides, keyed by job name. An override that
    /// fails validation is ignored in favor of the declared expression.
    #[serde(default)]
    pub cron_overrides: HashMap<String, String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            polling_interval: default_polling_interval(),
            batch_size: default_batch_size(),
            default_job_timeout: None,
            misfire_threshold: default_misfire_threshold(),
            stale_job_threshold: default_stale_job_threshold(),
            stale_job_check_interval: default_stale_job_check_interval(),
            execution_retention: default_execution_retention(),
            cron_overrides: HashMap::new(),
        }
    }
}

// Default value functions
fn default_instance_id() -> String {
    format!("chronos-{}", Uuid::new_v4())
}
fn default_polling_interval() -> Duration {
    Duration::from_secs(5)
}
fn default_batch_size() -> usize {
    10
}
fn default_misfire_threshold() -> Duration {
    Duration::from_secs(60)
}
fn default_stale_job_threshold() -> Duration {
    Duration::from_secs(600)
}
fn default_stale_job_check_interval() -> Duration {
    Duration::from_secs(60)
}
fn default_execution_retention() -> Duration {
    Duration::from_secs(7 * 24 * 3600)
}

impl SchedulerConfig {
    /// Load configuration from the environment only.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("CHRONOS").separator("__"))
            .build()?;

        let cfg: SchedulerConfig = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides on top.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("CHRONOS").separator("__"))
            .build()?;

        let cfg: SchedulerConfig = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Look up the cron override for a job name, if one is configured.
    pub fn cron_override(&self, job_name: &str) -> Option<&str> {
        self.cron_overrides.get(job_name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.polling_interval, Duration::from_secs(5));
        assert_eq!(cfg.batch_size, 10);
        assert!(cfg.default_job_timeout.is_none());
        assert_eq!(cfg.misfire_threshold, Duration::from_secs(60));
        assert_eq!(cfg.stale_job_threshold, Duration::from_secs(600));
        assert_eq!(cfg.execution_retention, Duration::from_secs(604_800));
        assert!(cfg.instance_id.starts_with("chronos-"));
        assert!(cfg.cron_overrides.is_empty());
    }

    #[test]
    fn test_cron_override_lookup() {
        let mut cfg = SchedulerConfig::default();
        cfg.cron_overrides
            .insert("nightly-report".into(), "0 0 2 * * *".into());
        assert_eq!(cfg.cron_override("nightly-report"), Some("0 0 2 * * *"));
        assert_eq!(cfg.cron_override("other"), None);
    }

    #[test]
    fn test_instance_ids_are_unique() {
        assert_ne!(default_instance_id(), default_instance_id());
    }
}
