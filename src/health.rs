//! Health probe for the scheduling control plane.
//!
//! The probe is a pure read: it scans the job table and reports, never
//! mutates. A job counts as stale when it has sat in Running longer than the
//! configured threshold, which usually means the claiming instance died
//! mid-dispatch and stale recovery has not caught up yet.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::model::JobStatus;
use crate::store::{to_chrono, ScheduleStore};

// ═══════════════════════════════════════════════════════════════════════════════
// Health Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Health status of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Fully operational.
    Healthy,
    /// Operational but with issues worth attention.
    Degraded,
    /// Not operational.
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::Healthy
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Health Report
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of one probe run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,

    /// Component name, fixed to the scheduler.
    pub component: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub checked_at: DateTime<Utc>,

    /// Additional details (stale job counts and names).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Error details, present only when unhealthy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    fn new(status: HealthStatus) -> Self {
        Self {
            status,
            component: "scheduler".to_string(),
            message: None,
            checked_at: Utc::now(),
            metadata: HashMap::new(),
            error: None,
        }
    }

    pub fn healthy() -> Self {
        Self::new(HealthStatus::Healthy)
    }

    pub fn degraded() -> Self {
        Self::new(HealthStatus::Degraded)
    }

    pub fn unhealthy() -> Self {
        Self::new(HealthStatus::Unhealthy)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.metadata.insert(key.into(), v);
        }
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Health Check
// ═══════════════════════════════════════════════════════════════════════════════

/// Read-only staleness probe over the schedule store.
pub struct SchedulerHealthCheck {
    config: Arc<SchedulerConfig>,
    store: Arc<dyn ScheduleStore>,
}

impl SchedulerHealthCheck {
    pub fn new(config: Arc<SchedulerConfig>, store: Arc<dyn ScheduleStore>) -> Self {
        Self { config, store }
    }

    /// Run the probe once.
    pub async fn check(&self) -> HealthReport {
        let jobs = match self.store.get_all_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                return HealthReport::unhealthy()
                    .with_message("schedule store unreachable")
                    .with_error(e.to_string());
            }
        };

        let cutoff = Utc::now() - to_chrono(self.config.stale_job_threshold);
        let stale: Vec<&str> = jobs
            .iter()
            .filter(|job| {
                job.status == JobStatus::Running
                    && job.date_locked.is_some_and(|locked| locked < cutoff)
            })
            .map(|job| job.name.as_str())
            .collect();

        if stale.is_empty() {
            HealthReport::healthy().with_metadata("jobs", jobs.len())
        } else {
            HealthReport::degraded()
                .with_message(format!("{} job(s) stuck in running state", stale.len()))
                .with_metadata("jobs", jobs.len())
                .with_metadata("stale_jobs", stale.len())
                .with_metadata("stale_job_names", &stale)
        }
    }
}
