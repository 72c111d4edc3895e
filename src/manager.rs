//! Administrative facade over the schedule store.
//!
//! Every mutation loads the job by name first and fails with
//! [`SchedulerError::JobNotFound`] if it is absent, so callers always get an
//! error naming the job rather than a silent no-op. The facade never talks
//! to the polling loop directly; it only edits rows, and the loop picks the
//! changes up on its next claim.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use crate::cron::CronEvaluator;
use crate::error::{Result, SchedulerError};
use crate::model::{JobStatus, MisfireStrategy, ScheduledJob};
use crate::store::ScheduleStore;

/// Administrative operations on scheduled jobs.
pub struct JobManager {
    store: Arc<dyn ScheduleStore>,
    evaluator: Arc<CronEvaluator>,
}

impl JobManager {
    pub fn new(store: Arc<dyn ScheduleStore>, evaluator: Arc<CronEvaluator>) -> Self {
        Self { store, evaluator }
    }

    /// Fetch a job by name.
    pub async fn get(&self, name: &str) -> Result<ScheduledJob> {
        self.load(name).await
    }

    /// All jobs, oldest first.
    pub async fn list(&self) -> Result<Vec<ScheduledJob>> {
        self.store.get_all_jobs().await
    }

    /// Re-enable a disabled job.
    ///
    /// Recurring jobs resume at their next cron occurrence; one-time jobs
    /// whose original run time has passed are scheduled to fire on the next
    /// poll.
    pub async fn enable(&self, name: &str) -> Result<ScheduledJob> {
        let mut job = self.load(name).await?;
        let now = Utc::now();

        let next = if job.schedule_type.is_recurring() {
            self.evaluator.next_occurrence(
                job.cron_expression.as_deref().unwrap_or(""),
                job.time_zone.as_deref(),
                now,
            )?
        } else {
            Some(now)
        };

        job.enable(next);
        self.store.update_job(&job).await?;
        info!(job = %job.name, next_run = ?job.next_run_time, "job enabled");
        Ok(job)
    }

    /// Soft-disable a job. The row and its history stay queryable.
    pub async fn disable(&self, name: &str) -> Result<ScheduledJob> {
        let mut job = self.load(name).await?;
        job.disable();
        self.store.update_job(&job).await?;
        info!(job = %job.name, "job disabled");
        Ok(job)
    }

    /// Force the job to run on the next poll, regardless of its cron
    /// schedule. Also re-enables a disabled job.
    pub async fn trigger(&self, name: &str) -> Result<ScheduledJob> {
        let mut job = self.load(name).await?;
        job.status = JobStatus::Pending;
        job.is_enabled = true;
        job.next_run_time = Some(Utc::now());
        job.clear_lock();
        job.date_updated = Utc::now();
        self.store.update_job(&job).await?;
        info!(job = %job.name, "job triggered");
        Ok(job)
    }

    /// Remove the job row and its execution history.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let job = self.load(name).await?;
        self.store.delete_job(job.id).await?;
        info!(job = %job.name, "job deleted");
        Ok(())
    }

    /// Create a one-time job due at `run_at`, which must be strictly in the
    /// future.
    pub async fn schedule_once(
        &self,
        name: &str,
        run_at: DateTime<Utc>,
        consumer_type: &str,
        payload: Option<String>,
    ) -> Result<ScheduledJob> {
        if run_at <= Utc::now() {
            return Err(SchedulerError::validation(format!(
                "run_at {run_at} is not in the future"
            )));
        }

        let mut job = ScheduledJob::one_time(name, run_at)
            .with_consumer_type(consumer_type)
            .with_misfire_strategy(MisfireStrategy::FireImmediately);
        job.payload = payload;

        self.store.upsert_job(&job).await?;
        info!(job = %job.name, run_at = %run_at, "one-time job scheduled");
        Ok(job)
    }

    async fn load(&self, name: &str) -> Result<ScheduledJob> {
        self.store
            .get_job_by_name(name)
            .await?
            .ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))
    }
}
