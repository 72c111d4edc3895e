//! Schedule store contract and the in-memory backend.
//!
//! The durable engine (tables, indexes, claim queries) lives outside this
//! crate; the scheduler consumes it through [`ScheduleStore`]. The in-memory
//! backend implements the same contract for development and tests, including
//! the atomicity guarantee of the claim operation: a due job is handed to at
//! most one caller per polling round.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::{Result, SchedulerError};
use crate::model::{ExecutionId, ExecutionStatus, JobExecution, JobId, JobStatus, ScheduledJob};

/// Durable state for jobs and executions.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Atomically claim up to `batch_size` due jobs (`Pending`, enabled,
    /// `next_run_time <= now`), transitioning them to `Running` and stamping
    /// `instance_id` as the claim owner.
    async fn acquire_due_jobs(
        &self,
        batch_size: usize,
        instance_id: &str,
    ) -> Result<Vec<ScheduledJob>>;

    async fn get_all_jobs(&self) -> Result<Vec<ScheduledJob>>;

    async fn get_job_by_name(&self, name: &str) -> Result<Option<ScheduledJob>>;

    /// Insert or replace a job row.
    async fn upsert_job(&self, job: &ScheduledJob) -> Result<()>;

    /// Replace an existing job row; fails if the row is gone.
    async fn update_job(&self, job: &ScheduledJob) -> Result<()>;

    async fn delete_job(&self, id: JobId) -> Result<()>;

    async fn insert_execution(&self, execution: &JobExecution) -> Result<()>;

    async fn update_execution(&self, execution: &JobExecution) -> Result<()>;

    /// Release jobs stuck in `Running` longer than `threshold` back to
    /// `Pending` with lock fields cleared. Returns the number released.
    async fn release_stale_jobs(&self, threshold: Duration) -> Result<u64>;

    /// Mark executions stuck in `Running` longer than `bound` as `Failed`.
    /// Returns the number marked.
    async fn timeout_stale_executions(&self, bound: Duration) -> Result<u64>;

    /// Purge finished executions older than `retention`. Returns the number
    /// purged.
    async fn purge_executions(&self, retention: Duration) -> Result<u64>;
}

/// In-memory schedule store for development and tests.
#[derive(Default)]
pub struct InMemoryScheduleStore {
    jobs: RwLock<HashMap<JobId, ScheduledJob>>,
    executions: RwLock<HashMap<ExecutionId, JobExecution>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: fetch an execution row by id.
    pub async fn get_execution(&self, id: ExecutionId) -> Option<JobExecution> {
        self.executions.read().await.get(&id).cloned()
    }

    /// Test helper: all execution rows for a job, oldest first.
    pub async fn executions_for(&self, job_id: JobId) -> Vec<JobExecution> {
        let mut rows: Vec<JobExecution> = self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.started_at);
        rows
    }

    /// Test helper: total number of execution rows.
    pub async fn execution_count(&self) -> usize {
        self.executions.read().await.len()
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn acquire_due_jobs(
        &self,
        batch_size: usize,
        instance_id: &str,
    ) -> Result<Vec<ScheduledJob>> {
        let now = Utc::now();
        // A single write lock over the whole scan-and-mark makes the claim
        // atomic: no other caller can observe the candidates in between.
        let mut jobs = self.jobs.write().await;

        let mut due: Vec<JobId> = jobs
            .values()
            .filter(|job| job.is_due(now))
            .map(|job| job.id)
            .collect();
        due.sort_by_key(|id| jobs[id].next_run_time);
        due.truncate(batch_size);

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            if let Some(job) = jobs.get_mut(&id) {
                job.claim(instance_id, now);
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn get_all_jobs(&self) -> Result<Vec<ScheduledJob>> {
        let jobs = self.jobs.read().await;
        let mut rows: Vec<ScheduledJob> = jobs.values().cloned().collect();
        rows.sort_by_key(|job| job.date_created);
        Ok(rows)
    }

    async fn get_job_by_name(&self, name: &str) -> Result<Option<ScheduledJob>> {
        let jobs = self.jobs.read().await;
        Ok(jobs.values().find(|job| job.name == name).cloned())
    }

    async fn upsert_job(&self, job: &ScheduledJob) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &ScheduledJob) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(SchedulerError::store(format!(
                "job row {} no longer exists",
                job.id
            ))),
        }
    }

    async fn delete_job(&self, id: JobId) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        jobs.remove(&id);
        let mut executions = self.executions.write().await;
        executions.retain(|_, e| e.job_id != id);
        Ok(())
    }

    async fn insert_execution(&self, execution: &JobExecution) -> Result<()> {
        let mut executions = self.executions.write().await;
        executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update_execution(&self, execution: &JobExecution) -> Result<()> {
        let mut executions = self.executions.write().await;
        executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn release_stale_jobs(&self, threshold: Duration) -> Result<u64> {
        let cutoff = Utc::now() - to_chrono(threshold);
        let mut jobs = self.jobs.write().await;
        let mut released = 0;
        for job in jobs.values_mut() {
            let stale = job.status == JobStatus::Running
                && job.date_locked.is_some_and(|locked| locked < cutoff);
            if stale {
                job.status = JobStatus::Pending;
                job.clear_lock();
                job.date_updated = Utc::now();
                released += 1;
            }
        }
        Ok(released)
    }

    async fn timeout_stale_executions(&self, bound: Duration) -> Result<u64> {
        let now = Utc::now();
        let cutoff = now - to_chrono(bound);
        let mut executions = self.executions.write().await;
        let mut marked = 0;
        for execution in executions.values_mut() {
            if execution.status == ExecutionStatus::Running && execution.started_at < cutoff {
                let elapsed = (now - execution.started_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                execution.fail(now, elapsed, "execution timed out (stale recovery)");
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn purge_executions(&self, retention: Duration) -> Result<u64> {
        let cutoff = Utc::now() - to_chrono(retention);
        let mut executions = self.executions.write().await;
        let before = executions.len();
        executions.retain(|_, e| {
            !(e.status.is_terminal() && e.date_completed.is_some_and(|done| done < cutoff))
        });
        Ok((before - executions.len()) as u64)
    }
}

/// Convert a std duration to chrono, saturating on overflow.
pub(crate) fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::MAX)
}
