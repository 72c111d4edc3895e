//! The polling engine: claim, misfire check, lock, dispatch, reschedule.
//!
//! One long-lived polling task per process instance. Every tick atomically
//! claims a batch of due jobs from the store and processes each claimed job
//! as an independent spawned task, so a slow job never blocks the rest of
//! its batch. Per-job state transitions after dispatch always re-read the
//! persisted row first: a job disabled by an operator while its dispatch was
//! in flight stays disabled, whatever the dispatch outcome.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::cron::CronEvaluator;
use crate::dispatch::JobDispatcher;
use crate::error::{Result, SchedulerError};
use crate::lock::LockProvider;
use crate::model::{JobExecution, JobStatus, MisfireStrategy, ScheduledJob};
use crate::store::{to_chrono, ScheduleStore};

// ═══════════════════════════════════════════════════════════════════════════════
// Statistics
// ═══════════════════════════════════════════════════════════════════════════════

/// Counters for the polling loop.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    claimed: Arc<AtomicU64>,
    dispatched: Arc<AtomicU64>,
    succeeded: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    misfires: Arc<AtomicU64>,
    lock_skips: Arc<AtomicU64>,
}

impl SchedulerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claimed(&self) -> u64 {
        self.claimed.load(Ordering::Relaxed)
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn misfires(&self) -> u64 {
        self.misfires.load(Ordering::Relaxed)
    }

    pub fn lock_skips(&self) -> u64 {
        self.lock_skips.load(Ordering::Relaxed)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handle
// ═══════════════════════════════════════════════════════════════════════════════

/// Handle for controlling a running scheduler loop.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
    stats: SchedulerStats,
}

impl SchedulerHandle {
    /// Signal shutdown and wait for the loop to finish its current tick.
    /// In-flight dispatches keep running to their own timeout or completion.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Scheduler Loop
// ═══════════════════════════════════════════════════════════════════════════════

/// The polling engine.
#[derive(Clone)]
pub struct SchedulerLoop {
    config: Arc<SchedulerConfig>,
    store: Arc<dyn ScheduleStore>,
    evaluator: Arc<CronEvaluator>,
    dispatcher: Arc<JobDispatcher>,
    lock_provider: Option<Arc<dyn LockProvider>>,
    stats: SchedulerStats,
}

impl SchedulerLoop {
    pub fn new(
        config: Arc<SchedulerConfig>,
        store: Arc<dyn ScheduleStore>,
        evaluator: Arc<CronEvaluator>,
        dispatcher: Arc<JobDispatcher>,
        lock_provider: Option<Arc<dyn LockProvider>>,
    ) -> Self {
        Self {
            config,
            store,
            evaluator,
            dispatcher,
            lock_provider,
            stats: SchedulerStats::new(),
        }
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Start the polling task, returning a handle for control.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();

        let task = tokio::spawn(async move {
            info!(
                instance = %self.config.instance_id,
                interval = ?self.config.polling_interval,
                batch_size = self.config.batch_size,
                "scheduler loop started"
            );
            let mut interval = tokio::time::interval(self.config.polling_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.tick().await {
                            error!(error = %e, "polling tick failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!(instance = %self.config.instance_id, "scheduler loop shutting down");
                            break;
                        }
                    }
                }
            }
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            task,
            stats,
        }
    }

    /// One polling round: claim a batch and hand every claimed job to its own
    /// task. Returns after the claim; per-job processing is concurrent.
    pub async fn tick(&self) -> Result<()> {
        let claimed = self
            .store
            .acquire_due_jobs(self.config.batch_size, &self.config.instance_id)
            .await?;
        if claimed.is_empty() {
            return Ok(());
        }

        self.stats
            .claimed
            .fetch_add(claimed.len() as u64, Ordering::Relaxed);
        debug!(count = claimed.len(), "claimed due jobs");

        for job in claimed {
            let this = self.clone();
            tokio::spawn(async move {
                this.process_claimed(job).await;
            });
        }
        Ok(())
    }

    /// Drive one claimed job through misfire check, lock, dispatch, and the
    /// post-dispatch state transition.
    async fn process_claimed(&self, job: ScheduledJob) {
        let now = Utc::now();

        // Misfire policy applies to recurring jobs only; a late one-time job
        // always fires.
        if job.schedule_type.is_recurring()
            && job.misfire_strategy == MisfireStrategy::SkipAndScheduleNext
        {
            if let Some(next_run) = job.next_run_time {
                let lateness = now.signed_duration_since(next_run);
                if lateness > to_chrono(self.config.misfire_threshold) {
                    self.skip_misfired(job, now).await;
                    return;
                }
            }
        }

        // Second line of defense behind the atomic claim. Only consulted for
        // jobs that opted in, and only when a provider is registered.
        let _lock_guard = match (&self.lock_provider, job.skip_if_running) {
            (Some(provider), true) => {
                let key = format!("chronos:job:{}", job.name);
                match provider
                    .try_acquire(&key, self.config.stale_job_threshold)
                    .await
                {
                    Ok(Some(guard)) => Some(guard),
                    Ok(None) => {
                        debug!(job = %job.name, "lock held elsewhere, releasing claim");
                        self.stats.lock_skips.fetch_add(1, Ordering::Relaxed);
                        self.release_claim(job).await;
                        return;
                    }
                    Err(e) => {
                        warn!(job = %job.name, error = %e, "lock provider failed, releasing claim");
                        self.release_claim(job).await;
                        return;
                    }
                }
            }
            _ => None,
        };

        let started_at = Utc::now();
        let execution = JobExecution::start(&job, started_at);
        if let Err(e) = self.store.insert_execution(&execution).await {
            error!(job = %job.name, error = %e, "failed to record execution, releasing claim");
            self.release_claim(job).await;
            return;
        }

        let deadline = job.timeout.or(self.config.default_job_timeout);
        let started = Instant::now();
        let result = match deadline {
            Some(limit) => {
                match tokio::time::timeout(limit, self.dispatcher.dispatch(&job, &execution)).await
                {
                    Ok(result) => result,
                    // The timeout drops the in-flight dispatch future; the
                    // failure is recorded exactly like a handler error.
                    Err(_) => Err(SchedulerError::Timeout {
                        job: job.name.clone(),
                        elapsed_secs: limit.as_secs(),
                    }),
                }
            }
            None => self.dispatcher.dispatch(&job, &execution).await,
        };
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.finalize(&job, execution, result, started).await {
            error!(job = %job.name, error = %e, "failed to finalize dispatch");
        }
    }

    /// Drop a misfired occurrence and move straight to the next one.
    async fn skip_misfired(&self, mut job: ScheduledJob, now: DateTime<Utc>) {
        warn!(
            job = %job.name,
            scheduled = ?job.next_run_time,
            "misfired beyond threshold, skipping occurrence"
        );
        self.stats.misfires.fetch_add(1, Ordering::Relaxed);
        self.apply_recurring_reschedule(&mut job, now);
        job.clear_lock();
        job.date_updated = now;
        if let Err(e) = self.store.update_job(&job).await {
            error!(job = %job.name, error = %e, "failed to persist misfire skip");
        }
    }

    /// Put a claimed-but-not-dispatched job back to Pending.
    async fn release_claim(&self, mut job: ScheduledJob) {
        job.status = JobStatus::Pending;
        job.clear_lock();
        job.date_updated = Utc::now();
        if let Err(e) = self.store.update_job(&job).await {
            error!(job = %job.name, error = %e, "failed to release claim");
        }
    }

    /// Finalize the execution row and compute the job's post-dispatch state.
    ///
    /// The job row is re-read first; the latest persisted status wins over
    /// the in-memory copy held across the dispatch. An externally set
    /// Disabled status is preserved verbatim.
    async fn finalize(
        &self,
        claimed: &ScheduledJob,
        mut execution: JobExecution,
        result: Result<()>,
        started: Instant,
    ) -> Result<()> {
        let now = Utc::now();
        let elapsed = started.elapsed();

        match &result {
            Ok(()) => {
                execution.complete(now, elapsed);
                self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                execution.fail(now, elapsed, e.to_string());
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(job = %claimed.name, error = %e, "dispatch failed");
            }
        }
        self.store.update_execution(&execution).await?;

        let mut job = match self.store.get_job_by_name(&claimed.name).await? {
            Some(job) => job,
            None => {
                debug!(job = %claimed.name, "job deleted while in flight");
                return Ok(());
            }
        };
        if job.status == JobStatus::Disabled {
            debug!(job = %job.name, "job disabled while in flight, preserving state");
            return Ok(());
        }

        job.last_run_time = Some(now);
        job.last_run_duration = Some(elapsed);

        match result {
            Ok(()) => {
                job.retry_count = 0;
                if job.schedule_type.is_one_time() {
                    job.status = JobStatus::Completed;
                    job.next_run_time = None;
                } else {
                    self.apply_recurring_reschedule(&mut job, now);
                }
            }
            Err(_) => {
                let configured = job.retry_intervals.len() as u32;
                if configured > 0 && job.retry_count < configured {
                    job.retry_count += 1;
                    let delay = job.retry_intervals[(job.retry_count - 1) as usize];
                    job.status = JobStatus::Pending;
                    job.next_run_time = Some(now + to_chrono(delay));
                    debug!(
                        job = %job.name,
                        retry = job.retry_count,
                        delay = ?delay,
                        "scheduling retry"
                    );
                } else {
                    // Retries exhausted (or none configured): recurring jobs
                    // fall back to the regular cron cadence; one-time jobs
                    // reach Completed with the failure kept on the execution.
                    job.retry_count = 0;
                    if job.schedule_type.is_recurring() {
                        self.apply_recurring_reschedule(&mut job, now);
                    } else {
                        job.status = JobStatus::Completed;
                        job.next_run_time = None;
                    }
                }
            }
        }

        job.clear_lock();
        job.date_updated = now;
        self.store.update_job(&job).await
    }

    /// Point a recurring job at its next cron occurrence after `now`.
    fn apply_recurring_reschedule(&self, job: &mut ScheduledJob, now: DateTime<Utc>) {
        let expression = job.cron_expression.as_deref().unwrap_or("");
        match self
            .evaluator
            .next_occurrence(expression, job.time_zone.as_deref(), now)
        {
            Ok(Some(next)) => {
                job.status = JobStatus::Pending;
                job.next_run_time = Some(next);
            }
            Ok(None) => {
                info!(job = %job.name, "cron schedule has no future occurrence, completing");
                job.status = JobStatus::Completed;
                job.next_run_time = None;
            }
            Err(e) => {
                error!(job = %job.name, error = %e, "cannot compute next occurrence, disabling");
                job.status = JobStatus::Disabled;
                job.is_enabled = false;
                job.next_run_time = None;
            }
        }
    }
}
