//! Background recovery of state orphaned by crashed instances.
//!
//! An instance that dies between claiming a job and finalizing it leaves the
//! job stuck in Running and its execution row open. The recovery task sweeps
//! on a fixed cadence: stuck jobs go back to Pending with their claim fields
//! cleared, open execution rows past the staleness bound are closed as
//! Failed, and finished executions older than the retention window are
//! purged. Every sweep is idempotent, so overlapping sweeps from multiple
//! instances are harmless.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::SchedulerConfig;
use crate::store::ScheduleStore;

/// Counters for the recovery sweeps.
#[derive(Debug, Clone, Default)]
pub struct RecoveryStats {
    jobs_released: Arc<AtomicU64>,
    executions_timed_out: Arc<AtomicU64>,
    executions_purged: Arc<AtomicU64>,
}

impl RecoveryStats {
    pub fn jobs_released(&self) -> u64 {
        self.jobs_released.load(Ordering::Relaxed)
    }

    pub fn executions_timed_out(&self) -> u64 {
        self.executions_timed_out.load(Ordering::Relaxed)
    }

    pub fn executions_purged(&self) -> u64 {
        self.executions_purged.load(Ordering::Relaxed)
    }
}

/// Handle for controlling a running recovery task.
pub struct RecoveryHandle {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
    stats: RecoveryStats,
}

impl RecoveryHandle {
    /// Signal shutdown and wait for the current sweep to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }

    pub fn stats(&self) -> &RecoveryStats {
        &self.stats
    }
}

/// Periodic sweeper for stuck jobs and open execution rows.
#[derive(Clone)]
pub struct StaleRecovery {
    config: Arc<SchedulerConfig>,
    store: Arc<dyn ScheduleStore>,
    stats: RecoveryStats,
}

impl StaleRecovery {
    pub fn new(config: Arc<SchedulerConfig>, store: Arc<dyn ScheduleStore>) -> Self {
        Self {
            config,
            store,
            stats: RecoveryStats::default(),
        }
    }

    pub fn stats(&self) -> &RecoveryStats {
        &self.stats
    }

    /// Start the periodic sweep task.
    pub fn start(self) -> RecoveryHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();

        let task = tokio::spawn(async move {
            info!(
                interval = ?self.config.stale_job_check_interval,
                threshold = ?self.config.stale_job_threshold,
                "stale recovery started"
            );
            let mut interval = tokio::time::interval(self.config.stale_job_check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a fresh start does
            // not race the reconciler.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.sweep().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("stale recovery shutting down");
                            break;
                        }
                    }
                }
            }
        });

        RecoveryHandle {
            shutdown: shutdown_tx,
            task,
            stats,
        }
    }

    /// One full sweep: release stuck jobs, close open executions, purge old
    /// history. Each sub-step's failure is logged and the remaining steps
    /// still run, so a broken release query cannot stop history purging.
    pub async fn sweep(&self) {
        match self
            .store
            .release_stale_jobs(self.config.stale_job_threshold)
            .await
        {
            Ok(released) if released > 0 => {
                self.stats.jobs_released.fetch_add(released, Ordering::Relaxed);
                info!(count = released, "released stale job claims");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "failed to release stale job claims"),
        }

        match self
            .store
            .timeout_stale_executions(self.config.stale_job_threshold)
            .await
        {
            Ok(timed_out) if timed_out > 0 => {
                self.stats
                    .executions_timed_out
                    .fetch_add(timed_out, Ordering::Relaxed);
                info!(count = timed_out, "closed stale execution rows");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "failed to close stale execution rows"),
        }

        match self
            .store
            .purge_executions(self.config.execution_retention)
            .await
        {
            Ok(purged) if purged > 0 => {
                self.stats
                    .executions_purged
                    .fetch_add(purged, Ordering::Relaxed);
                debug!(count = purged, "purged old execution history");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "failed to purge execution history"),
        }
    }
}
