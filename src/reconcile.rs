//! Startup reconciliation of code-declared job definitions into the store.
//!
//! Code is the source of truth for what recurring jobs exist and how they
//! are declared; the store is the source of truth for runtime state. One
//! pass at startup merges the two:
//!
//! - definitions with no row get a fresh Pending row,
//! - existing rows get their declared fields refreshed; a row that went
//!   dormant (disabled, completed, or left without a queued occurrence) is
//!   put back to Pending and enabled with a fresh occurrence, while run
//!   history and the retry streak carry over and in-flight rows are left
//!   to finalize on their own,
//! - recurring rows whose definition disappeared are disabled, never
//!   deleted, so their history remains queryable.
//!
//! A configuration override can replace a declared cron expression per job
//! name. An override that fails validation is logged and ignored; a declared
//! expression that fails validation is a startup error.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::cron::CronEvaluator;
use crate::error::Result;
use crate::model::{JobDefinition, JobStatus, ScheduledJob, ScheduleType};
use crate::store::ScheduleStore;

/// Outcome summary of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub disabled: usize,
}

/// Merges declared job definitions into the schedule store.
pub struct Reconciler {
    config: Arc<SchedulerConfig>,
    store: Arc<dyn ScheduleStore>,
    evaluator: Arc<CronEvaluator>,
    definitions: Vec<JobDefinition>,
}

impl Reconciler {
    pub fn new(
        config: Arc<SchedulerConfig>,
        store: Arc<dyn ScheduleStore>,
        evaluator: Arc<CronEvaluator>,
        definitions: Vec<JobDefinition>,
    ) -> Self {
        Self {
            config,
            store,
            evaluator,
            definitions,
        }
    }

    /// Run one reconciliation pass.
    ///
    /// With zero definitions the pass is a no-op: an embedding crate that
    /// declares nothing must not have its store touched.
    pub async fn run(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        if self.definitions.is_empty() {
            debug!("no job definitions declared, skipping reconciliation");
            return Ok(report);
        }

        for definition in &self.definitions {
            let expression = self.effective_expression(definition)?;
            match self.store.get_job_by_name(&definition.name).await? {
                Some(existing) => {
                    if self.refresh(existing, definition, &expression).await? {
                        report.updated += 1;
                    }
                }
                None => {
                    self.create(definition, &expression).await?;
                    report.created += 1;
                }
            }
        }

        report.disabled = self.disable_orphans().await?;

        info!(
            created = report.created,
            updated = report.updated,
            disabled = report.disabled,
            "reconciliation complete"
        );
        Ok(report)
    }

    /// Resolve the cron expression for a definition: a valid configured
    /// override wins, the declared expression is the fallback and must be
    /// valid itself.
    fn effective_expression(&self, definition: &JobDefinition) -> Result<String> {
        if let Some(override_expr) = self.config.cron_override(&definition.name) {
            match self
                .evaluator
                .validate(override_expr, definition.time_zone.as_deref())
            {
                Ok(()) => {
                    debug!(
                        job = %definition.name,
                        expression = override_expr,
                        "using configured cron override"
                    );
                    return Ok(override_expr.to_string());
                }
                Err(e) => {
                    warn!(
                        job = %definition.name,
                        expression = override_expr,
                        error = %e,
                        "invalid cron override, falling back to declared expression"
                    );
                }
            }
        }
        self.evaluator
            .validate(&definition.cron_expression, definition.time_zone.as_deref())?;
        Ok(definition.cron_expression.clone())
    }

    async fn create(&self, definition: &JobDefinition, expression: &str) -> Result<()> {
        let now = Utc::now();
        let next = self
            .evaluator
            .next_occurrence(expression, definition.time_zone.as_deref(), now)?;

        let mut job = ScheduledJob::recurring(&definition.name, expression)
            .with_consumer_type(&definition.consumer_type_name)
            .with_retry_intervals(definition.retry_intervals.clone())
            .with_skip_if_running(definition.skip_if_running)
            .with_misfire_strategy(definition.misfire_strategy);
        job.time_zone = definition.time_zone.clone();
        job.timeout = definition.timeout;
        job.payload = definition.payload.clone();
        job.next_run_time = next;

        info!(job = %job.name, next_run = ?job.next_run_time, "registering new job");
        self.store.upsert_job(&job).await
    }

    /// Refresh the declared fields of an existing row and bring a dormant
    /// row back into rotation. Returns whether anything changed.
    async fn refresh(
        &self,
        mut job: ScheduledJob,
        definition: &JobDefinition,
        expression: &str,
    ) -> Result<bool> {
        let schedule_changed = job.cron_expression.as_deref() != Some(expression)
            || job.time_zone != definition.time_zone;
        let declared_changed = schedule_changed
            || job.retry_intervals != definition.retry_intervals
            || job.skip_if_running != definition.skip_if_running
            || job.misfire_strategy != definition.misfire_strategy
            || job.timeout != definition.timeout
            || job.payload != definition.payload
            || job.consumer_type_name.as_deref() != Some(definition.consumer_type_name.as_str());
        // A still-declared row that is disabled, completed, or without a
        // queued occurrence belongs back in rotation. Running rows are
        // skipped; their dispatch finalizes them.
        let reactivate = job.status != JobStatus::Running
            && (job.status != JobStatus::Pending
                || !job.is_enabled
                || job.next_run_time.is_none());

        if !declared_changed && !reactivate {
            return Ok(false);
        }

        job.cron_expression = Some(expression.to_string());
        job.time_zone = definition.time_zone.clone();
        job.retry_intervals = definition.retry_intervals.clone();
        job.skip_if_running = definition.skip_if_running;
        job.misfire_strategy = definition.misfire_strategy;
        job.timeout = definition.timeout;
        job.payload = definition.payload.clone();
        job.consumer_type_name = Some(definition.consumer_type_name.clone());

        if reactivate {
            job.status = JobStatus::Pending;
            job.is_enabled = true;
            job.clear_lock();
        }

        // A changed schedule invalidates the queued occurrence, and a
        // reactivated row has none; recompute in either case. Running rows
        // reschedule themselves when their dispatch finalizes.
        if (schedule_changed || reactivate) && job.status == JobStatus::Pending {
            job.next_run_time = self.evaluator.next_occurrence(
                expression,
                definition.time_zone.as_deref(),
                Utc::now(),
            )?;
        }

        job.date_updated = Utc::now();
        info!(job = %job.name, reactivated = reactivate, "refreshed job from declaration");
        self.store.update_job(&job).await?;
        Ok(true)
    }

    /// Disable recurring rows whose definition no longer exists.
    async fn disable_orphans(&self) -> Result<usize> {
        let mut disabled = 0;
        for mut job in self.store.get_all_jobs().await? {
            if job.schedule_type != ScheduleType::Recurring {
                continue;
            }
            if job.status == JobStatus::Disabled {
                continue;
            }
            if self.definitions.iter().any(|d| d.name == job.name) {
                continue;
            }
            warn!(job = %job.name, "no declaration for job, disabling");
            job.disable();
            self.store.update_job(&job).await?;
            disabled += 1;
        }
        Ok(disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryScheduleStore;
    use std::time::Duration;

    struct Fixture {
        store: Arc<InMemoryScheduleStore>,
        evaluator: Arc<CronEvaluator>,
        config: SchedulerConfig,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(InMemoryScheduleStore::new()),
                evaluator: Arc::new(CronEvaluator::new()),
                config: SchedulerConfig::default(),
            }
        }

        fn reconciler(&self, definitions: Vec<JobDefinition>) -> Reconciler {
            Reconciler::new(
                Arc::new(self.config.clone()),
                self.store.clone(),
                Arc::clone(&self.evaluator),
                definitions,
            )
        }
    }

    fn nightly() -> JobDefinition {
        JobDefinition::new("nightly-report", "ReportConsumer", "0 0 2 * * *")
            .with_retry_intervals(vec![Duration::from_secs(60)])
    }

    #[tokio::test]
    async fn test_creates_missing_jobs() {
        let fx = Fixture::new();
        let report = fx.reconciler(vec![nightly()]).run().await.unwrap();
        assert_eq!(report, ReconcileReport { created: 1, updated: 0, disabled: 0 });

        let job = fx.store.get_job_by_name("nightly-report").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.cron_expression.as_deref(), Some("0 0 2 * * *"));
        assert_eq!(job.consumer_type_name.as_deref(), Some("ReportConsumer"));
        assert!(job.next_run_time.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_second_pass_is_a_noop() {
        let fx = Fixture::new();
        fx.reconciler(vec![nightly()]).run().await.unwrap();
        let report = fx.reconciler(vec![nightly()]).run().await.unwrap();
        assert_eq!(report, ReconcileReport::default());
    }

    #[tokio::test]
    async fn test_refresh_preserves_runtime_state() {
        let fx = Fixture::new();
        fx.reconciler(vec![nightly()]).run().await.unwrap();

        // Simulate accumulated runtime state.
        let mut job = fx.store.get_job_by_name("nightly-report").await.unwrap().unwrap();
        job.retry_count = 2;
        job.last_run_time = Some(Utc::now());
        fx.store.update_job(&job).await.unwrap();

        // Declaration changes its backoff ladder.
        let redeclared = nightly().with_retry_intervals(vec![Duration::from_secs(5)]);
        let report = fx.reconciler(vec![redeclared]).run().await.unwrap();
        assert_eq!(report.updated, 1);

        let job = fx.store.get_job_by_name("nightly-report").await.unwrap().unwrap();
        assert_eq!(job.retry_intervals, vec![Duration::from_secs(5)]);
        assert_eq!(job.retry_count, 2);
        assert!(job.last_run_time.is_some());
    }

    #[tokio::test]
    async fn test_disabled_but_still_declared_job_is_reactivated() {
        let fx = Fixture::new();
        fx.reconciler(vec![nightly()]).run().await.unwrap();

        let mut job = fx.store.get_job_by_name("nightly-report").await.unwrap().unwrap();
        job.disable();
        fx.store.update_job(&job).await.unwrap();

        // The declaration has not gone away, so the row comes back.
        let report = fx.reconciler(vec![nightly()]).run().await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.disabled, 0);

        let job = fx.store.get_job_by_name("nightly-report").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.is_enabled);
        assert!(job.next_run_time.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_running_job_is_not_reactivated() {
        let fx = Fixture::new();
        fx.reconciler(vec![nightly()]).run().await.unwrap();

        let mut job = fx.store.get_job_by_name("nightly-report").await.unwrap().unwrap();
        job.claim("instance-a", Utc::now());
        fx.store.update_job(&job).await.unwrap();

        fx.reconciler(vec![nightly()]).run().await.unwrap();
        let job = fx.store.get_job_by_name("nightly-report").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.lock_holder.as_deref(), Some("instance-a"));
    }

    #[tokio::test]
    async fn test_schedule_change_recomputes_next_run() {
        let fx = Fixture::new();
        fx.reconciler(vec![nightly()]).run().await.unwrap();
        let before = fx
            .store
            .get_job_by_name("nightly-report")
            .await
            .unwrap()
            .unwrap()
            .next_run_time;

        let mut redeclared = nightly();
        redeclared.cron_expression = "0 30 4 * * *".to_string();
        fx.reconciler(vec![redeclared]).run().await.unwrap();

        let job = fx.store.get_job_by_name("nightly-report").await.unwrap().unwrap();
        assert_eq!(job.cron_expression.as_deref(), Some("0 30 4 * * *"));
        assert_ne!(job.next_run_time, before);
    }

    #[tokio::test]
    async fn test_valid_override_wins() {
        let mut fx = Fixture::new();
        fx.config
            .cron_overrides
            .insert("nightly-report".into(), "0 0 3 * * *".into());

        fx.reconciler(vec![nightly()]).run().await.unwrap();
        let job = fx.store.get_job_by_name("nightly-report").await.unwrap().unwrap();
        assert_eq!(job.cron_expression.as_deref(), Some("0 0 3 * * *"));
    }

    #[tokio::test]
    async fn test_invalid_override_falls_back_to_declared() {
        let mut fx = Fixture::new();
        fx.config
            .cron_overrides
            .insert("nightly-report".into(), "not a cron".into());

        fx.reconciler(vec![nightly()]).run().await.unwrap();
        let job = fx.store.get_job_by_name("nightly-report").await.unwrap().unwrap();
        assert_eq!(job.cron_expression.as_deref(), Some("0 0 2 * * *"));
    }

    #[tokio::test]
    async fn test_invalid_declared_expression_is_an_error() {
        let fx = Fixture::new();
        let bad = JobDefinition::new("broken", "Consumer", "every day at noon");
        assert!(fx.reconciler(vec![bad]).run().await.is_err());
    }

    #[tokio::test]
    async fn test_orphaned_recurring_job_is_disabled() {
        let fx = Fixture::new();
        fx.reconciler(vec![nightly()]).run().await.unwrap();

        // The nightly report is gone from the declarations; only a new job
        // remains declared.
        let survivor = JobDefinition::new("heartbeat", "HeartbeatConsumer", "* * * * * *");
        let report = fx.reconciler(vec![survivor]).run().await.unwrap();
        assert_eq!(report.disabled, 1);
        assert_eq!(report.created, 1);

        let job = fx.store.get_job_by_name("nightly-report").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Disabled);
        assert!(!job.is_enabled);
        assert!(job.next_run_time.is_none());
    }

    #[tokio::test]
    async fn test_one_time_jobs_are_never_orphaned() {
        let fx = Fixture::new();
        let adhoc = ScheduledJob::one_time("adhoc", Utc::now() + chrono::Duration::minutes(5));
        fx.store.upsert_job(&adhoc).await.unwrap();

        let report = fx.reconciler(vec![nightly()]).run().await.unwrap();
        assert_eq!(report.disabled, 0);

        let job = fx.store.get_job_by_name("adhoc").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_zero_definitions_touch_nothing() {
        let fx = Fixture::new();
        fx.reconciler(vec![nightly()]).run().await.unwrap();

        let report = fx.reconciler(Vec::new()).run().await.unwrap();
        assert_eq!(report, ReconcileReport::default());

        // The existing job survives untouched, not orphan-disabled.
        let job = fx.store.get_job_by_name("nightly-report").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }
}
