//! End-to-end tests for the wired scheduler runtime.
//!
//! Tests cover:
//! - Startup reconciliation of declared definitions
//! - Claim-to-dispatch flow through the live polling loop
//! - Administrative trigger and disable taking effect on the next poll
//! - One-time scheduling through the facade
//! - Health probe over the live store
//! - Graceful shutdown

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use chronos_core::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct CountingHandler {
    calls: AtomicU32,
}

impl CountingHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobHandler for CountingHandler {
    async fn execute(&self, _ctx: &JobContext) -> std::result::Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn fast_config() -> SchedulerConfig {
    let mut config = SchedulerConfig::default();
    config.instance_id = "it-instance".into();
    config.polling_interval = Duration::from_millis(25);
    config
}

async fn wait_until<F, Fut>(mut predicate: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if predicate().await {
            return;
        }
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reconcile_then_dispatch_declared_job() {
    let store: Arc<InMemoryScheduleStore> = Arc::new(InMemoryScheduleStore::new());
    let registry = Arc::new(HandlerRegistry::new());
    let handler = CountingHandler::new();
    registry.register("heartbeat", handler.clone());

    let handle = SchedulerRuntime::new(fast_config())
        .with_store(store.clone())
        .with_registry(registry)
        .with_definition(JobDefinition::new(
            "heartbeat",
            "HeartbeatConsumer",
            // Every second, so the loop picks it up almost immediately.
            "* * * * * *",
        ))
        .start()
        .await
        .unwrap();

    assert_eq!(handle.reconcile_report().created, 1);

    let h = handler.clone();
    wait_until(|| {
        let h = h.clone();
        async move { h.calls() >= 1 }
    })
    .await;

    let job = store.get_job_by_name("heartbeat").await.unwrap().unwrap();
    assert!(job.last_run_time.is_some());
    assert!(handle.scheduler_stats().succeeded() >= 1);

    handle.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_trigger_runs_job_ahead_of_schedule() {
    let store: Arc<InMemoryScheduleStore> = Arc::new(InMemoryScheduleStore::new());
    let registry = Arc::new(HandlerRegistry::new());
    let handler = CountingHandler::new();
    registry.register("nightly", handler.clone());

    let handle = SchedulerRuntime::new(fast_config())
        .with_store(store.clone())
        .with_registry(registry)
        // Yearly: never due on its own during the test.
        .with_definition(JobDefinition::new("nightly", "NightlyConsumer", "0 0 0 1 1 *"))
        .start()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(handler.calls(), 0);

    handle.manager().trigger("nightly").await.unwrap();

    let h = handler.clone();
    wait_until(|| {
        let h = h.clone();
        async move { h.calls() == 1 }
    })
    .await;

    // After the forced run the job is back on its cron cadence.
    let job = store.get_job_by_name("nightly").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.next_run_time.unwrap() > Utc::now() + ChronoDuration::days(1));

    handle.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_disabled_job_is_never_claimed() {
    let store: Arc<InMemoryScheduleStore> = Arc::new(InMemoryScheduleStore::new());
    let registry = Arc::new(HandlerRegistry::new());
    let handler = CountingHandler::new();
    registry.register("muted", handler.clone());

    let handle = SchedulerRuntime::new(fast_config())
        .with_store(store.clone())
        .with_registry(registry)
        .with_definition(JobDefinition::new("muted", "MutedConsumer", "* * * * * *"))
        .start()
        .await
        .unwrap();

    handle.manager().disable("muted").await.unwrap();
    let calls_at_disable = handler.calls();

    tokio::time::sleep(Duration::from_millis(150)).await;
    // At most one dispatch could have raced the disable; none after it.
    assert!(handler.calls() <= calls_at_disable + 1);

    let job = store.get_job_by_name("muted").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Disabled);
    assert!(job.next_run_time.is_none());

    handle.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_schedule_once_through_facade() {
    let store: Arc<InMemoryScheduleStore> = Arc::new(InMemoryScheduleStore::new());
    let registry = Arc::new(HandlerRegistry::new());
    let handler = CountingHandler::new();
    registry.register("export", handler.clone());

    let handle = SchedulerRuntime::new(fast_config())
        .with_store(store.clone())
        .with_registry(registry)
        .start()
        .await
        .unwrap();

    handle
        .manager()
        .schedule_once(
            "export",
            Utc::now() + ChronoDuration::milliseconds(50),
            "ExportConsumer",
            Some("payload".into()),
        )
        .await
        .unwrap();

    let h = handler.clone();
    wait_until(|| {
        let h = h.clone();
        async move { h.calls() == 1 }
    })
    .await;

    let store2 = store.clone();
    wait_until(|| {
        let store = store2.clone();
        async move {
            store
                .get_job_by_name("export")
                .await
                .unwrap()
                .is_some_and(|j| j.status == JobStatus::Completed)
        }
    })
    .await;

    let job = store.get_job_by_name("export").await.unwrap().unwrap();
    assert!(job.next_run_time.is_none());

    handle.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failing_handler_walks_retry_ladder() {
    struct AlwaysFails;

    #[async_trait]
    impl JobHandler for AlwaysFails {
        async fn execute(&self, _ctx: &JobContext) -> std::result::Result<(), HandlerError> {
            Err(HandlerError::new("boom"))
        }
    }

    let store: Arc<InMemoryScheduleStore> = Arc::new(InMemoryScheduleStore::new());
    let registry = Arc::new(HandlerRegistry::new());
    registry.register("flaky", Arc::new(AlwaysFails));

    let handle = SchedulerRuntime::new(fast_config())
        .with_store(store.clone())
        .with_registry(registry)
        .with_definition(
            JobDefinition::new("flaky", "FlakyConsumer", "* * * * * *")
                .with_retry_intervals(vec![Duration::from_millis(30)]),
        )
        .start()
        .await
        .unwrap();

    // First failure puts the job on its retry delay.
    let store2 = store.clone();
    wait_until(|| {
        let store = store2.clone();
        async move {
            store
                .get_job_by_name("flaky")
                .await
                .unwrap()
                .is_some_and(|j| j.retry_count == 1)
        }
    })
    .await;

    // The retry fires, fails, and the streak resets onto the cron cadence.
    let store2 = store.clone();
    wait_until(|| {
        let store = store2.clone();
        async move {
            let job = store.get_job_by_name("flaky").await.unwrap().unwrap();
            job.retry_count == 0 && store.executions_for(job.id).await.len() >= 2
        }
    })
    .await;

    let job = store.get_job_by_name("flaky").await.unwrap().unwrap();
    let executions = store.executions_for(job.id).await;
    assert!(executions
        .iter()
        .take(2)
        .all(|e| e.status == ExecutionStatus::Failed));
    assert_eq!(executions[1].retry_attempt, 1);

    handle.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_health_probe_over_live_store() {
    let store: Arc<InMemoryScheduleStore> = Arc::new(InMemoryScheduleStore::new());
    let handle = SchedulerRuntime::new(fast_config())
        .with_store(store.clone())
        .start()
        .await
        .unwrap();

    assert!(handle.health().await.is_healthy());

    // Plant a job stuck in Running well past the staleness threshold.
    let mut stuck = ScheduledJob::recurring("stuck", "* * * * * *");
    stuck.next_run_time = Some(Utc::now());
    stuck.claim("dead-instance", Utc::now() - ChronoDuration::hours(1));
    store.upsert_job(&stuck).await.unwrap();

    let report = handle.health().await;
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.metadata["stale_jobs"], serde_json::json!(1));

    handle.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_graceful_stop() {
    let handle = SchedulerRuntime::new(fast_config()).start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    handle.stop().await;
}
