//! One-call wiring of the whole control plane.
//!
//! [`SchedulerRuntime`] assembles store, lock provider, handler registry,
//! observer, declared job definitions and configuration, then `start()`
//! reconciles once and spawns the polling loop and the stale recovery
//! sweeper. The returned [`RuntimeHandle`] exposes the administrative facade
//! and the health probe over the same store, and `stop()` shuts both
//! background tasks down gracefully.

use std::sync::Arc;
use tracing::info;

use crate::config::SchedulerConfig;
use crate::cron::CronEvaluator;
use crate::dispatch::{DispatchObserver, HandlerRegistry, JobDispatcher};
use crate::error::Result;
use crate::health::{HealthReport, SchedulerHealthCheck};
use crate::lock::LockProvider;
use crate::manager::JobManager;
use crate::model::JobDefinition;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::recovery::{RecoveryHandle, RecoveryStats, StaleRecovery};
use crate::scheduler::{SchedulerHandle, SchedulerLoop, SchedulerStats};
use crate::store::{InMemoryScheduleStore, ScheduleStore};

/// Builder for a fully wired scheduler.
pub struct SchedulerRuntime {
    config: SchedulerConfig,
    store: Option<Arc<dyn ScheduleStore>>,
    lock_provider: Option<Arc<dyn LockProvider>>,
    registry: Arc<HandlerRegistry>,
    observer: Option<Arc<dyn DispatchObserver>>,
    definitions: Vec<JobDefinition>,
}

impl SchedulerRuntime {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            store: None,
            lock_provider: None,
            registry: Arc::new(HandlerRegistry::new()),
            observer: None,
            definitions: Vec::new(),
        }
    }

    /// Use the given schedule store. Defaults to the in-memory backend.
    pub fn with_store(mut self, store: Arc<dyn ScheduleStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register a distributed lock provider. Without one, `skip_if_running`
    /// jobs dispatch unguarded.
    pub fn with_lock_provider(mut self, provider: Arc<dyn LockProvider>) -> Self {
        self.lock_provider = Some(provider);
        self
    }

    /// Use a pre-populated handler registry.
    pub fn with_registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Attach a dispatch observer.
    pub fn with_observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Declare a recurring job definition for startup reconciliation.
    pub fn with_definition(mut self, definition: JobDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Declare several definitions at once.
    pub fn with_definitions(mut self, definitions: impl IntoIterator<Item = JobDefinition>) -> Self {
        self.definitions.extend(definitions);
        self
    }

    /// Access the handler registry for registration before start.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Reconcile declared definitions, then start the polling loop and the
    /// recovery sweeper.
    pub async fn start(self) -> Result<RuntimeHandle> {
        let config = Arc::new(self.config);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryScheduleStore::new()));
        let evaluator = Arc::new(CronEvaluator::new());

        let reconcile_report = Reconciler::new(
            Arc::clone(&config),
            store.clone(),
            Arc::clone(&evaluator),
            self.definitions,
        )
        .run()
        .await?;

        let mut dispatcher = JobDispatcher::new(Arc::clone(&self.registry));
        if let Some(observer) = self.observer {
            dispatcher = dispatcher.with_observer(observer);
        }

        let scheduler = SchedulerLoop::new(
            Arc::clone(&config),
            store.clone(),
            Arc::clone(&evaluator),
            Arc::new(dispatcher),
            self.lock_provider,
        );
        let scheduler_handle = scheduler.start();

        let recovery_handle = StaleRecovery::new(Arc::clone(&config), store.clone()).start();

        info!(instance = %config.instance_id, "scheduler runtime started");
        Ok(RuntimeHandle {
            manager: JobManager::new(store.clone(), Arc::clone(&evaluator)),
            health: SchedulerHealthCheck::new(Arc::clone(&config), store),
            scheduler: scheduler_handle,
            recovery: recovery_handle,
            reconcile_report,
        })
    }
}

/// Handle over a running scheduler runtime.
pub struct RuntimeHandle {
    manager: JobManager,
    health: SchedulerHealthCheck,
    scheduler: SchedulerHandle,
    recovery: RecoveryHandle,
    reconcile_report: ReconcileReport,
}

impl RuntimeHandle {
    /// Administrative facade over the same store the loop polls.
    pub fn manager(&self) -> &JobManager {
        &self.manager
    }

    /// Run the health probe once.
    pub async fn health(&self) -> HealthReport {
        self.health.check().await
    }

    /// What startup reconciliation did.
    pub fn reconcile_report(&self) -> ReconcileReport {
        self.reconcile_report
    }

    pub fn scheduler_stats(&self) -> &SchedulerStats {
        self.scheduler.stats()
    }

    pub fn recovery_stats(&self) -> &RecoveryStats {
        self.recovery.stats()
    }

    /// Stop both background tasks. In-flight dispatches run to their own
    /// timeout or completion.
    pub async fn stop(self) {
        self.scheduler.stop().await;
        self.recovery.stop().await;
        info!("scheduler runtime stopped");
    }
}
