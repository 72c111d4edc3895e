//! # Chronos Core
//!
//! Storage-backed distributed job scheduling.
//!
//! Multiple process instances poll a shared schedule store; an atomic claim
//! hands each due job to exactly one instance per round, and a per-job
//! distributed lock guards opt-in jobs against overlap on top of that.
//!
//! ## Architecture
//!
//! - **CronEvaluator**: timezone-aware cron evaluation with a shared parse cache
//! - **SchedulerLoop**: polling engine — claim, misfire policy, lock, dispatch,
//!   retry backoff, reschedule
//! - **StaleRecovery**: sweeps state orphaned by crashed instances
//! - **Reconciler**: merges code-declared job definitions into the store at startup
//! - **JobManager**: administrative facade (enable, disable, trigger, delete,
//!   one-time scheduling)
//! - **SchedulerHealthCheck**: read-only staleness probe
//! - **SchedulerRuntime**: wires the above into one start/stop unit
//!
//! The store and lock backends are contracts ([`store::ScheduleStore`],
//! [`lock::LockProvider`]); in-memory implementations ship for development
//! and tests.

pub mod config;
pub mod cron;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod lock;
pub mod manager;
pub mod model;
pub mod reconcile;
pub mod recovery;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod telemetry;

pub use error::{Result, SchedulerError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::SchedulerConfig;
    pub use crate::cron::CronEvaluator;
    pub use crate::dispatch::{
        DispatchObserver, HandlerError, HandlerRegistry, JobContext, JobDispatcher, JobHandler,
        JobTrigger, NoopObserver,
    };
    pub use crate::error::{Result, SchedulerError};
    pub use crate::health::{HealthReport, HealthStatus, SchedulerHealthCheck};
    pub use crate::lock::{InProcessLockProvider, LockGuard, LockProvider};
    pub use crate::manager::JobManager;
    pub use crate::model::{
        ExecutionId, ExecutionStatus, JobDefinition, JobExecution, JobId, JobStatus,
        MisfireStrategy, ScheduledJob, ScheduleType,
    };
    pub use crate::reconcile::{ReconcileReport, Reconciler};
    pub use crate::recovery::{RecoveryHandle, RecoveryStats, StaleRecovery};
    pub use crate::runtime::{RuntimeHandle, SchedulerRuntime};
    pub use crate::scheduler::{SchedulerHandle, SchedulerLoop, SchedulerStats};
    pub use crate::store::{InMemoryScheduleStore, ScheduleStore};
}
