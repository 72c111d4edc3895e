//! Handler registry, invocation context, and the job dispatcher.
//!
//! Exactly one handler is registered per job name; resolution happens fresh
//! on every dispatch so handlers can be swapped at runtime. A missing handler
//! is a fatal configuration error, not a runtime failure to retry.
//!
//! Dispatch lifecycle per call: `before` event, `on_start` hook, `execute`,
//! `on_stop` hook (guaranteed to run even when the handler fails), then the
//! `after` or `error` event with elapsed time. Diagnostic events go to an
//! injectable [`DispatchObserver`]; the default observer does nothing, and
//! the absence of a subscriber never affects behavior.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{Result, SchedulerError};
use crate::model::{ExecutionId, JobExecution, JobId, ScheduledJob};

// ═══════════════════════════════════════════════════════════════════════════════
// Invocation Context
// ═══════════════════════════════════════════════════════════════════════════════

/// The trigger payload describing why a handler is being invoked.
#[derive(Debug, Clone)]
pub struct JobTrigger {
    pub job_name: String,
    pub scheduled_time: DateTime<Utc>,
    /// 1-based attempt number (`retry_attempt + 1`).
    pub attempt: u32,
    pub cron_expression: Option<String>,
    pub payload: Option<String>,
    pub parent_job_id: Option<JobId>,
}

/// Context handed to the handler for one invocation.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Message identity: the execution id.
    pub message_id: ExecutionId,
    /// Topic: the job name.
    pub topic: String,
    /// The occurrence this invocation serves.
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<String>,
    pub trigger: JobTrigger,
}

impl JobContext {
    fn build(job: &ScheduledJob, execution: &JobExecution) -> Self {
        Self {
            message_id: execution.id,
            topic: job.name.clone(),
            timestamp: execution.scheduled_time,
            correlation_id: None,
            trigger: JobTrigger {
                job_name: job.name.clone(),
                scheduled_time: execution.scheduled_time,
                attempt: execution.retry_attempt + 1,
                cron_expression: job.cron_expression.clone(),
                payload: job.payload.clone(),
                parent_job_id: None,
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handler Contract
// ═══════════════════════════════════════════════════════════════════════════════

/// Error returned by a job handler.
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<anyhow::Error> for HandlerError {
    fn from(error: anyhow::Error) -> Self {
        Self::new(error.to_string())
    }
}

/// A keyed handler resolvable by job name.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run the job's business payload.
    async fn execute(&self, ctx: &JobContext) -> std::result::Result<(), HandlerError>;

    /// Optional start hook, called before `execute`.
    async fn on_start(&self, _ctx: &JobContext) -> std::result::Result<(), HandlerError> {
        Ok(())
    }

    /// Optional stop hook. Runs after `execute` even when it failed.
    async fn on_stop(&self, _ctx: &JobContext) {}
}

/// Name → handler registry. One handler per job name; registering again
/// under the same name replaces the previous handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(name).map(|entry| Arc::clone(&entry))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Diagnostic Observer
// ═══════════════════════════════════════════════════════════════════════════════

/// Observer for dispatch lifecycle events. All methods default to no-ops so
/// implementors subscribe only to what they need.
pub trait DispatchObserver: Send + Sync {
    fn before(&self, _job: &str, _execution_id: ExecutionId, _attempt: u32) {}

    fn after(&self, _job: &str, _execution_id: ExecutionId, _attempt: u32, _elapsed: Duration) {}

    fn error(
        &self,
        _job: &str,
        _execution_id: ExecutionId,
        _attempt: u32,
        _elapsed: Duration,
        _error: &HandlerError,
    ) {
    }
}

/// The default observer: does nothing.
pub struct NoopObserver;

impl DispatchObserver for NoopObserver {}

// ═══════════════════════════════════════════════════════════════════════════════
// Dispatcher
// ═══════════════════════════════════════════════════════════════════════════════

/// Resolves and invokes the one handler registered for a job name.
pub struct JobDispatcher {
    registry: Arc<HandlerRegistry>,
    observer: Arc<dyn DispatchObserver>,
}

impl JobDispatcher {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Invoke the handler for `job`, driving the lifecycle hooks and
    /// diagnostic events. Handler failures come back as
    /// [`SchedulerError::Handler`].
    pub async fn dispatch(&self, job: &ScheduledJob, execution: &JobExecution) -> Result<()> {
        let handler = self
            .registry
            .resolve(&job.name)
            .ok_or_else(|| SchedulerError::HandlerNotRegistered(job.name.clone()))?;

        let ctx = JobContext::build(job, execution);
        let attempt = ctx.trigger.attempt;

        self.observer.before(&job.name, execution.id, attempt);
        debug!(job = %job.name, execution_id = %execution.id, attempt, "dispatching");

        let started = Instant::now();
        let result = match handler.on_start(&ctx).await {
            Ok(()) => handler.execute(&ctx).await,
            Err(e) => Err(e),
        };
        // Stop hook runs regardless of the outcome.
        handler.on_stop(&ctx).await;
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {
                self.observer.after(&job.name, execution.id, attempt, elapsed);
                Ok(())
            }
            Err(error) => {
                self.observer
                    .error(&job.name, execution.id, attempt, elapsed, &error);
                Err(SchedulerError::Handler {
                    job: job.name.clone(),
                    message: error.message,
                })
            }
        }
    }
}
