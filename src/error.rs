//! Error taxonomy for the scheduling control plane.
//!
//! Failures fall into a small number of classes, and each class has one owner:
//!
//! - Validation and not-found errors are surfaced synchronously to the
//!   administrative caller and never retried.
//! - Cron and timezone parse errors propagate from [`crate::cron::CronEvaluator`]
//!   to its direct callers; the reconciler absorbs them with a fallback while
//!   resolving configuration overrides.
//! - Handler failures and timeouts are caught by the scheduler loop, recorded
//!   on the `JobExecution`, and drive the retry/misfire transition.
//! - A lock that could not be acquired is not an error at all; providers
//!   report it as `Ok(None)`.

use thiserror::Error;

/// A specialized Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors produced by the scheduling control plane.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A null, empty, or whitespace-only cron expression.
    #[error("cron expression is empty")]
    EmptyExpression,

    /// The cron expression could not be parsed.
    #[error("invalid cron expression '{expression}': {message}")]
    CronFormat { expression: String, message: String },

    /// The timezone id could not be resolved to a known IANA zone.
    #[error("unknown timezone '{0}'")]
    TimezoneNotFound(String),

    /// An administrative request carried invalid input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No job row exists under the given name.
    #[error("job '{0}' not found")]
    JobNotFound(String),

    /// No handler is registered under the job's name. This is a fatal
    /// configuration error, not a runtime failure to retry.
    #[error("no handler registered for job '{0}'")]
    HandlerNotRegistered(String),

    /// The handler for a job returned an error.
    #[error("handler for job '{job}' failed: {message}")]
    Handler { job: String, message: String },

    /// The dispatch exceeded its deadline. The message always contains
    /// "timed out" so that persisted execution errors are greppable.
    #[error("job '{job}' timed out after {elapsed_secs}s")]
    Timeout { job: String, elapsed_secs: u64 },

    /// The schedule store failed.
    #[error("store operation failed: {0}")]
    Store(String),

    /// The distributed lock provider failed (transport or protocol error,
    /// not "lock held elsewhere").
    #[error("lock provider failed: {0}")]
    Lock(String),
}

impl SchedulerError {
    /// Build a store error from any displayable source.
    pub fn store(source: impl std::fmt::Display) -> Self {
        Self::Store(source.to_string())
    }

    /// Build a lock provider error from any displayable source.
    pub fn lock(source: impl std::fmt::Display) -> Self {
        Self::Lock(source.to_string())
    }

    /// Build a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True for errors the administrative caller caused and must fix.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// True when the target job row does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::JobNotFound(_))
    }

    /// True for cron or timezone resolution failures.
    pub fn is_schedule_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyExpression | Self::CronFormat { .. } | Self::TimezoneNotFound(_)
        )
    }

    /// True when a dispatch exceeded its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
