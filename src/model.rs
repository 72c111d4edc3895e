//! Data model for scheduled jobs and their execution history.
//!
//! Two persisted records make up the whole shared state of the system:
//!
//! - [`ScheduledJob`]: one row per named job, mutated by the scheduler loop
//!   (status, lock, next run) and the administrative facade (enable, disable,
//!   trigger, delete).
//! - [`JobExecution`]: one row per dispatch attempt, created at dispatch time
//!   and finalized when the dispatch completes or times out.
//!
//! [`JobDefinition`] is the in-code declaration the reconciler merges into the
//! store at startup; it never persists as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier of a scheduled job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Unique identifier of a job execution row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    /// Create a new random execution id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ExecutionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Enumerations
// ═══════════════════════════════════════════════════════════════════════════════

/// Whether a job recurs on a cron schedule or fires once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Recurring,
    OneTime,
}

impl ScheduleType {
    pub fn is_recurring(&self) -> bool {
        matches!(self, Self::Recurring)
    }

    pub fn is_one_time(&self) -> bool {
        matches!(self, Self::OneTime)
    }
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recurring => write!(f, "recurring"),
            Self::OneTime => write!(f, "one_time"),
        }
    }
}

/// Runtime status of a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its next due time.
    Pending,
    /// Claimed by an instance and currently dispatching.
    Running,
    /// Administratively or reconciler-disabled; never claimed.
    Disabled,
    /// Terminal state for one-time jobs.
    Completed,
}

impl JobStatus {
    /// Check if the job has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Disabled => write!(f, "disabled"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// What to do with an occurrence that became due but was not picked up within
/// the acceptable lateness window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisfireStrategy {
    /// Run the late occurrence now.
    FireImmediately,
    /// Drop the late occurrence and wait for the next cron occurrence.
    SkipAndScheduleNext,
}

impl Default for MisfireStrategy {
    fn default() -> Self {
        Self::FireImmediately
    }
}

/// Outcome status of a single dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Scheduled Job
// ═══════════════════════════════════════════════════════════════════════════════

/// One row per named job.
///
/// Invariants maintained by the mutating components:
/// - `cron_expression` is `Some` iff `schedule_type` is `Recurring`.
/// - `next_run_time` is `Some` iff `status` is `Pending` or `Running`.
/// - `is_enabled == false` iff `status == Disabled` iff `next_run_time == None`
///   (for non-terminal jobs).
/// - `lock_holder`/`date_locked` are set only while `status == Running`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: JobId,
    /// Unique human-readable name; also the handler registry key.
    pub name: String,
    pub schedule_type: ScheduleType,
    /// Six-field cron expression (seconds first). Required for recurring jobs.
    pub cron_expression: Option<String>,
    /// IANA timezone id the cron expression is evaluated in. `None` means UTC.
    pub time_zone: Option<String>,

    pub status: JobStatus,
    pub next_run_time: Option<DateTime<Utc>>,
    pub last_run_time: Option<DateTime<Utc>>,
    pub last_run_duration: Option<Duration>,

    /// Attempts consumed in the current failure streak.
    pub retry_count: u32,
    /// Ordered backoff delays; empty means no retry.
    pub retry_intervals: Vec<Duration>,
    pub misfire_strategy: MisfireStrategy,

    /// When true and a lock provider is registered, a per-job distributed
    /// lock guards against duplicate execution across instances.
    pub skip_if_running: bool,
    pub lock_holder: Option<String>,
    pub date_locked: Option<DateTime<Utc>>,

    pub is_enabled: bool,
    pub date_created: DateTime<Utc>,
    pub date_updated: DateTime<Utc>,
    /// Per-job override of the default dispatch deadline.
    pub timeout: Option<Duration>,
    /// Opaque payload handed to the handler unmodified.
    pub payload: Option<String>,
    /// Handler identity for one-time jobs created ad hoc.
    pub consumer_type_name: Option<String>,
}

impl ScheduledJob {
    /// Create a recurring job in the Pending state. The caller is expected to
    /// fill `next_run_time` from the cron evaluator before persisting.
    pub fn recurring(name: impl Into<String>, cron_expression: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            name: name.into(),
            schedule_type: ScheduleType::Recurring,
            cron_expression: Some(cron_expression.into()),
            time_zone: None,
            status: JobStatus::Pending,
            next_run_time: None,
            last_run_time: None,
            last_run_duration: None,
            retry_count: 0,
            retry_intervals: Vec::new(),
            misfire_strategy: MisfireStrategy::default(),
            skip_if_running: false,
            lock_holder: None,
            date_locked: None,
            is_enabled: true,
            date_created: now,
            date_updated: now,
            timeout: None,
            payload: None,
            consumer_type_name: None,
        }
    }

    /// Create a one-time job due at `run_at`. One-time jobs always fire
    /// immediately when late; the misfire window does not apply to them.
    pub fn one_time(name: impl Into<String>, run_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            name: name.into(),
            schedule_type: ScheduleType::OneTime,
            cron_expression: None,
            time_zone: None,
            status: JobStatus::Pending,
            next_run_time: Some(run_at),
            last_run_time: None,
            last_run_duration: None,
            retry_count: 0,
            retry_intervals: Vec::new(),
            misfire_strategy: MisfireStrategy::FireImmediately,
            skip_if_running: false,
            lock_holder: None,
            date_locked: None,
            is_enabled: true,
            date_created: now,
            date_updated: now,
            timeout: None,
            payload: None,
            consumer_type_name: None,
        }
    }

    /// Set the timezone the cron expression is evaluated in.
    pub fn with_time_zone(mut self, tz: impl Into<String>) -> Self {
        self.time_zone = Some(tz.into());
        self
    }

    /// Set the retry backoff ladder.
    pub fn with_retry_intervals(mut self, intervals: Vec<Duration>) -> Self {
        self.retry_intervals = intervals;
        self
    }

    /// Set the misfire strategy.
    pub fn with_misfire_strategy(mut self, strategy: MisfireStrategy) -> Self {
        self.misfire_strategy = strategy;
        self
    }

    /// Require the distributed lock before dispatching.
    pub fn with_skip_if_running(mut self, skip: bool) -> Self {
        self.skip_if_running = skip;
        self
    }

    /// Set the per-job dispatch deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach an opaque payload.
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Record the handler type identity.
    pub fn with_consumer_type(mut self, consumer: impl Into<String>) -> Self {
        self.consumer_type_name = Some(consumer.into());
        self
    }

    /// Whether this job would be picked up by a claim at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending
            && self.is_enabled
            && self.next_run_time.is_some_and(|t| t <= now)
    }

    /// Stamp claim ownership and move to Running.
    pub fn claim(&mut self, instance_id: &str, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.lock_holder = Some(instance_id.to_string());
        self.date_locked = Some(now);
        self.date_updated = now;
    }

    /// Clear claim/lock fields. Called whenever the job leaves Running.
    pub fn clear_lock(&mut self) {
        self.lock_holder = None;
        self.date_locked = None;
    }

    /// Soft-disable: the row stays but the job is never claimed again.
    pub fn disable(&mut self) {
        self.status = JobStatus::Disabled;
        self.is_enabled = false;
        self.next_run_time = None;
        self.clear_lock();
        self.date_updated = Utc::now();
    }

    /// Re-enable with a freshly computed next run time.
    pub fn enable(&mut self, next_run_time: Option<DateTime<Utc>>) {
        self.status = JobStatus::Pending;
        self.is_enabled = true;
        self.next_run_time = next_run_time;
        self.date_updated = Utc::now();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Execution
// ═══════════════════════════════════════════════════════════════════════════════

/// One row per dispatch attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: ExecutionId,
    pub job_id: JobId,
    /// The occurrence this attempt serves (the job's `next_run_time` at claim).
    pub scheduled_time: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub date_completed: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub status: ExecutionStatus,
    /// Attempt ordinal at dispatch time (the job's `retry_count`).
    pub retry_attempt: u32,
    /// Failure text. Timeouts are recorded as Failed with a message
    /// containing "timed out", not as a distinct status.
    pub error: Option<String>,
}

impl JobExecution {
    /// Create a Running execution record for a freshly claimed job.
    pub fn start(job: &ScheduledJob, now: DateTime<Utc>) -> Self {
        Self {
            id: ExecutionId::new(),
            job_id: job.id,
            scheduled_time: job.next_run_time.unwrap_or(now),
            started_at: now,
            date_completed: None,
            duration: None,
            status: ExecutionStatus::Running,
            retry_attempt: job.retry_count,
            error: None,
        }
    }

    /// Finalize as succeeded.
    pub fn complete(&mut self, now: DateTime<Utc>, duration: Duration) {
        self.status = ExecutionStatus::Succeeded;
        self.date_completed = Some(now);
        self.duration = Some(duration);
    }

    /// Finalize as failed with the given error text.
    pub fn fail(&mut self, now: DateTime<Utc>, duration: Duration, error: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.date_completed = Some(now);
        self.duration = Some(duration);
        self.error = Some(error.into());
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Definition
// ═══════════════════════════════════════════════════════════════════════════════

/// A code-declared recurring job definition, merged into the store by the
/// reconciler at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Unique job name; also the handler registry key.
    pub name: String,
    /// Handler type identity, recorded on the persisted row.
    pub consumer_type_name: String,
    /// Declared cron expression; a configuration override keyed by the job
    /// name takes precedence when it validates.
    pub cron_expression: String,
    pub time_zone: Option<String>,
    pub retry_intervals: Vec<Duration>,
    pub skip_if_running: bool,
    pub misfire_strategy: MisfireStrategy,
    pub timeout: Option<Duration>,
    pub payload: Option<String>,
}

impl JobDefinition {
    pub fn new(
        name: impl Into<String>,
        consumer_type_name: impl Into<String>,
        cron_expression: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            consumer_type_name: consumer_type_name.into(),
            cron_expression: cron_expression.into(),
            time_zone: None,
            retry_intervals: Vec::new(),
            skip_if_running: false,
            misfire_strategy: MisfireStrategy::default(),
            timeout: None,
            payload: None,
        }
    }

    pub fn with_time_zone(mut self, tz: impl Into<String>) -> Self {
        self.time_zone = Some(tz.into());
        self
    }

    pub fn with_retry_intervals(mut self, intervals: Vec<Duration>) -> Self {
        self.retry_intervals = intervals;
        self
    }

    pub fn with_skip_if_running(mut self, skip: bool) -> Self {
        self.skip_if_running = skip;
        self
    }

    pub fn with_misfire_strategy(mut self, strategy: MisfireStrategy) -> Self {
        self.misfire_strategy = strategy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recurring_builder() {
        let job = ScheduledJob::recurring("report", "0 0 * * * *")
            .with_time_zone("Europe/Berlin")
            .with_retry_intervals(vec![Duration::from_secs(1), Duration::from_secs(5)])
            .with_misfire_strategy(MisfireStrategy::SkipAndScheduleNext)
            .with_skip_if_running(true)
            .with_timeout(Duration::from_secs(60));

        assert!(job.schedule_type.is_recurring());
        assert_eq!(job.cron_expression.as_deref(), Some("0 0 * * * *"));
        assert_eq!(job.time_zone.as_deref(), Some("Europe/Berlin"));
        assert_eq!(job.retry_intervals.len(), 2);
        assert_eq!(job.misfire_strategy, MisfireStrategy::SkipAndScheduleNext);
        assert!(job.skip_if_running);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.is_enabled);
    }

    #[test]
    fn test_one_time_has_no_cron() {
        let run_at = Utc::now() + chrono::Duration::minutes(5);
        let job = ScheduledJob::one_time("adhoc", run_at).with_consumer_type("ReportConsumer");
        assert!(job.schedule_type.is_one_time());
        assert!(job.cron_expression.is_none());
        assert_eq!(job.next_run_time, Some(run_at));
        assert_eq!(job.misfire_strategy, MisfireStrategy::FireImmediately);
        assert_eq!(job.consumer_type_name.as_deref(), Some("ReportConsumer"));
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        let mut job = ScheduledJob::one_time("due", now - chrono::Duration::seconds(1));
        assert!(job.is_due(now));

        job.is_enabled = false;
        assert!(!job.is_due(now));

        job.is_enabled = true;
        job.status = JobStatus::Running;
        assert!(!job.is_due(now));

        job.status = JobStatus::Pending;
        job.next_run_time = Some(now + chrono::Duration::seconds(10));
        assert!(!job.is_due(now));
    }

    #[test]
    fn test_claim_and_clear_lock() {
        let now = Utc::now();
        let mut job = ScheduledJob::one_time("locked", now);
        job.claim("instance-a", now);
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.lock_holder.as_deref(), Some("instance-a"));
        assert_eq!(job.date_locked, Some(now));

        job.clear_lock();
        assert!(job.lock_holder.is_none());
        assert!(job.date_locked.is_none());
    }

    #[test]
    fn test_disable_upholds_invariants() {
        let now = Utc::now();
        let mut job = ScheduledJob::recurring("r", "* * * * * *");
        job.next_run_time = Some(now);
        job.claim("instance-a", now);

        job.disable();
        assert_eq!(job.status, JobStatus::Disabled);
        assert!(!job.is_enabled);
        assert!(job.next_run_time.is_none());
        assert!(job.lock_holder.is_none());
    }

    #[test]
    fn test_execution_lifecycle() {
        let now = Utc::now();
        let mut job = ScheduledJob::recurring("exec", "* * * * * *");
        job.next_run_time = Some(now);
        job.retry_count = 2;

        let mut execution = JobExecution::start(&job, now);
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert_eq!(execution.retry_attempt, 2);
        assert_eq!(execution.scheduled_time, now);

        execution.fail(now, Duration::from_millis(12), "boom");
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some("boom"));
        assert!(execution.status.is_terminal());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(JobStatus::Pending.to_string(), "pending");
        assert_eq!(JobStatus::Disabled.to_string(), "disabled");
        assert_eq!(ExecutionStatus::Succeeded.to_string(), "succeeded");
        assert_eq!(ScheduleType::OneTime.to_string(), "one_time");
    }
}
