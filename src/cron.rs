//! Cron expression evaluation with a shared parse cache.
//!
//! Expressions use the six-field syntax with seconds
//! (`sec min hour day month weekday`). Parsed schedules are cached keyed by
//! the expression with internal whitespace collapsed, so `"0 0 * * * *"` and
//! `"0  0 * *  * *"` share a single cache entry. The cache tolerates
//! unbounded concurrent readers and writers.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use dashmap::DashMap;
use std::str::FromStr;

use crate::error::{Result, SchedulerError};

/// Parses, caches, and evaluates cron expressions against named timezones.
///
/// All results are normalized back to UTC regardless of the evaluation zone.
#[derive(Debug, Default)]
pub struct CronEvaluator {
    cache: DashMap<String, Schedule>,
}

impl CronEvaluator {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    /// Compute the next occurrence of `expression` strictly after `after`,
    /// evaluated in `time_zone` (UTC when `None`, empty, or whitespace).
    ///
    /// Returns `Ok(None)` for expressions with no future occurrence.
    pub fn next_occurrence(
        &self,
        expression: &str,
        time_zone: Option<&str>,
        after: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let schedule = self.schedule_for(expression)?;
        let tz = resolve_time_zone(time_zone)?;
        let next = schedule
            .after(&after.with_timezone(&tz))
            .next()
            .map(|occurrence| occurrence.with_timezone(&Utc));
        Ok(next)
    }

    /// Validate an expression/timezone pair without computing an occurrence.
    pub fn validate(&self, expression: &str, time_zone: Option<&str>) -> Result<()> {
        self.schedule_for(expression)?;
        resolve_time_zone(time_zone)?;
        Ok(())
    }

    /// Number of distinct expressions currently cached.
    pub fn cached_expressions(&self) -> usize {
        self.cache.len()
    }

    /// Fetch the parsed schedule, parsing and caching on first sight.
    fn schedule_for(&self, expression: &str) -> Result<Schedule> {
        let key = normalize(expression);
        if key.is_empty() {
            return Err(SchedulerError::EmptyExpression);
        }
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.clone());
        }
        let schedule = Schedule::from_str(&key).map_err(|e| SchedulerError::CronFormat {
            expression: key.clone(),
            message: e.to_string(),
        })?;
        // entry() makes the insert race-free: concurrent first lookups agree
        // on a single cached value.
        let entry = self.cache.entry(key).or_insert(schedule);
        Ok(entry.clone())
    }
}

/// Collapse internal whitespace to single spaces and trim the ends.
fn normalize(expression: &str) -> String {
    expression.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolve an IANA timezone id; null/empty/whitespace means UTC.
fn resolve_time_zone(time_zone: Option<&str>) -> Result<Tz> {
    match time_zone.map(str::trim) {
        None | Some("") => Ok(Tz::UTC),
        Some(id) => id
            .parse::<Tz>()
            .map_err(|_| SchedulerError::TimezoneNotFound(id.to_string())),
    }
}
