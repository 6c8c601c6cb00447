//! Cron schedule evaluation and slot planning.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};

use crate::error::SchedulerError;

/// A parsed cron expression.
///
/// Accepts the classic 5-field form (`*/5 * * * *`) as well as the
/// seconds-first form the `cron` crate parses natively.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    inner: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, SchedulerError> {
        let trimmed = expression.trim();
        let normalized = if trimmed.split_whitespace().count() == 5 {
            format!("0 {trimmed}")
        } else {
            trimmed.to_string()
        };
        let inner =
            cron::Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidSchedule {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            expression: trimmed.to_string(),
            inner,
        })
    }

    /// The expression as configured.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.inner.after(after).next()
    }
}

/// Decides which slot runs next.
///
/// With catch-up off, slots missed while the service was down or busy are
/// skipped and the next slot is always in the future. With catch-up on, every
/// slot since `start_date` (or since the last run) is replayed in order.
#[derive(Debug, Clone)]
pub struct SlotPlanner {
    schedule: CronSchedule,
    start_date: DateTime<Utc>,
    catchup: bool,
    last_slot: Option<DateTime<Utc>>,
}

impl SlotPlanner {
    pub fn new(schedule: CronSchedule, start_date: DateTime<Utc>, catchup: bool) -> Self {
        Self {
            schedule,
            start_date,
            catchup,
            last_slot: None,
        }
    }

    pub fn schedule(&self) -> &CronSchedule {
        &self.schedule
    }

    pub fn last_slot(&self) -> Option<DateTime<Utc>> {
        self.last_slot
    }

    /// The next slot to run, given the current time.
    ///
    /// May be in the past only when catch-up is on.
    pub fn next_slot(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        // Slots are strictly after `from`; step back one second so a slot
        // exactly at `start_date` is eligible.
        let floor = self.start_date - Duration::seconds(1);
        let mut from = match self.last_slot {
            Some(last) => last.max(floor),
            None => floor,
        };
        if !self.catchup {
            from = from.max(now);
        }
        self.schedule.next_after(&from)
    }

    /// Record that `slot` has been run.
    pub fn mark_run(&mut self, slot: DateTime<Utc>) {
        self.last_slot = Some(match self.last_slot {
            Some(last) => last.max(slot),
            None => slot,
        });
    }
}
