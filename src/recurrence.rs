//! Expansion of recurrence rules into concrete occurrences.
//!
//! Occurrence `k` is computed from the anchor (`start + k * interval` units),
//! so month-end anchors clamp per month (Jan 31 -> Feb 29 -> Mar 31).

use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use thiserror::Error;

use crate::models::{Frequency, RecurrenceRule};

/// Expansion horizon when a rule has no end date
pub const DEFAULT_HORIZON_MONTHS: u32 = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecurrenceError {
    #[error("Recurrence interval must be at least 1 (got {0})")]
    InvalidInterval(u32),
    #[error("Recurrence ends on {end} which is before the first occurrence on {start}")]
    EndsBeforeStart { start: NaiveDate, end: NaiveDate },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

pub fn validate(rule: &RecurrenceRule) -> Result<(), RecurrenceError> {
    if rule.interval == 0 {
        return Err(RecurrenceError::InvalidInterval(rule.interval));
    }
    Ok(())
}

/// Last calendar date (inclusive) on which an occurrence may start
pub fn horizon(start: DateTime<Utc>, rule: &RecurrenceRule) -> NaiveDate {
    match rule.end_date {
        Some(end) => end.date_naive(),
        None => start
            .checked_add_months(Months::new(DEFAULT_HORIZON_MONTHS))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
            .date_naive(),
    }
}

/// Expand `rule` anchored at `[start, end)` into every occurrence whose start
/// date falls on or before the rule's horizon. Each occurrence keeps the
/// template duration.
pub fn expand(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    rule: &RecurrenceRule,
) -> Result<Vec<Occurrence>, RecurrenceError> {
    validate(rule)?;

    let limit = horizon(start, rule);
    if limit < start.date_naive() {
        return Err(RecurrenceError::EndsBeforeStart {
            start: start.date_naive(),
            end: limit,
        });
    }

    let duration = end - start;
    let mut occurrences = Vec::new();
    let mut k: u32 = 0;

    loop {
        let Some(offset) = k.checked_mul(rule.interval) else { break };
        let Some(next) = advance(start, rule.frequency, offset) else { break };
        if next.date_naive() > limit {
            break;
        }
        let Some(next_end) = next.checked_add_signed(duration) else { break };
        occurrences.push(Occurrence { start: next, end: next_end });
        k += 1;
    }

    tracing::debug!(
        frequency = ?rule.frequency,
        interval = rule.interval,
        count = occurrences.len(),
        "expanded recurrence"
    );
    Ok(occurrences)
}

fn advance(start: DateTime<Utc>, frequency: Frequency, steps: u32) -> Option<DateTime<Utc>> {
    match frequency {
        Frequency::Daily => start.checked_add_signed(Duration::try_days(i64::from(steps))?),
        Frequency::Weekly => start.checked_add_signed(Duration::try_weeks(i64::from(steps))?),
        Frequency::Monthly => start.checked_add_months(Months::new(steps)),
        Frequency::Yearly => start.checked_add_months(Months::new(steps.checked_mul(12)?)),
    }
}
