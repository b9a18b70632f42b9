//! Urgency calculator.
//!
//! Both the notification engine and the list colouring read this value, so
//! what the user sees and what triggers a push never disagree.

use chrono::{DateTime, Utc};

use crate::activity::FrequencyUnit;
use crate::period::period_hours;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Fractional hours from `since` to `now`; negative when `since` is in the future.
pub fn hours_between(since: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - since).num_milliseconds() as f64 / MILLIS_PER_HOUR
}

/// Share of the period that has elapsed since the last execution, clamped to 0..=100.
///
/// Never executed counts as fully elapsed.
pub fn urgency_percent(
    last_executed_at: Option<DateTime<Utc>>,
    value: u32,
    unit: FrequencyUnit,
    now: DateTime<Utc>,
) -> f64 {
    let Some(last) = last_executed_at else {
        return 100.0;
    };

    let period = period_hours(value, unit);
    if period <= 0.0 {
        return 100.0;
    }

    let percent = 100.0 * hours_between(last, now) / period;
    percent.clamp(0.0, 100.0)
}

/// Whole days since the last execution, rounded down.
pub fn days_since(last_executed_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<i64> {
    last_executed_at.map(|last| (now - last).num_days())
}
