//! Scheduler gate: the fixed daily instants at which analysis runs on its own.
//!
//! An external trigger (cron, `serve` loop) may fire late by a few minutes, so
//! each slot accepts a tolerance window around its minute.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::analyzer::{AnalysisSummary, BatchAnalyzer};
use crate::store::NotificationStore;
use crate::time::resolve_local;

pub const DEFAULT_TOLERANCE_MINUTES: u32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct RegularSchedule {
    times: Vec<NaiveTime>,
    tolerance_minutes: u32,
    tz: Tz,
}

impl RegularSchedule {
    pub fn new(times: Vec<NaiveTime>, tolerance_minutes: u32, tz: Tz) -> Result<Self> {
        if times.is_empty() {
            bail!("at least one regular check time is required");
        }
        let mut times = times;
        times.sort();
        times.dedup();
        Ok(Self {
            times,
            tolerance_minutes,
            tz,
        })
    }

    /// 19:00, 21:00 and 23:00 local, 5 minutes tolerance.
    pub fn evening(tz: Tz) -> Self {
        let times = [19, 21, 23]
            .into_iter()
            .filter_map(|h| NaiveTime::from_hms_opt(h, 0, 0))
            .collect();
        Self {
            times,
            tolerance_minutes: DEFAULT_TOLERANCE_MINUTES,
            tz,
        }
    }

    pub fn times(&self) -> &[NaiveTime] {
        &self.times
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn is_regular_time(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.tz);
        self.times.iter().any(|slot| {
            slot.hour() == local.hour() && slot.minute().abs_diff(local.minute()) <= self.tolerance_minutes
        })
    }

    /// First slot strictly after `now` today, else tomorrow's first slot.
    pub fn next_regular_time(&self, now: DateTime<Utc>) -> DateTime<Tz> {
        let local = now.with_timezone(&self.tz);
        let today = local.date_naive();

        let later_today = self
            .times
            .iter()
            .filter_map(|t| resolve_local(self.tz, today, *t))
            .find(|slot| *slot > local);
        if let Some(slot) = later_today {
            return slot;
        }

        let tomorrow = today.succ_opt().unwrap_or(today);
        self.times
            .iter()
            .find_map(|t| resolve_local(self.tz, tomorrow, *t))
            // Unreachable for real zones; keep a sane fallback instead of panicking.
            .unwrap_or_else(|| local + Duration::days(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckReport {
    pub local_time: String,
    pub is_regular_time: bool,
    pub next_regular_time: String,
    pub analysis: Option<AnalysisSummary>,
}

impl CheckReport {
    pub fn message(&self) -> String {
        match &self.analysis {
            Some(a) => format!(
                "regular check at {}: analyzed {} activities, queued {} reminders",
                self.local_time, a.analyzed_activities, a.created
            ),
            None => format!(
                "not a regular check time ({}), waiting until {}",
                self.local_time, self.next_regular_time
            ),
        }
    }
}

const REPORT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Gate, then analyze when `now` falls inside a regular slot.
pub fn run_check<S: NotificationStore + ?Sized>(
    schedule: &RegularSchedule,
    analyzer: &BatchAnalyzer,
    store: &S,
    now: DateTime<Utc>,
) -> Result<CheckReport> {
    let local = now.with_timezone(&schedule.tz);
    let is_regular = schedule.is_regular_time(now);
    let next = schedule.next_regular_time(now);

    let analysis = if is_regular {
        Some(analyzer.analyze(store, now)?)
    } else {
        tracing::debug!(local = %local.format("%H:%M"), "outside regular check window");
        None
    };

    Ok(CheckReport {
        local_time: local.format(REPORT_FORMAT).to_string(),
        is_regular_time: is_regular,
        next_regular_time: next.format(REPORT_FORMAT).to_string(),
        analysis,
    })
}

/// Analyze unconditionally, for operators and testing.
pub fn run_manual<S: NotificationStore + ?Sized>(
    analyzer: &BatchAnalyzer,
    store: &S,
    now: DateTime<Utc>,
) -> Result<AnalysisSummary> {
    tracing::info!("manual notification check triggered");
    analyzer.analyze(store, now)
}
