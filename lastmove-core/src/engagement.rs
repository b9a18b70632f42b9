//! Engagement passes: long-inactive nudges and streak celebrations.
//!
//! Both walk the same active-activity listing as the batch analyzer and honour
//! the per-user switches in [`NotificationSettings`](crate::NotificationSettings).
//! Unlike reminders they are not bounded by the scheduler gate, so each pass
//! skips an activity that already has a record of its kind in the recent past.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::activity::ActivitySnapshot;
use crate::analyzer::day_label;
use crate::notification::{NewNotification, NotificationKind, Priority};
use crate::store::{NotificationStore, SettingsCache};
use crate::urgency::days_since;

/// Streak lengths worth a celebration.
pub const STREAK_MILESTONES: [u32; 3] = [3, 7, 30];

/// Moves older than this never contribute to a streak.
const STREAK_LOOKBACK_DAYS: i64 = 31;

pub fn long_inactive_delay() -> Duration {
    Duration::hours(1)
}

pub fn streak_delay() -> Duration {
    Duration::minutes(5)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassSummary {
    pub analyzed_activities: usize,
    /// Activities whose owner switched this pass off.
    pub disabled: usize,
    pub targets: usize,
    pub created: usize,
    pub deduplicated: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct EngagementPasses {
    tz: Tz,
}

impl EngagementPasses {
    /// `tz` decides which calendar day a move counts for.
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Nudge every activity idle for at least the owner's `long_inactive_days`,
    /// or never done at all. At most one nudge per activity per idle window.
    pub fn long_inactive<S: NotificationStore + ?Sized>(
        &self,
        store: &S,
        now: DateTime<Utc>,
    ) -> anyhow::Result<PassSummary> {
        let activities = store.list_active_activities_with_last_move()?;
        let mut summary = PassSummary {
            analyzed_activities: activities.len(),
            ..Default::default()
        };
        let mut settings = SettingsCache::new(store);

        for activity in &activities {
            let prefs = settings.get(&activity.user_id);
            if !prefs.long_inactive_enabled {
                summary.disabled += 1;
                continue;
            }
            let threshold = i64::from(prefs.long_inactive_days.max(1));
            let days = days_since(activity.last_executed_at, now);
            if days.is_some_and(|d| d < threshold) {
                continue;
            }
            summary.targets += 1;

            let since = now - Duration::days(threshold);
            if recently_notified(store, activity.activity_id, NotificationKind::LongInactive, since) {
                summary.deduplicated += 1;
                continue;
            }
            queue(store, &long_inactive_request(activity, days, now), &mut summary);
        }

        tracing::info!(
            analyzed = summary.analyzed_activities,
            targets = summary.targets,
            created = summary.created,
            deduplicated = summary.deduplicated,
            "long-inactive pass complete"
        );
        Ok(summary)
    }

    /// Celebrate activities whose daily streak ending today just reached one
    /// of [`STREAK_MILESTONES`].
    pub fn streaks<S: NotificationStore + ?Sized>(
        &self,
        store: &S,
        now: DateTime<Utc>,
    ) -> anyhow::Result<PassSummary> {
        let activities = store.list_active_activities_with_last_move()?;
        let mut summary = PassSummary {
            analyzed_activities: activities.len(),
            ..Default::default()
        };
        let mut settings = SettingsCache::new(store);
        let today = now.with_timezone(&self.tz).date_naive();

        for activity in &activities {
            let Some(last) = activity.last_executed_at else {
                continue;
            };
            if last.with_timezone(&self.tz).date_naive() != today {
                continue;
            }
            if !settings.get(&activity.user_id).streak_celebration_enabled {
                summary.disabled += 1;
                continue;
            }

            let since = now - Duration::days(STREAK_LOOKBACK_DAYS);
            let days: Vec<NaiveDate> = match store.move_times_since(activity.activity_id, since) {
                Ok(times) => times
                    .iter()
                    .map(|t| t.with_timezone(&self.tz).date_naive())
                    .collect(),
                Err(e) => {
                    tracing::warn!(activity_id = activity.activity_id, error = %e, "move lookup failed; skipping");
                    summary.failed += 1;
                    continue;
                }
            };
            let streak = current_streak(&days, today);
            if !STREAK_MILESTONES.contains(&streak) {
                continue;
            }
            summary.targets += 1;

            let since = now - Duration::hours(24);
            if recently_notified(store, activity.activity_id, NotificationKind::StreakCelebration, since) {
                summary.deduplicated += 1;
                continue;
            }
            queue(store, &streak_request(activity, streak, now), &mut summary);
        }

        tracing::info!(
            analyzed = summary.analyzed_activities,
            targets = summary.targets,
            created = summary.created,
            deduplicated = summary.deduplicated,
            "streak pass complete"
        );
        Ok(summary)
    }
}

/// Consecutive days, counting back from `today`, that hold at least one
/// move. Zero when nothing was done today.
pub fn current_streak(days: &[NaiveDate], today: NaiveDate) -> u32 {
    let done: BTreeSet<NaiveDate> = days.iter().copied().collect();
    let mut streak = 0;
    let mut day = today;
    while done.contains(&day) {
        streak += 1;
        match day.pred_opt() {
            Some(prev) => day = prev,
            None => break,
        }
    }
    streak
}

fn recently_notified<S: NotificationStore + ?Sized>(
    store: &S,
    activity_id: i64,
    kind: NotificationKind,
    since: DateTime<Utc>,
) -> bool {
    store
        .has_notification_since(activity_id, kind, since)
        .unwrap_or_else(|e| {
            tracing::warn!(activity_id, error = %e, "dedupe lookup failed; queueing anyway");
            false
        })
}

fn queue<S: NotificationStore + ?Sized>(store: &S, request: &NewNotification, summary: &mut PassSummary) {
    match store.insert_notification(request) {
        Ok(id) => {
            tracing::debug!(notification_id = id, kind = request.kind.as_str(), "queued engagement notification");
            summary.created += 1;
        }
        Err(e) => {
            tracing::warn!(
                activity_id = ?request.activity_id,
                kind = request.kind.as_str(),
                error = %e,
                "failed to queue engagement notification"
            );
            summary.failed += 1;
        }
    }
}

fn long_inactive_request(activity: &ActivitySnapshot, days: Option<i64>, now: DateTime<Utc>) -> NewNotification {
    let idle = match days {
        Some(d) => format!("has been idle for {d} {}", day_label(d)),
        None => "has no moves yet".to_string(),
    };
    NewNotification {
        user_id: activity.user_id.clone(),
        activity_id: Some(activity.activity_id),
        kind: NotificationKind::LongInactive,
        priority: Priority::Normal,
        title: "Time to start again".to_string(),
        body: format!(
            "\"{}\" {idle}. A small start makes a big difference.",
            activity.title
        ),
        data: json!({
            "activityId": activity.activity_id,
            "daysSinceLastExecution": days,
            "type": "long_inactive",
        }),
        scheduled_at: now + long_inactive_delay(),
    }
}

fn streak_request(activity: &ActivitySnapshot, streak: u32, now: DateTime<Utc>) -> NewNotification {
    let (title, tail) = match streak {
        3 => ("3-day streak!", "3 days in a row. A good habit is taking shape!"),
        7 => ("One-week streak!", "every day for a week. Keep it going!"),
        _ => ("30-day streak!", "every day for a month. It is a real habit now!"),
    };
    NewNotification {
        user_id: activity.user_id.clone(),
        activity_id: Some(activity.activity_id),
        kind: NotificationKind::StreakCelebration,
        priority: Priority::High,
        title: title.to_string(),
        body: format!("\"{}\" done {tail}", activity.title),
        data: json!({
            "activityId": activity.activity_id,
            "streakDays": streak,
            "type": "streak_celebration",
        }),
        scheduled_at: now + streak_delay(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::FrequencyUnit;
    use crate::analyzer::tests::{evening, FakeStore};
    use crate::notification::NotificationSettings;
    use std::collections::HashMap;

    fn passes() -> EngagementPasses {
        EngagementPasses::new(chrono_tz::Asia::Seoul)
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, m, d).unwrap()
    }

    #[test]
    fn streak_counts_back_from_today() {
        let today = date(3, 10);
        assert_eq!(current_streak(&[], today), 0);
        assert_eq!(current_streak(&[date(3, 9), date(3, 8)], today), 0);
        assert_eq!(current_streak(&[date(3, 10), date(3, 9), date(3, 9), date(3, 8)], today), 3);
        // a gap ends the streak
        assert_eq!(current_streak(&[date(3, 10), date(3, 9), date(3, 7)], today), 2);
        assert_eq!(current_streak(&[date(2, 28), date(3, 1)], date(3, 1)), 2);
    }

    fn idle_store(now: DateTime<Utc>) -> FakeStore {
        FakeStore {
            activities: vec![
                ActivitySnapshot::new(1, "alice", "Exercise", 1, FrequencyUnit::Weeks)
                    .with_last_executed_at(now - Duration::hours(160)),
                ActivitySnapshot::new(2, "alice", "Piano", 1, FrequencyUnit::Weeks)
                    .with_last_executed_at(now - Duration::days(10)),
                ActivitySnapshot::new(3, "alice", "Call mom", 1, FrequencyUnit::Months),
                ActivitySnapshot::new(4, "bob", "Journal", 1, FrequencyUnit::Days),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn long_inactive_nudges_idle_and_never_done() {
        let now = evening();
        let store = idle_store(now);

        let summary = passes().long_inactive(&store, now).unwrap();
        assert_eq!(summary.analyzed_activities, 4);
        assert_eq!(summary.targets, 3);
        assert_eq!(summary.created, 3);

        let rows = store.inserted.borrow();
        let piano = &rows[0];
        assert_eq!(piano.activity_id, Some(2));
        assert_eq!(piano.kind, NotificationKind::LongInactive);
        assert_eq!(piano.priority, Priority::Normal);
        assert_eq!(piano.scheduled_at, now + Duration::hours(1));
        assert_eq!(
            piano.body,
            "\"Piano\" has been idle for 10 days. A small start makes a big difference."
        );
        assert_eq!(piano.data["daysSinceLastExecution"], 10);
        assert!(rows[1].body.contains("has no moves yet"));
        assert!(rows[1].data["daysSinceLastExecution"].is_null());
    }

    #[test]
    fn long_inactive_respects_settings_and_window() {
        let now = evening();
        let mut store = idle_store(now);
        let mut settings = HashMap::new();
        settings.insert(
            "alice".to_string(),
            NotificationSettings {
                long_inactive_days: 5,
                ..Default::default()
            },
        );
        settings.insert(
            "bob".to_string(),
            NotificationSettings {
                long_inactive_enabled: false,
                ..Default::default()
            },
        );
        store.settings = settings;

        let first = passes().long_inactive(&store, now).unwrap();
        // Exercise is six days idle, over alice's five-day threshold
        assert_eq!(first.created, 3);
        assert_eq!(first.disabled, 1);

        let again = passes().long_inactive(&store, now + Duration::hours(2)).unwrap();
        assert_eq!(again.targets, 3);
        assert_eq!(again.deduplicated, 3);
        assert_eq!(again.created, 0);
        assert_eq!(store.inserted.borrow().len(), 3);
    }

    fn streak_store(now: DateTime<Utc>) -> FakeStore {
        let daily = |days: i64, offset: i64| -> Vec<DateTime<Utc>> {
            (0..days).map(|d| now - Duration::hours(24 * (d + offset))).collect()
        };
        let mut moves = HashMap::new();
        moves.insert(1, daily(3, 0));
        moves.insert(2, daily(4, 0));
        // three in a row, but not today
        moves.insert(3, daily(3, 1));
        moves.insert(4, daily(7, 0));

        let snapshot = |id: i64, title: &str| {
            let s = ActivitySnapshot::new(id, "alice", title, 1, FrequencyUnit::Days);
            match moves.get(&id).and_then(|m: &Vec<DateTime<Utc>>| m.first().copied()) {
                Some(at) => s.with_last_executed_at(at),
                None => s,
            }
        };
        let activities = vec![
            snapshot(1, "Stretch"),
            snapshot(2, "Read"),
            snapshot(3, "Floss"),
            snapshot(4, "Walk"),
            snapshot(5, "Never"),
        ];
        FakeStore {
            activities,
            moves,
            ..Default::default()
        }
    }

    #[test]
    fn streak_milestones_are_celebrated_once() {
        let now = evening();
        let store = streak_store(now);

        let summary = passes().streaks(&store, now).unwrap();
        assert_eq!(summary.targets, 2);
        assert_eq!(summary.created, 2);

        {
            let rows = store.inserted.borrow();
            let stretch = &rows[0];
            assert_eq!(stretch.activity_id, Some(1));
            assert_eq!(stretch.kind, NotificationKind::StreakCelebration);
            assert_eq!(stretch.priority, Priority::High);
            assert_eq!(stretch.title, "3-day streak!");
            assert_eq!(stretch.scheduled_at, now + Duration::minutes(5));
            assert_eq!(stretch.data["streakDays"], 3);
            assert_eq!(rows[1].title, "One-week streak!");
            assert_eq!(rows[1].body, "\"Walk\" done every day for a week. Keep it going!");
        }

        let again = passes().streaks(&store, now + Duration::hours(1)).unwrap();
        assert_eq!(again.deduplicated, 2);
        assert_eq!(store.inserted.borrow().len(), 2);
    }

    #[test]
    fn streaks_can_be_switched_off() {
        let now = evening();
        let mut store = streak_store(now);
        store.settings.insert(
            "alice".to_string(),
            NotificationSettings {
                streak_celebration_enabled: false,
                ..Default::default()
            },
        );
        let summary = passes().streaks(&store, now).unwrap();
        assert_eq!(summary.created, 0);
        // only activities done today reach the switch
        assert_eq!(summary.disabled, 3);
    }
}
