//! Batch analyzer: evaluate every active activity and queue reminders.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::activity::ActivitySnapshot;
use crate::evaluator::{Evaluator, Verdict};
use crate::notification::{NewNotification, NotificationKind, Priority};
use crate::activity::FrequencyUnit;
use crate::store::{NotificationStore, SettingsCache};
use crate::urgency::days_since;

/// How the analyzer guards against queueing the same reminder twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupeMode {
    /// No check. Runs are bounded by the scheduler gate, so at most one batch
    /// per regular slot normally happens; re-running inside the tolerance
    /// window does create duplicate rows.
    #[default]
    RelyOnGate,
    /// Skip an activity that already has an unsent reminder of the same kind
    /// scheduled within the window.
    SkipOpenUnsent { window_hours: i64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub analyzed_activities: usize,
    pub notification_targets: usize,
    /// Activities whose owner turned daily reminders off.
    pub muted: usize,
    pub created: usize,
    pub deduplicated: usize,
    pub failed_inserts: usize,
    pub anomalies: usize,
}

#[derive(Debug, Clone)]
pub struct BatchAnalyzer {
    evaluator: Evaluator,
    dedupe: DedupeMode,
}

impl BatchAnalyzer {
    pub fn new(evaluator: Evaluator) -> Self {
        Self {
            evaluator,
            dedupe: DedupeMode::default(),
        }
    }

    pub fn with_dedupe(mut self, dedupe: DedupeMode) -> Self {
        self.dedupe = dedupe;
        self
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Evaluate all active activities and persist a reminder for each that fires.
    /// Users with daily reminders switched off are skipped.
    ///
    /// Only a failure to list activities aborts the run; individual insert
    /// errors are logged and counted.
    pub fn analyze<S: NotificationStore + ?Sized>(
        &self,
        store: &S,
        now: DateTime<Utc>,
    ) -> anyhow::Result<AnalysisSummary> {
        let activities = store.list_active_activities_with_last_move()?;
        let mut summary = AnalysisSummary {
            analyzed_activities: activities.len(),
            ..Default::default()
        };

        let mut settings = SettingsCache::new(store);
        let requests: Vec<NewNotification> = activities
            .iter()
            .filter_map(|a| {
                if !settings.get(&a.user_id).daily_reminder_enabled {
                    summary.muted += 1;
                    return None;
                }
                match self.evaluator.evaluate(a, now) {
                    Verdict::Fire {
                        priority,
                        percent,
                        message,
                    } => Some(build_request(a, priority, percent, &message, now)),
                    Verdict::Anomaly(_) => {
                        summary.anomalies += 1;
                        None
                    }
                    Verdict::Quiet => None,
                }
            })
            .collect();
        summary.notification_targets = requests.len();

        for request in &requests {
            if self.is_duplicate(store, request, now) {
                summary.deduplicated += 1;
                continue;
            }
            match store.insert_notification(request) {
                Ok(id) => {
                    tracing::debug!(
                        notification_id = id,
                        user_id = %request.user_id,
                        priority = %request.priority,
                        "queued activity reminder"
                    );
                    summary.created += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = %request.user_id,
                        activity_id = ?request.activity_id,
                        error = %e,
                        "failed to queue activity reminder"
                    );
                    summary.failed_inserts += 1;
                }
            }
        }

        tracing::info!(
            analyzed = summary.analyzed_activities,
            targets = summary.notification_targets,
            muted = summary.muted,
            created = summary.created,
            deduplicated = summary.deduplicated,
            anomalies = summary.anomalies,
            "notification analysis complete"
        );
        Ok(summary)
    }

    fn is_duplicate<S: NotificationStore + ?Sized>(
        &self,
        store: &S,
        request: &NewNotification,
        now: DateTime<Utc>,
    ) -> bool {
        let DedupeMode::SkipOpenUnsent { window_hours } = self.dedupe else {
            return false;
        };
        let Some(activity_id) = request.activity_id else {
            return false;
        };
        let since = now - Duration::hours(window_hours);
        match store.has_open_notification(activity_id, request.kind, since) {
            Ok(open) => open,
            Err(e) => {
                // Prefer a possible duplicate over a silently dropped reminder.
                tracing::warn!(activity_id, error = %e, "dedupe lookup failed; queueing anyway");
                false
            }
        }
    }
}

fn build_request(
    activity: &ActivitySnapshot,
    priority: Priority,
    percent: f64,
    message: &str,
    now: DateTime<Utc>,
) -> NewNotification {
    let frequency_text = activity
        .unit()
        .map(|u| format!("{} {}", activity.frequency_value, u.label(activity.frequency_value)))
        .unwrap_or_else(|| format!("{} {}", activity.frequency_value, activity.frequency_unit));

    let days = days_since(activity.last_executed_at, now);
    let elapsed = match days {
        Some(d) => format!("{d} {} elapsed", day_label(d)),
        None => "never done".to_string(),
    };

    NewNotification {
        user_id: activity.user_id.clone(),
        activity_id: Some(activity.activity_id),
        kind: NotificationKind::DailyReminder,
        priority,
        title: format!("{} reminder", activity.title),
        body: format!("{message} ({frequency_text} cycle, {elapsed})"),
        data: json!({
            "activityId": activity.activity_id,
            "urgencyPercentage": percent,
            "frequencyText": frequency_text,
            "daysSinceLastExecution": days,
            "type": "activity_reminder",
        }),
        scheduled_at: now,
    }
}

/// "day" for exactly one, "days" otherwise.
pub(crate) fn day_label(days: i64) -> &'static str {
    FrequencyUnit::Days.label(u32::try_from(days).unwrap_or(0))
}
