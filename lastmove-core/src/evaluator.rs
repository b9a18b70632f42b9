//! Per-activity notification decision.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::activity::ActivitySnapshot;
use crate::notification::Priority;
use crate::policy::NotificationPolicy;
use crate::time::local_hour;
use crate::urgency::urgency_percent;

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Quiet,
    /// The row cannot be evaluated; it never fires.
    Anomaly(String),
    Fire {
        priority: Priority,
        percent: f64,
        message: String,
    },
}

impl Verdict {
    pub fn fires(&self) -> bool {
        matches!(self, Verdict::Fire { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Evaluator {
    policy: NotificationPolicy,
    tz: Tz,
}

impl Evaluator {
    pub fn new(policy: NotificationPolicy, tz: Tz) -> Self {
        Self { policy, tz }
    }

    pub fn policy(&self) -> &NotificationPolicy {
        &self.policy
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Pick the most urgent satisfied tier for `activity` at `now`.
    ///
    /// Tiers are walked highest percent first. A tier whose local-hour gate
    /// is closed is skipped, not treated as a stop.
    pub fn evaluate(&self, activity: &ActivitySnapshot, now: DateTime<Utc>) -> Verdict {
        let Some(unit) = activity.unit() else {
            tracing::warn!(
                activity_id = activity.activity_id,
                unit = %activity.frequency_unit,
                "activity has an unknown frequency unit; skipping"
            );
            return Verdict::Anomaly(format!("unknown frequency unit '{}'", activity.frequency_unit));
        };

        let Some(thresholds) = self.policy.thresholds(unit) else {
            tracing::warn!(
                activity_id = activity.activity_id,
                unit = %unit,
                "no notification policy for unit; skipping"
            );
            return Verdict::Anomaly(format!("no policy for unit '{unit}'"));
        };

        let percent = urgency_percent(
            activity.last_executed_at,
            activity.frequency_value,
            unit,
            now,
        );
        let hour = local_hour(now, self.tz);

        thresholds
            .iter()
            .find(|t| t.admits(percent, hour))
            .map(|t| Verdict::Fire {
                priority: t.priority,
                percent,
                message: t.message.clone(),
            })
            .unwrap_or(Verdict::Quiet)
    }
}
