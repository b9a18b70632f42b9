//! Notification records and their delivery state machine.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    /// Sort key; higher is more urgent.
    pub fn rank(&self) -> i64 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Urgent => 3,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => bail!("unknown priority: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    DailyReminder,
    WeeklyReminder,
    LongInactive,
    StreakCelebration,
    GoalAchievement,
    Encouragement,
    Custom,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::DailyReminder => "daily_reminder",
            NotificationKind::WeeklyReminder => "weekly_reminder",
            NotificationKind::LongInactive => "long_inactive",
            NotificationKind::StreakCelebration => "streak_celebration",
            NotificationKind::GoalAchievement => "goal_achievement",
            NotificationKind::Encouragement => "encouragement",
            NotificationKind::Custom => "custom",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "daily_reminder" => Ok(NotificationKind::DailyReminder),
            "weekly_reminder" => Ok(NotificationKind::WeeklyReminder),
            "long_inactive" => Ok(NotificationKind::LongInactive),
            "streak_celebration" => Ok(NotificationKind::StreakCelebration),
            "goal_achievement" => Ok(NotificationKind::GoalAchievement),
            "encouragement" => Ok(NotificationKind::Encouragement),
            "custom" => Ok(NotificationKind::Custom),
            other => bail!("unknown notification kind: {other}"),
        }
    }
}

/// `pending -> sent`, or `pending -> retrying -> ... -> failed_permanent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Retrying,
    Sent,
    FailedPermanent,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Retrying => "retrying",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::FailedPermanent => "failed_permanent",
        }
    }

    /// Still eligible for a delivery attempt.
    pub fn is_open(&self) -> bool {
        matches!(self, DeliveryStatus::Pending | DeliveryStatus::Retrying)
    }

    /// State after a failed attempt, given the retry count *after* incrementing.
    pub fn after_failure(retry_count: u32, max_retries: u32) -> Self {
        if retry_count >= max_retries {
            DeliveryStatus::FailedPermanent
        } else {
            DeliveryStatus::Retrying
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "retrying" => Ok(DeliveryStatus::Retrying),
            "sent" => Ok(DeliveryStatus::Sent),
            "failed_permanent" => Ok(DeliveryStatus::FailedPermanent),
            other => bail!("unknown delivery status: {other}"),
        }
    }
}

/// A creation request produced by the batch analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub user_id: String,
    pub activity_id: Option<i64>,
    pub kind: NotificationKind,
    pub priority: Priority,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: i64,
    pub user_id: String,
    pub activity_id: Option<i64>,
    pub kind: NotificationKind,
    pub priority: Priority,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub scheduled_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub status: DeliveryStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn is_sent(&self) -> bool {
        self.status == DeliveryStatus::Sent
    }
}

/// Browser push subscription as stored in the user's settings row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

impl PushSubscription {
    /// Parse the stored JSON blob, rejecting empty endpoints or keys.
    pub fn parse(raw: &str) -> Result<Self> {
        let sub: PushSubscription = serde_json::from_str(raw)?;
        if sub.endpoint.trim().is_empty() {
            bail!("push subscription has an empty endpoint");
        }
        if sub.keys.p256dh.is_empty() || sub.keys.auth.is_empty() {
            bail!("push subscription is missing p256dh/auth keys");
        }
        Ok(sub)
    }
}

/// Per-user switches for each notification producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub daily_reminder_enabled: bool,
    pub long_inactive_enabled: bool,
    /// Idle days before a long-inactive nudge. Always >= 1.
    pub long_inactive_days: u32,
    pub streak_celebration_enabled: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            daily_reminder_enabled: true,
            long_inactive_enabled: true,
            long_inactive_days: 7,
            streak_celebration_enabled: true,
        }
    }
}

/// Per-user delivery statistics.
///
/// Counts cover records created in the last 30 days; `pending` only counts
/// open records that are already due. `recent` is the latest records
/// regardless of age.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationStats {
    pub total: u64,
    pub sent: u64,
    pub clicked: u64,
    pub pending: u64,
    pub failed_permanent: u64,
    pub recent: Vec<RecentNotification>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentNotification {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub kind: NotificationKind,
    pub priority: Priority,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_by_urgency() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::Urgent.rank(), 3);
    }

    #[test]
    fn failure_transitions() {
        assert_eq!(DeliveryStatus::after_failure(1, 3), DeliveryStatus::Retrying);
        assert_eq!(DeliveryStatus::after_failure(2, 3), DeliveryStatus::Retrying);
        assert_eq!(DeliveryStatus::after_failure(3, 3), DeliveryStatus::FailedPermanent);
        assert!(!DeliveryStatus::FailedPermanent.is_open());
        assert!(DeliveryStatus::Retrying.is_open());
    }

    #[test]
    fn status_round_trips_through_text() {
        for s in [
            DeliveryStatus::Pending,
            DeliveryStatus::Retrying,
            DeliveryStatus::Sent,
            DeliveryStatus::FailedPermanent,
        ] {
            assert_eq!(s.as_str().parse::<DeliveryStatus>().unwrap(), s);
        }
    }

    #[test]
    fn subscription_parse_rejects_garbage() {
        let ok = r#"{"endpoint":"https://push.example/abc","keys":{"p256dh":"BP","auth":"xx"}}"#;
        assert_eq!(PushSubscription::parse(ok).unwrap().endpoint, "https://push.example/abc");

        assert!(PushSubscription::parse("not json").is_err());
        assert!(PushSubscription::parse(r#"{"endpoint":"","keys":{"p256dh":"a","auth":"b"}}"#).is_err());
        assert!(PushSubscription::parse(r#"{"endpoint":"https://x"}"#).is_err());
    }
}
