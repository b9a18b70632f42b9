//! What goes to the browser, and how the push service should treat it.

use chrono::{DateTime, Utc};
use lastmove_core::{NotificationRecord, Priority};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ICON: &str = "/icon-192x192.png";
pub const DEFAULT_BADGE: &str = "/badge-72x72.png";
pub const NOTIFICATION_TAG: &str = "lastmove-notification";
/// 24 hours.
pub const DEFAULT_TTL_SECONDS: u32 = 86_400;

/// JSON body the service worker receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_id: Option<i64>,
    pub priority: Priority,
    /// Epoch milliseconds at send time.
    pub timestamp: i64,
    pub tag: String,
}

impl PushPayload {
    pub fn message(
        title: impl Into<String>,
        body: impl Into<String>,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            icon: DEFAULT_ICON.to_string(),
            badge: DEFAULT_BADGE.to_string(),
            data: serde_json::json!({}),
            notification_id: None,
            priority,
            timestamp: now.timestamp_millis(),
            tag: NOTIFICATION_TAG.to_string(),
        }
    }

    pub fn for_record(record: &NotificationRecord, now: DateTime<Utc>) -> Self {
        let mut payload = Self::message(&record.title, &record.body, record.priority, now);
        payload.data = if record.data.is_null() {
            serde_json::json!({})
        } else {
            record.data.clone()
        };
        payload.notification_id = Some(record.id);
        payload
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Web push `Urgency` header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Normal,
    High,
}

impl Urgency {
    pub fn for_priority(priority: Priority) -> Self {
        match priority {
            Priority::Urgent | Priority::High => Urgency::High,
            Priority::Low => Urgency::Low,
            Priority::Normal => Urgency::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Normal => "normal",
            Urgency::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    pub ttl_seconds: u32,
    pub urgency: Urgency,
}

impl SendOptions {
    pub fn for_priority(priority: Priority, ttl_seconds: u32) -> Self {
        Self {
            ttl_seconds,
            urgency: Urgency::for_priority(priority),
        }
    }
}
