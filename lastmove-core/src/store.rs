//! Storage contract the engine runs against.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use crate::activity::ActivitySnapshot;
use crate::notification::{
    DeliveryStatus, NewNotification, NotificationKind, NotificationRecord, NotificationSettings,
    NotificationStats,
};

/// Claims older than this are considered abandoned and may be taken again.
pub fn claim_ttl() -> Duration {
    Duration::minutes(10)
}

pub trait NotificationStore {
    /// Every active activity across all users, with its latest move.
    fn list_active_activities_with_last_move(&self) -> Result<Vec<ActivitySnapshot>>;

    fn insert_notification(&self, notification: &NewNotification) -> Result<i64>;

    /// Whether a pending or retrying record for `(activity_id, kind)` is
    /// scheduled at or after `since`.
    fn has_open_notification(
        &self,
        activity_id: i64,
        kind: NotificationKind,
        since: DateTime<Utc>,
    ) -> Result<bool>;

    /// Whether any record for `(activity_id, kind)`, in any status, is
    /// scheduled at or after `since`.
    fn has_notification_since(
        &self,
        activity_id: i64,
        kind: NotificationKind,
        since: DateTime<Utc>,
    ) -> Result<bool>;

    /// Execution times of `activity_id` at or after `since`, newest first.
    fn move_times_since(&self, activity_id: i64, since: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>>;

    /// The user's switches, or the defaults when none are stored.
    fn notification_settings(&self, user_id: &str) -> Result<NotificationSettings>;

    /// Due, open records with `retry_count < max_retries`, most urgent then
    /// oldest first. Does not claim.
    fn list_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        max_retries: u32,
    ) -> Result<Vec<NotificationRecord>>;

    /// Like [`list_pending`](Self::list_pending), but atomically stamps
    /// `claimed_at = now` on each returned row. Rows holding a fresh claim are
    /// skipped.
    fn claim_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        max_retries: u32,
    ) -> Result<Vec<NotificationRecord>>;

    /// Drop a claim without touching the retry count.
    fn release_claim(&self, id: i64) -> Result<()>;

    fn mark_sent(&self, id: i64, now: DateTime<Utc>) -> Result<()>;

    /// Bump `retry_count`, store the error, release the claim and return the
    /// resulting status.
    fn record_failure(&self, id: i64, error: &str, max_retries: u32) -> Result<DeliveryStatus>;

    /// Raw subscription blob for `user_id`, if one is stored.
    fn push_subscription(&self, user_id: &str) -> Result<Option<String>>;

    fn user_stats(&self, user_id: &str, now: DateTime<Utc>) -> Result<NotificationStats>;
}

/// Memoized [`NotificationStore::notification_settings`] for one batch run.
/// A failed lookup falls back to the defaults.
pub(crate) struct SettingsCache<'a, S: ?Sized> {
    store: &'a S,
    seen: HashMap<String, NotificationSettings>,
}

impl<'a, S: NotificationStore + ?Sized> SettingsCache<'a, S> {
    pub(crate) fn new(store: &'a S) -> Self {
        Self {
            store,
            seen: HashMap::new(),
        }
    }

    pub(crate) fn get(&mut self, user_id: &str) -> NotificationSettings {
        if let Some(settings) = self.seen.get(user_id) {
            return *settings;
        }
        let settings = self.store.notification_settings(user_id).unwrap_or_else(|e| {
            tracing::warn!(user_id, error = %e, "settings lookup failed; using defaults");
            NotificationSettings::default()
        });
        self.seen.insert(user_id.to_string(), settings);
        settings
    }
}
