//! Delivery dispatcher: claim due records, push them, record the outcome.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use lastmove_core::{DeliveryStatus, NotificationRecord, NotificationStore, Priority, PushSubscription};
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::payload::{PushPayload, SendOptions, DEFAULT_TTL_SECONDS};
use crate::transport::{PushResponse, PushTransport};

/// Tries at persisting a successful push before giving up on the row.
const MARK_SENT_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    pub batch_limit: usize,
    pub max_retries: u32,
    pub ttl_seconds: u32,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            batch_limit: 50,
            max_retries: 3,
            ttl_seconds: DEFAULT_TTL_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub claimed: usize,
    pub sent: usize,
    /// Attempts that consumed a retry.
    pub failed: usize,
    /// Records left untouched for lack of a subscription.
    pub skipped: usize,
    /// Failures that reached `failed_permanent`.
    pub exhausted: usize,
}

/// A one-off message that bypasses the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct ImmediateMessage {
    pub title: String,
    pub body: String,
    pub priority: Priority,
}

enum Outcome {
    Sent,
    Skipped,
    Failed(DeliveryStatus),
}

pub struct Dispatcher<T> {
    transport: T,
    settings: DispatchSettings,
    /// Ids pushed successfully whose `sent` state could not be stored. They
    /// are never pushed again by this dispatcher.
    unrecorded: Mutex<HashSet<i64>>,
}

impl<T: PushTransport> Dispatcher<T> {
    pub fn new(transport: T, settings: DispatchSettings) -> Self {
        Self {
            transport,
            settings,
            unrecorded: Mutex::new(HashSet::new()),
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn ensure_credentials(&self) -> Result<(), DispatchError> {
        let missing = self.transport.missing_credentials();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::MissingCredentials { missing })
        }
    }

    /// Claim up to `batch_limit` due records and try each once.
    ///
    /// Only a missing configuration or a failed claim aborts the run; every
    /// per-record problem is logged and tracked on the record itself.
    pub async fn dispatch_pending<S: NotificationStore + ?Sized>(
        &self,
        store: &S,
        now: DateTime<Utc>,
    ) -> Result<DispatchSummary, DispatchError> {
        self.ensure_credentials()?;

        let records = store
            .claim_pending(now, self.settings.batch_limit, self.settings.max_retries)
            .map_err(DispatchError::Store)?;
        let mut summary = DispatchSummary {
            claimed: records.len(),
            ..Default::default()
        };

        for record in &records {
            match self.deliver(store, record, now).await {
                Outcome::Sent => summary.sent += 1,
                Outcome::Skipped => summary.skipped += 1,
                Outcome::Failed(status) => {
                    summary.failed += 1;
                    if status == DeliveryStatus::FailedPermanent {
                        summary.exhausted += 1;
                    }
                }
            }
        }

        tracing::info!(
            claimed = summary.claimed,
            sent = summary.sent,
            failed = summary.failed,
            skipped = summary.skipped,
            exhausted = summary.exhausted,
            "notification dispatch complete"
        );
        Ok(summary)
    }

    async fn deliver<S: NotificationStore + ?Sized>(
        &self,
        store: &S,
        record: &NotificationRecord,
        now: DateTime<Utc>,
    ) -> Outcome {
        if self.is_unrecorded(record.id) {
            // already delivered; only the bookkeeping is missing
            if self.record_sent(store, record.id, now) {
                tracing::info!(notification_id = record.id, "stored sent state of an earlier delivery");
            }
            return Outcome::Skipped;
        }

        let raw = match store.push_subscription(&record.user_id) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!(notification_id = record.id, user_id = %record.user_id, "no push subscription; skipping");
                self.release(store, record.id);
                return Outcome::Skipped;
            }
            Err(e) => {
                tracing::warn!(notification_id = record.id, error = %e, "subscription lookup failed; skipping");
                self.release(store, record.id);
                return Outcome::Skipped;
            }
        };

        let subscription = match PushSubscription::parse(&raw) {
            Ok(sub) => sub,
            Err(e) => return self.fail(store, record, &format!("invalid push subscription: {e}")),
        };

        let payload = match PushPayload::for_record(record, now).to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => return self.fail(store, record, &format!("payload encoding failed: {e}")),
        };

        let options = SendOptions::for_priority(record.priority, self.settings.ttl_seconds);
        match self.transport.send(&subscription, &payload, options).await {
            Ok(resp) if resp.is_success() => {
                tracing::debug!(notification_id = record.id, status = resp.status, "push delivered");
                if !self.record_sent(store, record.id, now) {
                    self.remember_unrecorded(record.id);
                }
                Outcome::Sent
            }
            Ok(resp) => self.fail(
                store,
                record,
                &format!("push service returned status {}", resp.status),
            ),
            Err(e) => self.fail(store, record, &e.to_string()),
        }
    }

    fn fail<S: NotificationStore + ?Sized>(
        &self,
        store: &S,
        record: &NotificationRecord,
        error: &str,
    ) -> Outcome {
        match store.record_failure(record.id, error, self.settings.max_retries) {
            Ok(DeliveryStatus::FailedPermanent) => {
                tracing::warn!(
                    notification_id = record.id,
                    user_id = %record.user_id,
                    error,
                    "push delivery failed permanently"
                );
                Outcome::Failed(DeliveryStatus::FailedPermanent)
            }
            Ok(status) => {
                tracing::warn!(notification_id = record.id, error, "push delivery failed; will retry");
                Outcome::Failed(status)
            }
            Err(e) => {
                tracing::warn!(notification_id = record.id, error = %e, "could not record delivery failure");
                self.release(store, record.id);
                Outcome::Failed(DeliveryStatus::Retrying)
            }
        }
    }

    /// Persist the sent state, retrying a few times. The claim is kept on
    /// failure so no other dispatcher picks the row up before it goes stale.
    fn record_sent<S: NotificationStore + ?Sized>(&self, store: &S, id: i64, now: DateTime<Utc>) -> bool {
        for attempt in 1..=MARK_SENT_ATTEMPTS {
            match store.mark_sent(id, now) {
                Ok(()) => {
                    self.forget_unrecorded(id);
                    return true;
                }
                Err(e) => {
                    tracing::warn!(notification_id = id, attempt, error = %e, "mark_sent failed");
                }
            }
        }
        tracing::error!(notification_id = id, "push delivered but its sent state could not be stored");
        false
    }

    fn is_unrecorded(&self, id: i64) -> bool {
        self.unrecorded
            .lock()
            .map(|ids| ids.contains(&id))
            .unwrap_or(false)
    }

    fn remember_unrecorded(&self, id: i64) {
        if let Ok(mut ids) = self.unrecorded.lock() {
            ids.insert(id);
        }
    }

    fn forget_unrecorded(&self, id: i64) {
        if let Ok(mut ids) = self.unrecorded.lock() {
            ids.remove(&id);
        }
    }

    fn release<S: NotificationStore + ?Sized>(&self, store: &S, id: i64) {
        if let Err(e) = store.release_claim(id) {
            tracing::warn!(notification_id = id, error = %e, "failed to release claim");
        }
    }

    /// Push a message to one user right away, without creating a record.
    pub async fn send_immediate<S: NotificationStore + ?Sized>(
        &self,
        store: &S,
        user_id: &str,
        message: &ImmediateMessage,
        now: DateTime<Utc>,
    ) -> Result<PushResponse, DispatchError> {
        self.ensure_credentials()?;

        let raw = store
            .push_subscription(user_id)
            .map_err(DispatchError::Store)?
            .ok_or_else(|| DispatchError::NoSubscription {
                user_id: user_id.to_string(),
            })?;
        let subscription = PushSubscription::parse(&raw)
            .map_err(|e| DispatchError::MalformedSubscription(e.to_string()))?;

        let payload =
            PushPayload::message(&message.title, &message.body, message.priority, now).to_bytes()?;
        let options = SendOptions::for_priority(message.priority, self.settings.ttl_seconds);
        let resp = self.transport.send(&subscription, &payload, options).await?;
        if !resp.is_success() {
            return Err(DispatchError::Rejected {
                status: resp.status,
            });
        }
        tracing::info!(user_id, "immediate push delivered");
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::payload::Urgency;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use lastmove_core::{ActivitySnapshot, NewNotification, NotificationKind, NotificationSettings, NotificationStats};
    use lastmove_store::{notifications, settings, SqliteStore};
    use serde_json::json;
    use std::cell::Cell;

    /// Records every send; answers by endpoint.
    #[derive(Default)]
    struct FakeTransport {
        missing: Vec<&'static str>,
        sent: Mutex<Vec<(String, serde_json::Value, SendOptions)>>,
        status_for: Vec<(&'static str, u16)>,
        error_for: Vec<&'static str>,
    }

    #[async_trait]
    impl PushTransport for FakeTransport {
        fn missing_credentials(&self) -> Vec<&'static str> {
            self.missing.clone()
        }

        async fn send(
            &self,
            subscription: &PushSubscription,
            payload: &[u8],
            options: SendOptions,
        ) -> Result<PushResponse, TransportError> {
            let endpoint = subscription.endpoint.as_str();
            if self.error_for.iter().any(|e| endpoint.ends_with(e)) {
                return Err(TransportError::InvalidPayload("connection reset".to_string()));
            }
            let value = serde_json::from_slice(payload).unwrap();
            self.sent
                .lock()
                .unwrap()
                .push((endpoint.to_string(), value, options));
            let status = self
                .status_for
                .iter()
                .find(|(e, _)| endpoint.ends_with(e))
                .map(|(_, s)| *s)
                .unwrap_or(201);
            Ok(PushResponse { status })
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn subscribe(store: &SqliteStore, user: &str) {
        let raw = format!(
            r#"{{"endpoint":"https://push.example/{user}","keys":{{"p256dh":"k","auth":"a"}}}}"#
        );
        settings::set_push_subscription(store.conn(), user, &raw, now()).unwrap();
    }

    fn queue(store: &SqliteStore, user: &str, priority: Priority) -> i64 {
        settings::ensure_user(store.conn(), user, now()).unwrap();
        let n = NewNotification {
            user_id: user.to_string(),
            activity_id: None,
            kind: NotificationKind::DailyReminder,
            priority,
            title: format!("{user} reminder"),
            body: "Your weekly activity is almost due.".to_string(),
            data: json!({ "type": "activity_reminder" }),
            scheduled_at: now() - Duration::minutes(1),
        };
        store.insert_notification(&n).unwrap()
    }

    fn dispatcher(transport: FakeTransport) -> Dispatcher<FakeTransport> {
        Dispatcher::new(transport, DispatchSettings::default())
    }

    #[tokio::test]
    async fn sends_due_records_and_marks_them() {
        let store = SqliteStore::open_memory().unwrap();
        subscribe(&store, "alice");
        let id = queue(&store, "alice", Priority::High);

        let d = dispatcher(FakeTransport::default());
        let summary = d.dispatch_pending(&store, now()).await.unwrap();
        assert_eq!(summary.claimed, 1);
        assert_eq!(summary.sent, 1);

        let rec = notifications::get(store.conn(), id).unwrap();
        assert_eq!(rec.status, DeliveryStatus::Sent);
        assert_eq!(rec.sent_at, Some(now()));

        let sent = d.transport().sent.lock().unwrap();
        let (endpoint, payload, options) = &sent[0];
        assert_eq!(endpoint, "https://push.example/alice");
        assert_eq!(payload["notificationId"], id);
        assert_eq!(payload["tag"], "lastmove-notification");
        assert_eq!(options.urgency, Urgency::High);
        assert_eq!(options.ttl_seconds, 86_400);
    }

    #[tokio::test]
    async fn exhausted_records_are_ignored() {
        let store = SqliteStore::open_memory().unwrap();
        subscribe(&store, "alice");
        subscribe(&store, "bob");
        let exhausted = queue(&store, "alice", Priority::Urgent);
        store
            .conn()
            .execute("UPDATE notifications SET retry_count = 3, status = 'retrying' WHERE id = ?1", [exhausted])
            .unwrap();
        let eligible = queue(&store, "bob", Priority::Low);

        let d = dispatcher(FakeTransport::default());
        let summary = d.dispatch_pending(&store, now()).await.unwrap();
        assert_eq!(summary.claimed, 1);
        assert_eq!(summary.sent, 1);

        let sent = d.transport().sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "https://push.example/bob");
        assert_eq!(sent[0].1["notificationId"], eligible);

        let untouched = notifications::get(store.conn(), exhausted).unwrap();
        assert_eq!(untouched.status, DeliveryStatus::Retrying);
        assert_eq!(untouched.retry_count, 3);
        assert!(untouched.claimed_at.is_none());
    }

    #[tokio::test]
    async fn one_failing_record_does_not_stop_the_next() {
        let store = SqliteStore::open_memory().unwrap();
        subscribe(&store, "alice");
        subscribe(&store, "bob");
        let a = queue(&store, "alice", Priority::Urgent);
        let b = queue(&store, "bob", Priority::Normal);

        let d = dispatcher(FakeTransport {
            error_for: vec!["alice"],
            ..Default::default()
        });
        let summary = d.dispatch_pending(&store, now()).await.unwrap();
        assert_eq!(summary.claimed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.sent, 1);

        let a = notifications::get(store.conn(), a).unwrap();
        assert_eq!(a.status, DeliveryStatus::Retrying);
        assert_eq!(a.retry_count, 1);
        assert!(a.error_message.unwrap().contains("connection reset"));
        assert!(a.claimed_at.is_none());
        assert!(notifications::get(store.conn(), b).unwrap().is_sent());
    }

    #[tokio::test]
    async fn rejections_exhaust_after_max_retries() {
        let store = SqliteStore::open_memory().unwrap();
        subscribe(&store, "alice");
        let id = queue(&store, "alice", Priority::Low);

        let d = dispatcher(FakeTransport {
            status_for: vec![("alice", 410)],
            ..Default::default()
        });
        for attempt in 1..=3 {
            let summary = d.dispatch_pending(&store, now()).await.unwrap();
            assert_eq!(summary.failed, 1, "attempt {attempt}");
            assert_eq!(summary.exhausted, usize::from(attempt == 3));
        }
        let rec = notifications::get(store.conn(), id).unwrap();
        assert_eq!(rec.status, DeliveryStatus::FailedPermanent);
        assert_eq!(rec.retry_count, 3);
        assert_eq!(rec.error_message.as_deref(), Some("push service returned status 410"));

        let summary = d.dispatch_pending(&store, now()).await.unwrap();
        assert_eq!(summary.claimed, 0);
    }

    #[tokio::test]
    async fn missing_subscription_skips_without_spending_a_retry() {
        let store = SqliteStore::open_memory().unwrap();
        let id = queue(&store, "carol", Priority::Normal);

        let d = dispatcher(FakeTransport::default());
        let summary = d.dispatch_pending(&store, now()).await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 0);

        let rec = notifications::get(store.conn(), id).unwrap();
        assert_eq!(rec.status, DeliveryStatus::Pending);
        assert_eq!(rec.retry_count, 0);
        assert!(rec.claimed_at.is_none());
    }

    #[tokio::test]
    async fn malformed_subscription_is_a_record_failure() {
        let store = SqliteStore::open_memory().unwrap();
        let id = queue(&store, "dave", Priority::Normal);
        store
            .conn()
            .execute(
                "INSERT INTO user_notification_settings (user_id, push_subscription, updated_at)
                 VALUES ('dave', '{\"endpoint\":\"\"}', 0)",
                [],
            )
            .unwrap();

        let summary = dispatcher(FakeTransport::default())
            .dispatch_pending(&store, now())
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);
        let rec = notifications::get(store.conn(), id).unwrap();
        assert!(rec.error_message.unwrap().starts_with("invalid push subscription"));
    }

    #[tokio::test]
    async fn missing_credentials_refuse_before_claiming() {
        let store = SqliteStore::open_memory().unwrap();
        subscribe(&store, "alice");
        let id = queue(&store, "alice", Priority::Normal);

        let d = dispatcher(FakeTransport {
            missing: vec!["vapid_private_key"],
            ..Default::default()
        });
        let err = d.dispatch_pending(&store, now()).await.unwrap_err();
        assert!(matches!(err, DispatchError::MissingCredentials { .. }));
        assert!(notifications::get(store.conn(), id).unwrap().claimed_at.is_none());
    }

    #[tokio::test]
    async fn immediate_send_needs_a_subscription() {
        let store = SqliteStore::open_memory().unwrap();
        subscribe(&store, "alice");
        let d = dispatcher(FakeTransport::default());
        let msg = ImmediateMessage {
            title: "Test".to_string(),
            body: "hello".to_string(),
            priority: Priority::Normal,
        };

        let resp = d.send_immediate(&store, "alice", &msg, now()).await.unwrap();
        assert_eq!(resp.status, 201);
        assert!(d.transport().sent.lock().unwrap()[0].1.get("notificationId").is_none());

        let err = d.send_immediate(&store, "nobody", &msg, now()).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoSubscription { .. }));
    }

    /// SQLite store whose `mark_sent` fails a set number of times.
    struct FlakyMarkStore {
        inner: SqliteStore,
        mark_failures: Cell<u32>,
    }

    impl FlakyMarkStore {
        fn new(mark_failures: u32) -> Self {
            Self {
                inner: SqliteStore::open_memory().unwrap(),
                mark_failures: Cell::new(mark_failures),
            }
        }
    }

    impl NotificationStore for FlakyMarkStore {
        fn list_active_activities_with_last_move(&self) -> anyhow::Result<Vec<ActivitySnapshot>> {
            self.inner.list_active_activities_with_last_move()
        }

        fn insert_notification(&self, n: &NewNotification) -> anyhow::Result<i64> {
            self.inner.insert_notification(n)
        }

        fn has_open_notification(&self, id: i64, kind: NotificationKind, since: DateTime<Utc>) -> anyhow::Result<bool> {
            self.inner.has_open_notification(id, kind, since)
        }

        fn has_notification_since(&self, id: i64, kind: NotificationKind, since: DateTime<Utc>) -> anyhow::Result<bool> {
            self.inner.has_notification_since(id, kind, since)
        }

        fn move_times_since(&self, id: i64, since: DateTime<Utc>) -> anyhow::Result<Vec<DateTime<Utc>>> {
            self.inner.move_times_since(id, since)
        }

        fn notification_settings(&self, user_id: &str) -> anyhow::Result<NotificationSettings> {
            self.inner.notification_settings(user_id)
        }

        fn list_pending(&self, now: DateTime<Utc>, limit: usize, max: u32) -> anyhow::Result<Vec<NotificationRecord>> {
            self.inner.list_pending(now, limit, max)
        }

        fn claim_pending(&self, now: DateTime<Utc>, limit: usize, max: u32) -> anyhow::Result<Vec<NotificationRecord>> {
            self.inner.claim_pending(now, limit, max)
        }

        fn release_claim(&self, id: i64) -> anyhow::Result<()> {
            self.inner.release_claim(id)
        }

        fn mark_sent(&self, id: i64, now: DateTime<Utc>) -> anyhow::Result<()> {
            let left = self.mark_failures.get();
            if left > 0 {
                self.mark_failures.set(left - 1);
                anyhow::bail!("database is locked");
            }
            self.inner.mark_sent(id, now)
        }

        fn record_failure(&self, id: i64, error: &str, max: u32) -> anyhow::Result<DeliveryStatus> {
            self.inner.record_failure(id, error, max)
        }

        fn push_subscription(&self, user_id: &str) -> anyhow::Result<Option<String>> {
            self.inner.push_subscription(user_id)
        }

        fn user_stats(&self, user_id: &str, now: DateTime<Utc>) -> anyhow::Result<NotificationStats> {
            self.inner.user_stats(user_id, now)
        }
    }

    #[tokio::test]
    async fn transient_mark_sent_failure_does_not_resend() {
        let store = FlakyMarkStore::new(1);
        subscribe(&store.inner, "alice");
        let id = queue(&store.inner, "alice", Priority::Normal);

        let d = dispatcher(FakeTransport::default());
        let first = d.dispatch_pending(&store, now()).await.unwrap();
        assert_eq!(first.sent, 1);
        assert!(notifications::get(store.inner.conn(), id).unwrap().is_sent());

        let later = now() + lastmove_core::store::claim_ttl() + Duration::minutes(1);
        let second = d.dispatch_pending(&store, later).await.unwrap();
        assert_eq!(second.claimed, 0);
        assert_eq!(d.transport().sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unstored_delivery_is_never_pushed_twice() {
        let store = FlakyMarkStore::new(MARK_SENT_ATTEMPTS);
        subscribe(&store.inner, "alice");
        let id = queue(&store.inner, "alice", Priority::Normal);

        let d = dispatcher(FakeTransport::default());
        let first = d.dispatch_pending(&store, now()).await.unwrap();
        assert_eq!(first.sent, 1);
        let rec = notifications::get(store.inner.conn(), id).unwrap();
        assert_eq!(rec.status, DeliveryStatus::Pending);
        // the claim is kept so other dispatchers wait out the ttl
        assert_eq!(rec.claimed_at, Some(now()));

        let later = now() + lastmove_core::store::claim_ttl() + Duration::minutes(1);
        let second = d.dispatch_pending(&store, later).await.unwrap();
        assert_eq!(second.claimed, 1);
        assert_eq!(second.sent, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(d.transport().sent.lock().unwrap().len(), 1);
        // the store recovered, so the row finally reads as sent
        assert!(notifications::get(store.inner.conn(), id).unwrap().is_sent());
    }
}
