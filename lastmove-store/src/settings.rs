//! Users, their notification switches and their push subscription.

use chrono::{DateTime, Utc};
use lastmove_core::{NotificationSettings, PushSubscription};
use rusqlite::{params, Connection, OptionalExtension};

use crate::{to_millis, Result, StoreError};

/// Insert the user row if it does not exist yet.
pub fn ensure_user(conn: &Connection, user_id: &str, now: DateTime<Utc>) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(StoreError::Invalid("user id must not be empty".to_string()));
    }
    conn.execute(
        "INSERT OR IGNORE INTO users (id, created_at) VALUES (?1, ?2)",
        params![user_id, to_millis(now)],
    )?;
    Ok(())
}

/// Store the browser subscription blob for `user_id`, replacing any previous one.
///
/// The blob is validated before it is written; the dispatcher still treats a
/// stored blob as untrusted.
pub fn set_push_subscription(
    conn: &Connection,
    user_id: &str,
    raw: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    PushSubscription::parse(raw).map_err(|e| StoreError::Serialization(e.to_string()))?;
    ensure_user(conn, user_id, now)?;
    conn.execute(
        "INSERT INTO user_notification_settings (user_id, push_subscription, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id) DO UPDATE SET
             push_subscription = excluded.push_subscription,
             updated_at = excluded.updated_at",
        params![user_id, raw, to_millis(now)],
    )?;
    Ok(())
}

pub fn clear_push_subscription(conn: &Connection, user_id: &str, now: DateTime<Utc>) -> Result<()> {
    let changed = conn.execute(
        "UPDATE user_notification_settings
         SET push_subscription = NULL, updated_at = ?2
         WHERE user_id = ?1",
        params![user_id, to_millis(now)],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("settings for user '{user_id}'")));
    }
    Ok(())
}

pub fn push_subscription(conn: &Connection, user_id: &str) -> Result<Option<String>> {
    let raw: Option<Option<String>> = conn
        .query_row(
            "SELECT push_subscription FROM user_notification_settings WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(raw.flatten().filter(|s| !s.trim().is_empty()))
}

/// Partial update of a user's switches; `None` keeps the stored value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    pub daily_reminder_enabled: Option<bool>,
    pub long_inactive_enabled: Option<bool>,
    pub long_inactive_days: Option<u32>,
    pub streak_celebration_enabled: Option<bool>,
}

pub fn notification_settings(conn: &Connection, user_id: &str) -> Result<NotificationSettings> {
    let stored = conn
        .query_row(
            "SELECT daily_reminder_enabled, long_inactive_enabled, long_inactive_days,
                    streak_celebration_enabled
             FROM user_notification_settings WHERE user_id = ?1",
            [user_id],
            |row| {
                Ok(NotificationSettings {
                    daily_reminder_enabled: row.get(0)?,
                    long_inactive_enabled: row.get(1)?,
                    long_inactive_days: row.get(2)?,
                    streak_celebration_enabled: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(stored.unwrap_or_default())
}

/// Apply `update` to the user's switches, creating the row with defaults
/// first if needed, and return the result.
pub fn update_notification_settings(
    conn: &Connection,
    user_id: &str,
    update: &SettingsUpdate,
    now: DateTime<Utc>,
) -> Result<NotificationSettings> {
    if update.long_inactive_days == Some(0) {
        return Err(StoreError::Invalid("long_inactive_days must be at least 1".to_string()));
    }
    ensure_user(conn, user_id, now)?;
    conn.execute(
        "INSERT INTO user_notification_settings (user_id, updated_at) VALUES (?1, ?2)
         ON CONFLICT(user_id) DO NOTHING",
        params![user_id, to_millis(now)],
    )?;
    conn.execute(
        "UPDATE user_notification_settings SET
             daily_reminder_enabled = COALESCE(?2, daily_reminder_enabled),
             long_inactive_enabled = COALESCE(?3, long_inactive_enabled),
             long_inactive_days = COALESCE(?4, long_inactive_days),
             streak_celebration_enabled = COALESCE(?5, streak_celebration_enabled),
             updated_at = ?6
         WHERE user_id = ?1",
        params![
            user_id,
            update.daily_reminder_enabled,
            update.long_inactive_enabled,
            update.long_inactive_days,
            update.streak_celebration_enabled,
            to_millis(now),
        ],
    )?;
    notification_settings(conn, user_id)
}
