//! # lastmove-store
//!
//! SQLite persistence for LastMove: users, activities, moves and the
//! notification queue.
//!
//! - WAL mode, foreign keys enforced
//! - All timestamps are Unix epoch milliseconds
//! - Schema version stored in `PRAGMA user_version`

pub mod activities;
pub mod migrations;
pub mod notifications;
pub mod schema;
pub mod settings;

use chrono::{DateTime, Utc};
use lastmove_core::{
    ActivitySnapshot, DeliveryStatus, NewNotification, NotificationKind, NotificationRecord,
    NotificationSettings, NotificationStats, NotificationStore,
};
use rusqlite::Connection;
use std::path::Path;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid value: {0}")]
    Invalid(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Open or create the database at `path` and run pending migrations.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(0, ms))
}

pub(crate) fn from_millis_opt(ms: Option<i64>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

/// Map a text column through `FromStr`, reporting failures as a column
/// conversion error.
pub(crate) fn parse_column<T>(idx: usize, raw: String) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = anyhow::Error>,
{
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::<dyn std::error::Error + Send + Sync>::from(e.to_string()),
        )
    })
}

/// [`NotificationStore`] over a single SQLite connection.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self { conn: open(path)? })
    }

    pub fn open_memory() -> Result<Self> {
        Ok(Self {
            conn: open_memory()?,
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

impl NotificationStore for SqliteStore {
    fn list_active_activities_with_last_move(&self) -> anyhow::Result<Vec<ActivitySnapshot>> {
        Ok(activities::active_with_last_move(&self.conn)?)
    }

    fn insert_notification(&self, notification: &NewNotification) -> anyhow::Result<i64> {
        Ok(notifications::insert(&self.conn, notification, Utc::now())?)
    }

    fn has_open_notification(
        &self,
        activity_id: i64,
        kind: NotificationKind,
        since: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        Ok(notifications::has_open(&self.conn, activity_id, kind, since)?)
    }

    fn has_notification_since(
        &self,
        activity_id: i64,
        kind: NotificationKind,
        since: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        Ok(notifications::has_since(&self.conn, activity_id, kind, since)?)
    }

    fn move_times_since(&self, activity_id: i64, since: DateTime<Utc>) -> anyhow::Result<Vec<DateTime<Utc>>> {
        Ok(activities::move_times_since(&self.conn, activity_id, since)?)
    }

    fn notification_settings(&self, user_id: &str) -> anyhow::Result<NotificationSettings> {
        Ok(settings::notification_settings(&self.conn, user_id)?)
    }

    fn list_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        max_retries: u32,
    ) -> anyhow::Result<Vec<NotificationRecord>> {
        Ok(notifications::list_pending(&self.conn, now, limit, max_retries)?)
    }

    fn claim_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        max_retries: u32,
    ) -> anyhow::Result<Vec<NotificationRecord>> {
        Ok(notifications::claim_pending(&self.conn, now, limit, max_retries)?)
    }

    fn release_claim(&self, id: i64) -> anyhow::Result<()> {
        Ok(notifications::release_claim(&self.conn, id)?)
    }

    fn mark_sent(&self, id: i64, now: DateTime<Utc>) -> anyhow::Result<()> {
        Ok(notifications::mark_sent(&self.conn, id, now)?)
    }

    fn record_failure(
        &self,
        id: i64,
        error: &str,
        max_retries: u32,
    ) -> anyhow::Result<DeliveryStatus> {
        Ok(notifications::record_failure(&self.conn, id, error, max_retries)?)
    }

    fn push_subscription(&self, user_id: &str) -> anyhow::Result<Option<String>> {
        Ok(settings::push_subscription(&self.conn, user_id)?)
    }

    fn user_stats(&self, user_id: &str, now: DateTime<Utc>) -> anyhow::Result<NotificationStats> {
        Ok(notifications::user_stats(&self.conn, user_id, now)?)
    }
}
