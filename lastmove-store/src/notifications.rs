//! Notification queue queries.
//!
//! Open rows are `pending` or `retrying`. A dispatcher takes rows by stamping
//! `claimed_at`; a claim older than [`claim_ttl`] counts as abandoned.

use chrono::{DateTime, Duration, Utc};
use lastmove_core::store::claim_ttl;
use lastmove_core::{
    DeliveryStatus, NewNotification, NotificationKind, NotificationRecord, NotificationStats,
    RecentNotification,
};
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};

use crate::{from_millis, from_millis_opt, parse_column, to_millis, Result, StoreError};

/// Creation window for the counts in [`user_stats`].
pub const STATS_WINDOW_DAYS: i64 = 30;
const RECENT_LIMIT: i64 = 10;

const RECORD_COLUMNS: &str = "id, user_id, activity_id, kind, priority, title, body, data, \
     scheduled_at, sent_at, status, retry_count, error_message, claimed_at, created_at";

const DUE_FILTER: &str = "status IN ('pending', 'retrying')
       AND scheduled_at <= ?1
       AND retry_count < ?2";

const QUEUE_ORDER: &str = "ORDER BY priority_rank DESC, scheduled_at ASC, id ASC";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<NotificationRecord> {
    let data: String = row.get(7)?;
    let data = serde_json::from_str(&data).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(NotificationRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        activity_id: row.get(2)?,
        kind: parse_column(3, row.get(3)?)?,
        priority: parse_column(4, row.get(4)?)?,
        title: row.get(5)?,
        body: row.get(6)?,
        data,
        scheduled_at: from_millis(row.get(8)?)?,
        sent_at: from_millis_opt(row.get(9)?)?,
        status: parse_column(10, row.get(10)?)?,
        retry_count: row.get(11)?,
        error_message: row.get(12)?,
        claimed_at: from_millis_opt(row.get(13)?)?,
        created_at: from_millis(row.get(14)?)?,
    })
}

fn not_found(id: i64) -> StoreError {
    StoreError::NotFound(format!("notification {id}"))
}

pub fn insert(conn: &Connection, n: &NewNotification, now: DateTime<Utc>) -> Result<i64> {
    let data =
        serde_json::to_string(&n.data).map_err(|e| StoreError::Serialization(e.to_string()))?;
    conn.execute(
        "INSERT INTO notifications
             (user_id, activity_id, kind, priority, priority_rank, title, body, data,
              scheduled_at, status, retry_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', 0, ?10)",
        params![
            n.user_id,
            n.activity_id,
            n.kind.as_str(),
            n.priority.as_str(),
            n.priority.rank(),
            n.title,
            n.body,
            data,
            to_millis(n.scheduled_at),
            to_millis(now),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get(conn: &Connection, id: i64) -> Result<NotificationRecord> {
    conn.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM notifications WHERE id = ?1"),
        [id],
        record_from_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => not_found(id),
        other => StoreError::Sqlite(other),
    })
}

pub fn has_open(
    conn: &Connection,
    activity_id: i64,
    kind: NotificationKind,
    since: DateTime<Utc>,
) -> Result<bool> {
    let found: i64 = conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM notifications
             WHERE activity_id = ?1 AND kind = ?2
               AND status IN ('pending', 'retrying')
               AND scheduled_at >= ?3)",
        params![activity_id, kind.as_str(), to_millis(since)],
        |row| row.get(0),
    )?;
    Ok(found != 0)
}

/// Like [`has_open`], but any status counts.
pub fn has_since(
    conn: &Connection,
    activity_id: i64,
    kind: NotificationKind,
    since: DateTime<Utc>,
) -> Result<bool> {
    let found: i64 = conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM notifications
             WHERE activity_id = ?1 AND kind = ?2 AND scheduled_at >= ?3)",
        params![activity_id, kind.as_str(), to_millis(since)],
        |row| row.get(0),
    )?;
    Ok(found != 0)
}

pub fn list_pending(
    conn: &Connection,
    now: DateTime<Utc>,
    limit: usize,
    max_retries: u32,
) -> Result<Vec<NotificationRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM notifications WHERE {DUE_FILTER} {QUEUE_ORDER} LIMIT ?3"
    ))?;
    let rows = stmt.query_map(
        params![to_millis(now), max_retries, limit as i64],
        record_from_row,
    )?;
    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

/// Open rows that are due, across all users.
pub fn count_due(conn: &Connection, now: DateTime<Utc>, max_retries: u32) -> Result<u64> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM notifications WHERE {DUE_FILTER}"),
        params![to_millis(now), max_retries],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// Select due rows and stamp `claimed_at = now` on each, in one immediate
/// transaction. The stamp is conditional on the row still being unclaimed
/// (or holding a stale claim), so a concurrent dispatcher cannot take it too.
pub fn claim_pending(
    conn: &Connection,
    now: DateTime<Utc>,
    limit: usize,
    max_retries: u32,
) -> Result<Vec<NotificationRecord>> {
    let stale = to_millis(now - claim_ttl());
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let candidates: Vec<i64> = {
        let mut stmt = tx.prepare(&format!(
            "SELECT id FROM notifications
             WHERE {DUE_FILTER}
               AND (claimed_at IS NULL OR claimed_at <= ?3)
             {QUEUE_ORDER}
             LIMIT ?4"
        ))?;
        let ids = stmt.query_map(
            params![to_millis(now), max_retries, stale, limit as i64],
            |row| row.get(0),
        )?;
        ids.collect::<rusqlite::Result<_>>()?
    };

    let mut claimed = Vec::with_capacity(candidates.len());
    for id in candidates {
        let changed = tx.execute(
            "UPDATE notifications SET claimed_at = ?1
             WHERE id = ?2
               AND status IN ('pending', 'retrying')
               AND (claimed_at IS NULL OR claimed_at <= ?3)",
            params![to_millis(now), id, stale],
        )?;
        if changed == 1 {
            claimed.push(get(&tx, id)?);
        }
    }

    tx.commit()?;
    Ok(claimed)
}

pub fn release_claim(conn: &Connection, id: i64) -> Result<()> {
    let changed = conn.execute("UPDATE notifications SET claimed_at = NULL WHERE id = ?1", [id])?;
    if changed == 0 {
        return Err(not_found(id));
    }
    Ok(())
}

pub fn mark_sent(conn: &Connection, id: i64, now: DateTime<Utc>) -> Result<()> {
    let changed = conn.execute(
        "UPDATE notifications
         SET status = 'sent', sent_at = ?2, claimed_at = NULL
         WHERE id = ?1",
        params![id, to_millis(now)],
    )?;
    if changed == 0 {
        return Err(not_found(id));
    }
    Ok(())
}

/// Record that the user opened the notification. The first click time is kept.
pub fn mark_clicked(conn: &Connection, id: i64, now: DateTime<Utc>) -> Result<()> {
    let changed = conn.execute(
        "UPDATE notifications
         SET is_clicked = 1, clicked_at = COALESCE(clicked_at, ?2)
         WHERE id = ?1",
        params![id, to_millis(now)],
    )?;
    if changed == 0 {
        return Err(not_found(id));
    }
    Ok(())
}

/// Count a failed attempt and move the row along the retry state machine.
pub fn record_failure(
    conn: &Connection,
    id: i64,
    error: &str,
    max_retries: u32,
) -> Result<DeliveryStatus> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let retry_count: u32 = tx
        .query_row("SELECT retry_count FROM notifications WHERE id = ?1", [id], |row| {
            row.get(0)
        })
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => not_found(id),
            other => StoreError::Sqlite(other),
        })?;

    let retry_count = retry_count + 1;
    let status = DeliveryStatus::after_failure(retry_count, max_retries);
    tx.execute(
        "UPDATE notifications
         SET retry_count = ?2, status = ?3, error_message = ?4, claimed_at = NULL
         WHERE id = ?1",
        params![id, retry_count, status.as_str(), error],
    )?;
    tx.commit()?;
    Ok(status)
}

/// Counts over records created in the last [`STATS_WINDOW_DAYS`] days, plus
/// the user's latest records of any age. `pending` only counts open records
/// that are already due.
pub fn user_stats(conn: &Connection, user_id: &str, now: DateTime<Utc>) -> Result<NotificationStats> {
    let since = to_millis(now - Duration::days(STATS_WINDOW_DAYS));

    let (total, sent, clicked, pending, failed_permanent): (i64, i64, i64, i64, i64) = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(status = 'sent'), 0),
                COALESCE(SUM(is_clicked), 0),
                COALESCE(SUM(status IN ('pending', 'retrying') AND scheduled_at <= ?3), 0),
                COALESCE(SUM(status = 'failed_permanent'), 0)
         FROM notifications
         WHERE user_id = ?1 AND created_at >= ?2",
        params![user_id, since, to_millis(now)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
    )?;

    let mut stmt = conn.prepare(
        "SELECT id, title, body, kind, priority, status, created_at, sent_at, clicked_at
         FROM notifications
         WHERE user_id = ?1
         ORDER BY created_at DESC, id DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![user_id, RECENT_LIMIT], |row| {
        Ok(RecentNotification {
            id: row.get(0)?,
            title: row.get(1)?,
            body: row.get(2)?,
            kind: parse_column(3, row.get(3)?)?,
            priority: parse_column(4, row.get(4)?)?,
            status: parse_column(5, row.get(5)?)?,
            created_at: from_millis(row.get(6)?)?,
            sent_at: from_millis_opt(row.get(7)?)?,
            clicked_at: from_millis_opt(row.get(8)?)?,
        })
    })?;
    let mut recent = Vec::new();
    for row in rows {
        recent.push(row?);
    }

    Ok(NotificationStats {
        total: total as u64,
        sent: sent as u64,
        clicked: clicked as u64,
        pending: pending as u64,
        failed_permanent: failed_permanent as u64,
        recent,
    })
}
