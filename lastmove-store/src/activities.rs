//! Activity and move queries.

use chrono::{DateTime, Utc};
use lastmove_core::{Activity, ActivitySnapshot, Frequency, FrequencyType, FrequencyUnit, Move};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{from_millis, parse_column, to_millis, Result, StoreError};

const ACTIVITY_COLUMNS: &str =
    "id, user_id, title, category, frequency_type, frequency_value, frequency_unit, is_active";

fn activity_from_row(row: &Row<'_>) -> rusqlite::Result<Activity> {
    let kind = match row.get::<_, String>(4)?.as_str() {
        "custom" => FrequencyType::Custom,
        _ => FrequencyType::Preset,
    };
    let unit: FrequencyUnit = parse_column(6, row.get(6)?)?;
    Ok(Activity {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        category: row.get(3)?,
        frequency: Frequency {
            kind,
            value: row.get(5)?,
            unit,
        },
        is_active: row.get(7)?,
    })
}

/// Create an activity for `user_id`, creating the user row on first use.
pub fn create_activity(
    conn: &Connection,
    user_id: &str,
    title: &str,
    category: Option<&str>,
    frequency: Frequency,
    now: DateTime<Utc>,
) -> Result<Activity> {
    if title.trim().is_empty() {
        return Err(StoreError::Invalid("activity title must not be empty".to_string()));
    }
    if frequency.value == 0 {
        return Err(StoreError::Invalid("frequency value must be at least 1".to_string()));
    }
    crate::settings::ensure_user(conn, user_id, now)?;
    conn.execute(
        "INSERT INTO activities
             (user_id, title, category, frequency_type, frequency_value, frequency_unit, is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
        params![
            user_id,
            title.trim(),
            category,
            frequency.kind.as_str(),
            frequency.value,
            frequency.unit.as_str(),
            to_millis(now),
        ],
    )?;
    get_activity(conn, conn.last_insert_rowid())
}

pub fn get_activity(conn: &Connection, id: i64) -> Result<Activity> {
    conn.query_row(
        &format!("SELECT {ACTIVITY_COLUMNS} FROM activities WHERE id = ?1"),
        [id],
        activity_from_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("activity {id}")),
        other => StoreError::Sqlite(other),
    })
}

/// All activities of a user, active first, then by id.
pub fn list_activities(conn: &Connection, user_id: &str) -> Result<Vec<Activity>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ACTIVITY_COLUMNS} FROM activities
         WHERE user_id = ?1
         ORDER BY is_active DESC, id ASC"
    ))?;
    let rows = stmt.query_map([user_id], activity_from_row)?;
    let mut activities = Vec::new();
    for row in rows {
        activities.push(row?);
    }
    Ok(activities)
}

/// Archive an activity. Its history is kept; it just stops being analyzed.
pub fn deactivate_activity(conn: &Connection, id: i64) -> Result<()> {
    let changed = conn.execute("UPDATE activities SET is_active = 0 WHERE id = ?1", [id])?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("activity {id}")));
    }
    Ok(())
}

/// Record one execution of an activity.
pub fn record_move(
    conn: &Connection,
    activity_id: i64,
    executed_at: DateTime<Utc>,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Move> {
    // surfaces NotFound instead of a bare foreign-key failure
    get_activity(conn, activity_id)?;
    conn.execute(
        "INSERT INTO moves (activity_id, executed_at, notes, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![activity_id, to_millis(executed_at), notes, to_millis(now)],
    )?;
    Ok(Move {
        id: conn.last_insert_rowid(),
        activity_id,
        executed_at,
        notes: notes.map(str::to_string),
    })
}

pub fn last_move(conn: &Connection, activity_id: i64) -> Result<Option<Move>> {
    let found = conn
        .query_row(
            "SELECT id, activity_id, executed_at, notes FROM moves
             WHERE activity_id = ?1
             ORDER BY executed_at DESC, id DESC
             LIMIT 1",
            [activity_id],
            |row| {
                Ok(Move {
                    id: row.get(0)?,
                    activity_id: row.get(1)?,
                    executed_at: from_millis(row.get(2)?)?,
                    notes: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(found)
}

/// Execution times of one activity at or after `since`, newest first.
pub fn move_times_since(
    conn: &Connection,
    activity_id: i64,
    since: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>> {
    let mut stmt = conn.prepare(
        "SELECT executed_at FROM moves
         WHERE activity_id = ?1 AND executed_at >= ?2
         ORDER BY executed_at DESC",
    )?;
    let rows = stmt.query_map(params![activity_id, to_millis(since)], |row| from_millis(row.get(0)?))?;
    let mut times = Vec::new();
    for row in rows {
        times.push(row?);
    }
    Ok(times)
}

/// Every active activity across all users joined with its latest move.
///
/// The unit column is passed through raw so unknown values reach the
/// evaluator as anomalies instead of failing the query.
pub fn active_with_last_move(conn: &Connection) -> Result<Vec<ActivitySnapshot>> {
    let mut stmt = conn.prepare(
        "SELECT a.id, a.user_id, a.title, a.frequency_value, a.frequency_unit,
                (SELECT MAX(m.executed_at) FROM moves m WHERE m.activity_id = a.id)
         FROM activities a
         WHERE a.is_active = 1
         ORDER BY a.id ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        let last: Option<i64> = row.get(5)?;
        Ok(ActivitySnapshot {
            activity_id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            frequency_value: row.get(3)?,
            frequency_unit: row.get(4)?,
            last_executed_at: last.map(from_millis).transpose()?,
        })
    })?;
    let mut snapshots = Vec::new();
    for row in rows {
        snapshots.push(row?);
    }
    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn create_and_list() {
        let conn = test_db();
        let weekly = Frequency::preset("weekly").unwrap();
        let a = create_activity(&conn, "alice", "Exercise", Some("health"), weekly, now()).unwrap();
        assert_eq!(a.title, "Exercise");
        assert_eq!(a.category.as_deref(), Some("health"));
        assert_eq!(a.frequency, weekly);
        assert!(a.is_active);

        let custom = Frequency::custom(3, FrequencyUnit::Days).unwrap();
        create_activity(&conn, "alice", "Water plants", None, custom, now()).unwrap();
        create_activity(&conn, "bob", "Call mom", None, Frequency::default(), now()).unwrap();

        let listed = list_activities(&conn, "alice").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1].frequency.kind, FrequencyType::Custom);
        assert_eq!(listed[1].frequency.value, 3);
    }

    #[test]
    fn rejects_blank_title() {
        let conn = test_db();
        let result = create_activity(&conn, "alice", "  ", None, Frequency::default(), now());
        assert!(matches!(result, Err(StoreError::Invalid(_))));
    }

    #[test]
    fn snapshot_carries_latest_move_and_skips_archived() {
        let conn = test_db();
        let weekly = Frequency::preset("weekly").unwrap();
        let a = create_activity(&conn, "alice", "Exercise", None, weekly, now()).unwrap();
        let b = create_activity(&conn, "alice", "Read", None, weekly, now()).unwrap();
        let c = create_activity(&conn, "alice", "Old habit", None, weekly, now()).unwrap();

        let older = now() - Duration::hours(100);
        let newer = now() - Duration::hours(20);
        record_move(&conn, a.id, newer, Some("5k"), now()).unwrap();
        record_move(&conn, a.id, older, None, now()).unwrap();
        deactivate_activity(&conn, c.id).unwrap();

        let snaps = active_with_last_move(&conn).unwrap();
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].activity_id, a.id);
        assert_eq!(snaps[0].last_executed_at, Some(newer));
        assert_eq!(snaps[0].unit(), Some(FrequencyUnit::Weeks));
        assert_eq!(snaps[1].activity_id, b.id);
        assert_eq!(snaps[1].last_executed_at, None);

        assert_eq!(last_move(&conn, a.id).unwrap().map(|m| m.executed_at), Some(newer));
        assert!(last_move(&conn, b.id).unwrap().is_none());

        let recent = move_times_since(&conn, a.id, now() - Duration::hours(50)).unwrap();
        assert_eq!(recent, vec![newer]);
        let all = move_times_since(&conn, a.id, now() - Duration::days(30)).unwrap();
        assert_eq!(all, vec![newer, older]);
    }

    #[test]
    fn unknown_unit_rows_still_come_back() {
        let conn = test_db();
        let a = create_activity(&conn, "alice", "Exercise", None, Frequency::default(), now()).unwrap();
        conn.execute("UPDATE activities SET frequency_unit = 'fortnights' WHERE id = ?1", [a.id])
            .unwrap();
        let snaps = active_with_last_move(&conn).unwrap();
        assert_eq!(snaps[0].frequency_unit, "fortnights");
        assert_eq!(snaps[0].unit(), None);
    }

    #[test]
    fn missing_activity_is_not_found() {
        let conn = test_db();
        assert!(matches!(deactivate_activity(&conn, 42), Err(StoreError::NotFound(_))));
        assert!(matches!(
            record_move(&conn, 42, now(), None, now()),
            Err(StoreError::NotFound(_))
        ));
    }
}
