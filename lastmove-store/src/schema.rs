//! SQL schema definitions.
//!
//! All timestamps are Unix epoch milliseconds.

pub const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS user_notification_settings (
    user_id TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
    daily_reminder_enabled INTEGER NOT NULL DEFAULT 1,
    long_inactive_enabled INTEGER NOT NULL DEFAULT 1,
    long_inactive_days INTEGER NOT NULL DEFAULT 7 CHECK (long_inactive_days >= 1),
    streak_celebration_enabled INTEGER NOT NULL DEFAULT 1,
    push_subscription TEXT,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS activities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    category TEXT,
    frequency_type TEXT NOT NULL DEFAULT 'preset',
    frequency_value INTEGER NOT NULL DEFAULT 1 CHECK (frequency_value >= 1),
    frequency_unit TEXT NOT NULL DEFAULT 'days',
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_activities_active ON activities(is_active, user_id);

CREATE TABLE IF NOT EXISTS moves (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    activity_id INTEGER NOT NULL REFERENCES activities(id) ON DELETE CASCADE,
    executed_at INTEGER NOT NULL,
    notes TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_moves_activity ON moves(activity_id, executed_at);

CREATE TABLE IF NOT EXISTS notifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    activity_id INTEGER REFERENCES activities(id) ON DELETE SET NULL,
    kind TEXT NOT NULL,
    priority TEXT NOT NULL DEFAULT 'normal',
    priority_rank INTEGER NOT NULL DEFAULT 1,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    data TEXT NOT NULL DEFAULT '{}',
    scheduled_at INTEGER NOT NULL,
    sent_at INTEGER,
    status TEXT NOT NULL DEFAULT 'pending',
    retry_count INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    claimed_at INTEGER,
    is_clicked INTEGER NOT NULL DEFAULT 0,
    clicked_at INTEGER,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notifications_due ON notifications(status, scheduled_at);
CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, created_at);
CREATE INDEX IF NOT EXISTS idx_notifications_activity ON notifications(activity_id, kind, status);
"#;
