//! Database schema and migrations for feedmail.
//!
//! Migrations are applied in order when the database is opened.
//! The schema_version table tracks which migrations have been applied.

/// Database migrations.
pub const MIGRATIONS: &[&str] = &[
    // v1: Delivery ledger
    r#"
-- One row per (feed, item) that has been emailed or deliberately skipped
CREATE TABLE IF NOT EXISTS sent_items (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_url    TEXT NOT NULL,
    item_guid   TEXT NOT NULL,
    sent_at     TEXT NOT NULL,           -- UTC, '%Y-%m-%d %H:%M:%S'
    UNIQUE(feed_url, item_guid)
);

CREATE INDEX IF NOT EXISTS idx_sent_items_sent_at ON sent_items(sent_at);
"#,
    // v2: Per-feed polling state (conditional GET validators, error backoff)
    r#"
CREATE TABLE IF NOT EXISTS feed_status (
    feed_url            TEXT PRIMARY KEY,
    etag                TEXT,
    last_modified       TEXT,
    last_checked        TEXT NOT NULL,
    last_status         INTEGER,
    error_count         INTEGER NOT NULL DEFAULT 0,
    next_check_after    TEXT
);
"#,
];
