//! Per-feed polling state: cache validators and error backoff.
//!
//! Kept apart from the delivery ledger; nothing here decides whether an item
//! is emailed.

use chrono::{DateTime, Utc};

use crate::db::{format_datetime, parse_datetime, DbPool};
use crate::feed::CacheValidators;
use crate::Result;

/// Polling state of one feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedStatus {
    /// Feed URL.
    pub feed_url: String,
    /// Validators from the last successful fetch.
    pub validators: CacheValidators,
    /// When the feed was last polled.
    pub last_checked: DateTime<Utc>,
    /// HTTP status of the last poll, when the server answered.
    pub last_status: Option<u16>,
    /// Consecutive failed polls.
    pub error_count: u32,
    /// The feed is not polled before this instant.
    pub next_check_after: Option<DateTime<Utc>>,
}

impl FeedStatus {
    /// True when the feed is parked until a later time.
    pub fn is_backing_off(&self, now: DateTime<Utc>) -> bool {
        self.next_check_after.is_some_and(|next| next > now)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct FeedStatusRow {
    feed_url: String,
    etag: Option<String>,
    last_modified: Option<String>,
    last_checked: String,
    last_status: Option<i64>,
    error_count: i64,
    next_check_after: Option<String>,
}

impl From<FeedStatusRow> for FeedStatus {
    fn from(row: FeedStatusRow) -> Self {
        FeedStatus {
            feed_url: row.feed_url,
            validators: CacheValidators {
                etag: row.etag,
                last_modified: row.last_modified,
            },
            last_checked: parse_datetime(&row.last_checked).unwrap_or_else(Utc::now),
            last_status: row.last_status.and_then(|s| u16::try_from(s).ok()),
            error_count: u32::try_from(row.error_count).unwrap_or(0),
            next_check_after: row.next_check_after.and_then(|s| parse_datetime(&s)),
        }
    }
}

/// Repository over the `feed_status` table.
#[derive(Clone, Copy)]
pub struct FeedStatusRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> FeedStatusRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Get the status of a feed.
    pub async fn get(&self, feed_url: &str) -> Result<Option<FeedStatus>> {
        let row = sqlx::query_as::<_, FeedStatusRow>(
            "SELECT feed_url, etag, last_modified, last_checked, last_status,
                    error_count, next_check_after
             FROM feed_status
             WHERE feed_url = ?",
        )
        .bind(feed_url)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(FeedStatus::from))
    }

    /// Record a successful poll.
    ///
    /// Replaces the validators, resets the error count and clears any backoff.
    pub async fn record_success(
        &self,
        feed_url: &str,
        validators: &CacheValidators,
        status: u16,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO feed_status
                (feed_url, etag, last_modified, last_checked, last_status, error_count, next_check_after)
             VALUES (?, ?, ?, ?, ?, 0, NULL)
             ON CONFLICT(feed_url) DO UPDATE SET
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                last_checked = excluded.last_checked,
                last_status = excluded.last_status,
                error_count = 0,
                next_check_after = NULL",
        )
        .bind(feed_url)
        .bind(&validators.etag)
        .bind(&validators.last_modified)
        .bind(format_datetime(Utc::now()))
        .bind(i64::from(status))
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Record a failed poll.
    ///
    /// Stored validators are kept so the next attempt can still be conditional.
    pub async fn record_failure(
        &self,
        feed_url: &str,
        status: Option<u16>,
        error_count: u32,
        next_check_after: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO feed_status
                (feed_url, etag, last_modified, last_checked, last_status, error_count, next_check_after)
             VALUES (?, NULL, NULL, ?, ?, ?, ?)
             ON CONFLICT(feed_url) DO UPDATE SET
                last_checked = excluded.last_checked,
                last_status = excluded.last_status,
                error_count = excluded.error_count,
                next_check_after = excluded.next_check_after",
        )
        .bind(feed_url)
        .bind(format_datetime(Utc::now()))
        .bind(status.map(i64::from))
        .bind(i64::from(error_count))
        .bind(format_datetime(next_check_after))
        .execute(self.pool)
        .await?;

        Ok(())
    }
}
