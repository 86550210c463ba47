//! Delivery ledger: which feed items have already been handled.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::db::{format_datetime, parse_datetime, DbPool};
use crate::Result;

/// A delivered (or deliberately skipped) feed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    /// Record ID.
    pub id: i64,
    /// Feed the item came from.
    pub feed_url: String,
    /// Item identifier within the feed.
    pub item_guid: String,
    /// When the item was recorded, or last seen in its feed.
    pub sent_at: DateTime<Utc>,
}

/// Row type for a sent item from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct SentRecordRow {
    id: i64,
    feed_url: String,
    item_guid: String,
    sent_at: String,
}

impl From<SentRecordRow> for SentRecord {
    fn from(row: SentRecordRow) -> Self {
        SentRecord {
            id: row.id,
            feed_url: row.feed_url,
            item_guid: row.item_guid,
            sent_at: parse_datetime(&row.sent_at).unwrap_or_else(Utc::now),
        }
    }
}

/// Repository over the `sent_items` table.
///
/// `(feed_url, item_guid)` is the only uniqueness key: the same guid under
/// two feed URLs is two independent records. Every operation is a single
/// SQL statement, so callers never observe a partial write.
#[derive(Clone, Copy)]
pub struct DeliveryLedger<'a> {
    pool: &'a DbPool,
}

impl<'a> DeliveryLedger<'a> {
    /// Create a new ledger over the given pool.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// True iff the item has a record.
    pub async fn has_record(&self, feed_url: &str, guid: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sent_items WHERE feed_url = ? AND item_guid = ?)",
        )
        .bind(feed_url)
        .bind(guid)
        .fetch_one(self.pool)
        .await?;

        Ok(exists)
    }

    /// Record the item as delivered now.
    ///
    /// See [`DeliveryLedger::record_at`].
    pub async fn record(&self, feed_url: &str, guid: &str) -> Result<bool> {
        self.record_at(feed_url, guid, Utc::now()).await
    }

    /// Record the item as delivered at `at`.
    ///
    /// Recording an item twice is not an error; the first record wins.
    /// Returns whether a new record was inserted.
    pub async fn record_at(&self, feed_url: &str, guid: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO sent_items (feed_url, item_guid, sent_at) VALUES (?, ?, ?)",
        )
        .bind(feed_url)
        .bind(guid)
        .bind(format_datetime(at))
        .execute(self.pool)
        .await?;

        let inserted = result.rows_affected() > 0;
        if !inserted {
            debug!("Item already recorded: {} from {}", guid, feed_url);
        }
        Ok(inserted)
    }

    /// Mark the item as still present in its feed.
    ///
    /// See [`DeliveryLedger::touch_at`].
    pub async fn touch(&self, feed_url: &str, guid: &str) -> Result<()> {
        self.touch_at(feed_url, guid, Utc::now()).await
    }

    /// Move the item's `sent_at` forward to `at`, inserting the record if it
    /// is missing. A later timestamp is never moved back.
    ///
    /// Items a feed keeps returning are touched on every fetch, so the
    /// retention purge only ever removes items the feed has dropped.
    pub async fn touch_at(&self, feed_url: &str, guid: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO sent_items (feed_url, item_guid, sent_at) VALUES (?, ?, ?)
             ON CONFLICT(feed_url, item_guid)
             DO UPDATE SET sent_at = MAX(sent_at, excluded.sent_at)",
        )
        .bind(feed_url)
        .bind(guid)
        .bind(format_datetime(at))
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Touch every record of a feed. Used when the server answers 304, so the
    /// items are still there but were not listed.
    ///
    /// Returns the number of records moved forward.
    pub async fn touch_feed(&self, feed_url: &str) -> Result<u64> {
        let now = format_datetime(Utc::now());
        let result =
            sqlx::query("UPDATE sent_items SET sent_at = ? WHERE feed_url = ? AND sent_at < ?")
                .bind(now.clone())
                .bind(feed_url)
                .bind(now)
                .execute(self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    /// True iff at least one item of the feed has a record.
    ///
    /// A feed with no records is treated as newly added.
    pub async fn has_any_record_for_feed(&self, feed_url: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM sent_items WHERE feed_url = ?)")
                .bind(feed_url)
                .fetch_one(self.pool)
                .await?;

        Ok(exists)
    }

    /// Get the record for an item.
    pub async fn get(&self, feed_url: &str, guid: &str) -> Result<Option<SentRecord>> {
        let row = sqlx::query_as::<_, SentRecordRow>(
            "SELECT id, feed_url, item_guid, sent_at
             FROM sent_items
             WHERE feed_url = ? AND item_guid = ?",
        )
        .bind(feed_url)
        .bind(guid)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(SentRecord::from))
    }

    /// Total number of records.
    pub async fn count_all(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sent_items")
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }

    /// Number of records for one feed.
    pub async fn count_for_feed(&self, feed_url: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sent_items WHERE feed_url = ?")
            .bind(feed_url)
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }

    /// Delete records older than `days` days. Returns the number deleted.
    pub async fn purge_older_than(&self, days: u32) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        self.purge_before(cutoff).await
    }

    /// Delete records with `sent_at` strictly before `cutoff`.
    pub async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sent_items WHERE sent_at < ?")
            .bind(format_datetime(cutoff))
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
