//! Feed reconciler for feedmail.
//!
//! One cycle walks the configured feeds in order and decides, per item,
//! whether an email must be sent. All decisions are re-derived from the
//! delivery ledger on every run; the reconciler itself keeps no state.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::feed::{backoff, CacheValidators, FeedFetch, FeedItem, FeedSource, FetchError};
use crate::ledger::{DeliveryLedger, FeedStatusRepository};
use crate::mail::{format_item_email, Mailer};
use crate::Result;

/// Default pause between consecutive emails of one feed.
pub const DEFAULT_SEND_DELAY: Duration = Duration::from_secs(1);

/// Default polling interval, also the base of the error backoff.
pub const DEFAULT_BASE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// HTTP status stored for a fetch that returned a body.
const STATUS_OK: u16 = 200;

/// HTTP status stored for a fetch answered with 304.
const STATUS_NOT_MODIFIED: u16 = 304;

/// Tunables of the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerOptions {
    /// Pause between consecutive send attempts within one feed.
    pub send_delay: Duration,
    /// Base interval for the error backoff.
    pub base_interval: Duration,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            send_delay: DEFAULT_SEND_DELAY,
            base_interval: DEFAULT_BASE_INTERVAL,
        }
    }
}

impl ReconcilerOptions {
    /// Options without pacing, for tests and one-shot runs.
    pub fn without_delay() -> Self {
        Self {
            send_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Counters of one reconcile cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Feeds that were fetched (successfully or not).
    pub feeds_checked: usize,
    /// Feeds not fetched because they are backing off.
    pub feeds_skipped: usize,
    /// Items returned by all fetched feeds.
    pub items_found: usize,
    /// Emails delivered.
    pub emails_sent: usize,
    /// Fetch, send and ledger failures.
    pub errors: usize,
    /// Ledger size at the end of the cycle.
    pub total_recorded: i64,
}

/// Drives fetch, decision, delivery and ledger updates for a list of feeds.
pub struct FeedReconciler<S, M> {
    db: Arc<Database>,
    source: S,
    mailer: M,
    options: ReconcilerOptions,
}

impl<S: FeedSource, M: Mailer> FeedReconciler<S, M> {
    /// Create a new reconciler.
    pub fn new(db: Arc<Database>, source: S, mailer: M, options: ReconcilerOptions) -> Self {
        Self {
            db,
            source,
            mailer,
            options,
        }
    }

    /// Database the reconciler records into.
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// The feed source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The mailer.
    pub fn mailer(&self) -> &M {
        &self.mailer
    }

    /// Run one cycle over `feeds`, in order.
    ///
    /// Failures of one feed or item are logged and counted; they never stop
    /// the cycle.
    pub async fn run_cycle(&self, feeds: &[String]) -> CycleStats {
        self.run_cycle_until(feeds, &CancellationToken::new()).await
    }

    /// Like [`FeedReconciler::run_cycle`], but stops early once `cancel`
    /// fires.
    ///
    /// Cancellation is checked before each feed and before each send, so an
    /// item is never left sent but unrecorded. Items not reached stay
    /// unrecorded and are picked up by the next cycle.
    pub async fn run_cycle_until(
        &self,
        feeds: &[String],
        cancel: &CancellationToken,
    ) -> CycleStats {
        let mut stats = CycleStats::default();

        for url in feeds {
            if cancel.is_cancelled() {
                info!("Cycle cancelled before {}", url);
                break;
            }
            if let Err(e) = self.reconcile_feed(url, cancel, &mut stats).await {
                error!("Failed to process feed {}: {}", url, e);
                stats.errors += 1;
            }
        }

        stats.total_recorded = match DeliveryLedger::new(self.db.pool()).count_all().await {
            Ok(count) => count,
            Err(e) => {
                error!("Failed to count sent items: {}", e);
                0
            }
        };

        info!(
            "Cycle complete: {} feed(s) checked, {} skipped, {} item(s) found, {} email(s) sent, {} error(s), {} item(s) tracked",
            stats.feeds_checked,
            stats.feeds_skipped,
            stats.items_found,
            stats.emails_sent,
            stats.errors,
            stats.total_recorded
        );

        stats
    }

    /// Process a single feed.
    async fn reconcile_feed(
        &self,
        url: &str,
        cancel: &CancellationToken,
        stats: &mut CycleStats,
    ) -> Result<()> {
        let statuses = FeedStatusRepository::new(self.db.pool());
        let now = Utc::now();

        let status = match statuses.get(url).await {
            Ok(status) => status,
            Err(e) => {
                warn!("Failed to read status of feed {}: {}", url, e);
                None
            }
        };

        if let Some(status) = &status {
            if status.is_backing_off(now) {
                debug!(
                    "Skipping feed {} until {:?} ({} consecutive error(s))",
                    url, status.next_check_after, status.error_count
                );
                stats.feeds_skipped += 1;
                return Ok(());
            }
        }

        let previous = status.as_ref().map(|s| s.validators.clone()).unwrap_or_default();
        let error_count = status.as_ref().map_or(0, |s| s.error_count);

        stats.feeds_checked += 1;
        debug!("Checking feed: {}", url);

        let feed = match self.source.fetch(url, &previous).await {
            Ok(FeedFetch::Fetched(feed)) => feed,
            Ok(FeedFetch::NotModified) => {
                debug!("Feed not modified: {}", url);
                // Everything recorded for the feed is still being served
                if let Err(e) = DeliveryLedger::new(self.db.pool()).touch_feed(url).await {
                    warn!("Failed to refresh sent items of {}: {}", url, e);
                }
                self.store_success(url, &previous, STATUS_NOT_MODIFIED).await;
                return Ok(());
            }
            Err(e) => {
                stats.errors += 1;
                self.store_failure(url, &e, error_count + 1).await;
                return Ok(());
            }
        };

        stats.items_found += feed.items.len();

        if feed.items.is_empty() {
            debug!("Feed has no items: {}", url);
            self.store_success(url, &feed.validators, STATUS_OK).await;
            return Ok(());
        }

        let ledger = DeliveryLedger::new(self.db.pool());
        let is_new_feed = !ledger.has_any_record_for_feed(url).await?;

        let errors_before = stats.errors;
        let finished = if is_new_feed {
            self.reconcile_new_feed(&ledger, url, &feed.title, &feed.items, stats)
                .await;
            true
        } else {
            self.reconcile_known_feed(&ledger, url, &feed.title, &feed.items, cancel, stats)
                .await
        };

        // After a failure or an interrupted batch the next fetch must return
        // the full feed again
        if finished && stats.errors == errors_before {
            self.store_success(url, &feed.validators, STATUS_OK).await;
        } else {
            self.store_success(url, &CacheValidators::default(), STATUS_OK)
                .await;
        }

        Ok(())
    }

    /// First time a feed is seen: email only its most recent item and mark
    /// everything else as already sent.
    async fn reconcile_new_feed(
        &self,
        ledger: &DeliveryLedger<'_>,
        url: &str,
        feed_title: &str,
        items: &[FeedItem],
        stats: &mut CycleStats,
    ) {
        let Some(newest) = select_most_recent(items) else {
            return;
        };
        let chosen = &items[newest];

        info!(
            "New feed detected: {} ({} item(s)), sending most recent: {}",
            feed_title,
            items.len(),
            chosen.title
        );

        self.deliver(ledger, url, feed_title, chosen, stats).await;

        let mut backfilled = 0;
        for (index, item) in items.iter().enumerate() {
            // The chosen guid stays unrecorded if its send failed
            if index == newest || item.guid == chosen.guid {
                continue;
            }
            match ledger.record(url, &item.guid).await {
                Ok(true) => backfilled += 1,
                Ok(false) => {}
                Err(e) => {
                    error!("Failed to mark item {} of {} as sent: {}", item.guid, url, e);
                    stats.errors += 1;
                }
            }
        }

        if backfilled > 0 {
            info!("Marked {} older item(s) of {} as sent", backfilled, feed_title);
        }
    }

    /// Known feed: email every item without a ledger record, in feed order.
    ///
    /// Items that already have a record are touched so the retention purge
    /// keeps them while the feed still lists them. Returns false if `cancel`
    /// stopped the batch early.
    async fn reconcile_known_feed(
        &self,
        ledger: &DeliveryLedger<'_>,
        url: &str,
        feed_title: &str,
        items: &[FeedItem],
        cancel: &CancellationToken,
        stats: &mut CycleStats,
    ) -> bool {
        let mut seen = HashSet::new();
        let mut attempted = false;

        for item in items {
            if !seen.insert(item.guid.as_str()) {
                debug!("Duplicate item {} in {}", item.guid, url);
                continue;
            }

            match ledger.has_record(url, &item.guid).await {
                Ok(true) => {
                    if let Err(e) = ledger.touch(url, &item.guid).await {
                        warn!("Failed to refresh item {} of {}: {}", item.guid, url, e);
                    }
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    error!("Failed to look up item {} of {}: {}", item.guid, url, e);
                    stats.errors += 1;
                    continue;
                }
            }

            if attempted && !self.options.send_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.options.send_delay) => {}
                    _ = cancel.cancelled() => {}
                }
            }
            if cancel.is_cancelled() {
                info!("Stopping {} before item {}", url, item.guid);
                return false;
            }
            attempted = true;

            info!("New item found: {}", item.title);
            self.deliver(ledger, url, feed_title, item, stats).await;
        }

        true
    }

    /// Email one item and record it on success.
    async fn deliver(
        &self,
        ledger: &DeliveryLedger<'_>,
        url: &str,
        feed_title: &str,
        item: &FeedItem,
        stats: &mut CycleStats,
    ) {
        let mail = format_item_email(feed_title, item);

        if let Err(e) = self.mailer.send(&mail).await {
            error!("Failed to send email for {}: {}", item.title, e);
            stats.errors += 1;
            return;
        }
        stats.emails_sent += 1;

        if let Err(e) = ledger.record(url, &item.guid).await {
            // Sent but unrecorded: it will be sent again next cycle
            error!("Failed to record sent item {} of {}: {}", item.guid, url, e);
            stats.errors += 1;
        }
    }

    async fn store_success(&self, url: &str, validators: &CacheValidators, status: u16) {
        let statuses = FeedStatusRepository::new(self.db.pool());
        if let Err(e) = statuses.record_success(url, validators, status).await {
            warn!("Failed to update status of feed {}: {}", url, e);
        }
    }

    async fn store_failure(&self, url: &str, err: &FetchError, error_count: u32) {
        let base = chrono::Duration::from_std(self.options.base_interval)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let next = backoff::next_check_after(
            Utc::now(),
            base,
            err.status(),
            err.retry_after(),
            error_count,
        );

        warn!(
            "Failed to fetch feed {}: {} (error {} in a row, next attempt after {})",
            url,
            err,
            error_count,
            next.format("%Y-%m-%d %H:%M:%S")
        );

        let statuses = FeedStatusRepository::new(self.db.pool());
        if let Err(e) = statuses
            .record_failure(url, err.status(), error_count, next)
            .await
        {
            warn!("Failed to update status of feed {}: {}", url, e);
        }
    }
}

/// Index of the most recent item.
///
/// The maximum `published_at` among dated items wins, the earliest in feed
/// order on ties. With no dated item, the first item is chosen. `None` only
/// for an empty slice.
pub fn select_most_recent(items: &[FeedItem]) -> Option<usize> {
    if items.is_empty() {
        return None;
    }

    let mut best: Option<(usize, chrono::DateTime<Utc>)> = None;
    for (index, item) in items.iter().enumerate() {
        if let Some(at) = item.published_at {
            match best {
                Some((_, best_at)) if at <= best_at => {}
                _ => best = Some((index, at)),
            }
        }
    }

    Some(best.map_or(0, |(index, _)| index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeMailer, FakeSource};
    use chrono::{Duration as ChronoDuration, TimeZone};

    const FEED_A: &str = "https://a.example.com/feed.xml";
    const FEED_B: &str = "https://b.example.com/rss";

    fn at(day: u32, hour: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    fn item(guid: &str) -> FeedItem {
        FeedItem::new(guid, format!("Post {}", guid))
    }

    fn dated(guid: &str, day: u32) -> FeedItem {
        item(guid).with_published_at(at(day, 12))
    }

    async fn reconciler() -> FeedReconciler<FakeSource, FakeMailer> {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        FeedReconciler::new(
            db,
            FakeSource::default(),
            FakeMailer::default(),
            ReconcilerOptions::without_delay(),
        )
    }

    fn feeds(urls: &[&str]) -> Vec<String> {
        urls.iter().map(|u| u.to_string()).collect()
    }

    async fn recorded(r: &FeedReconciler<FakeSource, FakeMailer>, url: &str, guid: &str) -> bool {
        DeliveryLedger::new(r.database().pool())
            .has_record(url, guid)
            .await
            .unwrap()
    }

    // select_most_recent

    #[test]
    fn test_select_most_recent_empty() {
        assert_eq!(select_most_recent(&[]), None);
    }

    #[test]
    fn test_select_most_recent_by_date() {
        let items = vec![dated("a", 1), dated("b", 3), dated("c", 2)];
        assert_eq!(select_most_recent(&items), Some(1));
    }

    #[test]
    fn test_select_most_recent_tie_prefers_first() {
        let items = vec![dated("a", 1), dated("b", 3), dated("c", 3)];
        assert_eq!(select_most_recent(&items), Some(1));
    }

    #[test]
    fn test_select_most_recent_without_dates() {
        let items = vec![item("a"), item("b"), item("c")];
        assert_eq!(select_most_recent(&items), Some(0));
    }

    #[test]
    fn test_select_most_recent_ignores_undated() {
        let items = vec![item("a"), dated("b", 2), item("c")];
        assert_eq!(select_most_recent(&items), Some(1));
    }

    // New feed

    #[tokio::test]
    async fn test_new_feed_sends_only_newest() {
        let r = reconciler().await;
        r.source()
            .serve(FEED_A, vec![dated("a", 1), dated("b", 5), dated("c", 3)]);

        let stats = r.run_cycle(&feeds(&[FEED_A])).await;

        assert_eq!(r.mailer().subjects(), vec![format!("[RSS] Feed {}: Post b", FEED_A)]);
        assert_eq!(stats.feeds_checked, 1);
        assert_eq!(stats.items_found, 3);
        assert_eq!(stats.emails_sent, 1);
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.total_recorded, 3);
        for guid in ["a", "b", "c"] {
            assert!(recorded(&r, FEED_A, guid).await);
        }
    }

    #[tokio::test]
    async fn test_new_feed_without_dates_sends_first() {
        let r = reconciler().await;
        r.source().serve(FEED_A, vec![item("x"), item("y")]);

        r.run_cycle(&feeds(&[FEED_A])).await;

        let subjects = r.mailer().subjects();
        assert_eq!(subjects.len(), 1);
        assert!(subjects[0].ends_with("Post x"));
    }

    #[tokio::test]
    async fn test_new_feed_tie_is_deterministic() {
        let r = reconciler().await;
        r.source()
            .serve(FEED_A, vec![dated("first", 4), dated("second", 4)]);

        r.run_cycle(&feeds(&[FEED_A])).await;

        let subjects = r.mailer().subjects();
        assert_eq!(subjects.len(), 1);
        assert!(subjects[0].ends_with("Post first"));
    }

    #[tokio::test]
    async fn test_new_feed_send_failure_is_retried() {
        let r = reconciler().await;
        r.source()
            .serve(FEED_A, vec![dated("old", 1), dated("new", 2)]);
        r.mailer().fail_when_subject_contains(Some("Post new"));

        let stats = r.run_cycle(&feeds(&[FEED_A])).await;
        assert_eq!(stats.emails_sent, 0);
        assert_eq!(stats.errors, 1);
        assert!(!recorded(&r, FEED_A, "new").await);
        assert!(recorded(&r, FEED_A, "old").await);

        // The feed is now known, so the unsent item is picked up normally
        r.mailer().fail_when_subject_contains(None);
        let stats = r.run_cycle(&feeds(&[FEED_A])).await;
        assert_eq!(stats.emails_sent, 1);
        assert_eq!(stats.errors, 0);
        assert!(recorded(&r, FEED_A, "new").await);
        assert_eq!(r.mailer().subjects().len(), 1);
    }

    #[tokio::test]
    async fn test_new_feed_duplicate_of_chosen_not_backfilled() {
        let r = reconciler().await;
        r.source()
            .serve(FEED_A, vec![dated("dup", 3), dated("other", 1), dated("dup", 2)]);
        r.mailer().fail_when_subject_contains(Some("Post dup"));

        r.run_cycle(&feeds(&[FEED_A])).await;

        assert!(!recorded(&r, FEED_A, "dup").await);
        assert!(recorded(&r, FEED_A, "other").await);
    }

    // Known feed

    #[tokio::test]
    async fn test_second_cycle_without_changes_sends_nothing() {
        let r = reconciler().await;
        r.source().serve(FEED_A, vec![dated("a", 1), dated("b", 2)]);

        r.run_cycle(&feeds(&[FEED_A])).await;
        let stats = r.run_cycle(&feeds(&[FEED_A])).await;

        assert_eq!(stats.emails_sent, 0);
        assert_eq!(stats.items_found, 2);
        assert_eq!(r.mailer().subjects().len(), 1);
    }

    #[tokio::test]
    async fn test_known_feed_sends_new_items_in_feed_order() {
        let r = reconciler().await;
        r.source().serve(FEED_A, vec![dated("a", 1)]);
        r.run_cycle(&feeds(&[FEED_A])).await;

        r.source().serve(
            FEED_A,
            vec![dated("c", 3), dated("b", 2), dated("a", 1)],
        );
        let stats = r.run_cycle(&feeds(&[FEED_A])).await;

        assert_eq!(stats.emails_sent, 2);
        let subjects = r.mailer().subjects();
        assert!(subjects[1].ends_with("Post c"));
        assert!(subjects[2].ends_with("Post b"));
        assert!(recorded(&r, FEED_A, "b").await);
        assert!(recorded(&r, FEED_A, "c").await);
    }

    #[tokio::test]
    async fn test_known_feed_send_failure_not_recorded() {
        let r = reconciler().await;
        r.source().serve(FEED_A, vec![item("a")]);
        r.run_cycle(&feeds(&[FEED_A])).await;

        r.source()
            .serve(FEED_A, vec![item("broken"), item("fine"), item("a")]);
        r.mailer().fail_when_subject_contains(Some("broken"));
        let stats = r.run_cycle(&feeds(&[FEED_A])).await;

        assert_eq!(stats.emails_sent, 1);
        assert_eq!(stats.errors, 1);
        assert!(!recorded(&r, FEED_A, "broken").await);
        assert!(recorded(&r, FEED_A, "fine").await);

        r.mailer().fail_when_subject_contains(None);
        let stats = r.run_cycle(&feeds(&[FEED_A])).await;
        assert_eq!(stats.emails_sent, 1);
        assert!(recorded(&r, FEED_A, "broken").await);
    }

    #[tokio::test]
    async fn test_duplicate_guid_in_one_fetch_sent_once() {
        let r = reconciler().await;
        r.source().serve(FEED_A, vec![item("a")]);
        r.run_cycle(&feeds(&[FEED_A])).await;

        r.source()
            .serve(FEED_A, vec![item("n"), item("n"), item("a")]);
        let stats = r.run_cycle(&feeds(&[FEED_A])).await;

        assert_eq!(stats.emails_sent, 1);
        assert_eq!(r.mailer().subjects().len(), 2);
    }

    #[tokio::test]
    async fn test_same_guid_on_two_feeds_is_independent() {
        let r = reconciler().await;
        r.source().serve(FEED_A, vec![item("shared")]);
        r.source().serve(FEED_B, vec![item("shared")]);

        let stats = r.run_cycle(&feeds(&[FEED_A, FEED_B])).await;

        assert_eq!(stats.emails_sent, 2);
        assert_eq!(stats.total_recorded, 2);
    }

    // Failures and empty feeds

    #[tokio::test]
    async fn test_fetch_failure_is_isolated() {
        let r = reconciler().await;
        r.source().fail(
            FEED_A,
            FetchError::Status {
                status: 500,
                retry_after: None,
            },
        );
        r.source().serve(FEED_B, vec![item("b1")]);

        let stats = r.run_cycle(&feeds(&[FEED_A, FEED_B])).await;

        assert_eq!(stats.feeds_checked, 2);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.emails_sent, 1);
        let ledger = DeliveryLedger::new(r.database().pool());
        assert!(!ledger.has_any_record_for_feed(FEED_A).await.unwrap());
        assert!(ledger.has_any_record_for_feed(FEED_B).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_feed_is_noop() {
        let r = reconciler().await;
        r.source().serve(FEED_A, vec![]);

        let stats = r.run_cycle(&feeds(&[FEED_A])).await;

        assert_eq!(stats.feeds_checked, 1);
        assert_eq!(stats.items_found, 0);
        assert_eq!(stats.emails_sent, 0);
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.total_recorded, 0);

        // Still new once items appear
        r.source().serve(FEED_A, vec![dated("a", 1), dated("b", 2)]);
        let stats = r.run_cycle(&feeds(&[FEED_A])).await;
        assert_eq!(stats.emails_sent, 1);
    }

    #[tokio::test]
    async fn test_empty_feed_list() {
        let r = reconciler().await;
        let stats = r.run_cycle(&[]).await;
        assert_eq!(stats, CycleStats::default());
    }

    // Feed status

    #[tokio::test]
    async fn test_fetch_failure_backs_off() {
        let r = reconciler().await;
        r.source().fail(
            FEED_A,
            FetchError::Status {
                status: 503,
                retry_after: Some("3600".to_string()),
            },
        );

        r.run_cycle(&feeds(&[FEED_A])).await;
        let status = FeedStatusRepository::new(r.database().pool())
            .get(FEED_A)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.error_count, 1);
        assert_eq!(status.last_status, Some(503));
        let wait = status.next_check_after.unwrap() - Utc::now();
        assert!(wait > ChronoDuration::minutes(55));

        // Parked feeds are not fetched
        r.source().serve(FEED_A, vec![item("a")]);
        let stats = r.run_cycle(&feeds(&[FEED_A])).await;
        assert_eq!(stats.feeds_checked, 0);
        assert_eq!(stats.feeds_skipped, 1);
        assert_eq!(stats.errors, 0);
        assert_eq!(r.source().requests().len(), 1);
    }

    #[tokio::test]
    async fn test_validators_are_sent_back() {
        let r = reconciler().await;
        let validators = CacheValidators {
            etag: Some("\"v1\"".to_string()),
            last_modified: None,
        };
        r.source()
            .serve_with_validators(FEED_A, vec![item("a")], validators.clone());

        r.run_cycle(&feeds(&[FEED_A])).await;
        r.source().not_modified(FEED_A);
        let stats = r.run_cycle(&feeds(&[FEED_A])).await;

        let requests = r.source().requests();
        assert!(requests[0].1.is_empty());
        assert_eq!(requests[1].1, validators);
        assert_eq!(stats.feeds_checked, 1);
        assert_eq!(stats.items_found, 0);

        // 304 keeps the stored validators
        r.run_cycle(&feeds(&[FEED_A])).await;
        assert_eq!(r.source().requests()[2].1, validators);
    }

    #[tokio::test]
    async fn test_failed_send_drops_validators() {
        let r = reconciler().await;
        r.source().serve(FEED_A, vec![item("a")]);
        r.run_cycle(&feeds(&[FEED_A])).await;

        r.source().serve_with_validators(
            FEED_A,
            vec![item("b"), item("a")],
            CacheValidators {
                etag: Some("\"v2\"".to_string()),
                last_modified: None,
            },
        );
        r.mailer().fail_when_subject_contains(Some("Post b"));
        r.run_cycle(&feeds(&[FEED_A])).await;

        let status = FeedStatusRepository::new(r.database().pool())
            .get(FEED_A)
            .await
            .unwrap()
            .unwrap();
        assert!(status.validators.is_empty());
    }

    // Retention

    #[tokio::test]
    async fn test_purge_does_not_resend_items_still_served() {
        let r = reconciler().await;
        let ledger = DeliveryLedger::new(r.database().pool());
        let long_ago = Utc::now() - ChronoDuration::days(100);
        ledger.record_at(FEED_A, "a", long_ago).await.unwrap();
        ledger.record_at(FEED_A, "b", long_ago).await.unwrap();
        r.source().serve(FEED_A, vec![dated("a", 1), dated("b", 2)]);

        // A quiet feed keeps its records alive by still listing the items
        let stats = r.run_cycle(&feeds(&[FEED_A])).await;
        assert_eq!(stats.emails_sent, 0);

        assert_eq!(ledger.purge_older_than(90).await.unwrap(), 0);
        let stats = r.run_cycle(&feeds(&[FEED_A])).await;

        assert_eq!(stats.emails_sent, 0);
        assert!(r.mailer().subjects().is_empty());
        assert_eq!(stats.total_recorded, 2);
    }

    #[tokio::test]
    async fn test_purge_drops_items_no_longer_served() {
        let r = reconciler().await;
        let ledger = DeliveryLedger::new(r.database().pool());
        let long_ago = Utc::now() - ChronoDuration::days(100);
        ledger.record_at(FEED_A, "gone", long_ago).await.unwrap();
        ledger.record_at(FEED_A, "kept", long_ago).await.unwrap();
        r.source().serve(FEED_A, vec![item("kept")]);

        r.run_cycle(&feeds(&[FEED_A])).await;

        assert_eq!(ledger.purge_older_than(90).await.unwrap(), 1);
        assert!(!recorded(&r, FEED_A, "gone").await);
        assert!(recorded(&r, FEED_A, "kept").await);
    }

    #[tokio::test]
    async fn test_not_modified_keeps_records_alive() {
        let r = reconciler().await;
        let ledger = DeliveryLedger::new(r.database().pool());
        ledger
            .record_at(FEED_A, "a", Utc::now() - ChronoDuration::days(100))
            .await
            .unwrap();
        r.source().not_modified(FEED_A);

        r.run_cycle(&feeds(&[FEED_A])).await;

        assert_eq!(ledger.purge_older_than(90).await.unwrap(), 0);
        assert!(recorded(&r, FEED_A, "a").await);
    }

    // Cancellation

    #[tokio::test]
    async fn test_cancelled_cycle_fetches_nothing() {
        let r = reconciler().await;
        r.source().serve(FEED_A, vec![item("a")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stats = r.run_cycle_until(&feeds(&[FEED_A, FEED_B]), &cancel).await;

        assert_eq!(stats.feeds_checked, 0);
        assert!(r.source().requests().is_empty());
        assert!(r.mailer().subjects().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_at_next_item() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let r = FeedReconciler::new(
            db,
            FakeSource::default(),
            FakeMailer::default(),
            ReconcilerOptions {
                send_delay: Duration::from_secs(30),
                ..ReconcilerOptions::default()
            },
        );
        r.source().serve(FEED_A, vec![item("a")]);
        r.run_cycle(&feeds(&[FEED_A])).await;

        r.source().serve_with_validators(
            FEED_A,
            vec![item("b"), item("c"), item("d"), item("a")],
            CacheValidators {
                etag: Some("\"v2\"".to_string()),
                last_modified: None,
            },
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let stats = r.run_cycle_until(&feeds(&[FEED_A]), &cancel).await;

        // The pacing pause is cut short and nothing after it is sent
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(stats.emails_sent, 1);
        assert!(recorded(&r, FEED_A, "b").await);
        assert!(!recorded(&r, FEED_A, "c").await);
        assert!(!recorded(&r, FEED_A, "d").await);

        let status = FeedStatusRepository::new(r.database().pool())
            .get(FEED_A)
            .await
            .unwrap()
            .unwrap();
        assert!(status.validators.is_empty());
    }

    #[tokio::test]
    async fn test_send_delay_paces_sends() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let r = FeedReconciler::new(
            db,
            FakeSource::default(),
            FakeMailer::default(),
            ReconcilerOptions {
                send_delay: Duration::from_millis(50),
                ..ReconcilerOptions::default()
            },
        );
        r.source().serve(FEED_A, vec![item("a")]);
        r.run_cycle(&feeds(&[FEED_A])).await;

        r.source()
            .serve(FEED_A, vec![item("b"), item("c"), item("d"), item("a")]);
        let started = std::time::Instant::now();
        let stats = r.run_cycle(&feeds(&[FEED_A])).await;

        assert_eq!(stats.emails_sent, 3);
        assert!(started.elapsed() >= Duration::from_millis(100));
    }
}
