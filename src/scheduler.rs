//! Periodic scheduler for feedmail.
//!
//! Runs the reconciler once at startup and then on a fixed interval, with an
//! hourly heartbeat and a daily retention purge, until shutdown is requested.
//! A shutdown during a cycle stops it at the next item.

use std::future::Future;
use std::pin::Pin;

use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::feed::FeedSource;
use crate::ledger::DeliveryLedger;
use crate::mail::Mailer;
use crate::reconciler::{CycleStats, FeedReconciler};

/// Interval between heartbeat log lines (1 hour).
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Interval between retention purges (1 day).
pub const PURGE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Feed check scheduler.
pub struct Scheduler<S, M> {
    reconciler: FeedReconciler<S, M>,
    feeds: Vec<String>,
    check_interval: Duration,
    retention_days: u32,
}

impl<S: FeedSource, M: Mailer> Scheduler<S, M> {
    /// Create a scheduler checking `feeds` every `check_interval`.
    ///
    /// Retention purging is off until [`Scheduler::with_retention_days`].
    pub fn new(reconciler: FeedReconciler<S, M>, feeds: Vec<String>, check_interval: Duration) -> Self {
        Self {
            reconciler,
            feeds,
            check_interval,
            retention_days: 0,
        }
    }

    /// Purge ledger records older than `days` days; 0 disables purging.
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    /// The wrapped reconciler.
    pub fn reconciler(&self) -> &FeedReconciler<S, M> {
        &self.reconciler
    }

    /// Run a single cycle, then purge.
    ///
    /// The cycle comes first so that items still listed by their feeds are
    /// touched before the purge looks at their age.
    pub async fn run_once(&self) -> CycleStats {
        let stats = self.reconciler.run_cycle(&self.feeds).await;
        self.purge().await;
        stats
    }

    /// Run until `shutdown` completes.
    ///
    /// The first cycle starts immediately. Later cycles are never run
    /// concurrently; a cycle that overruns delays the next tick.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            "Scheduler started ({} feed(s), check interval: {} seconds)",
            self.feeds.len(),
            self.check_interval.as_secs()
        );

        tokio::pin!(shutdown);

        if self.cycle_or_shutdown(&mut shutdown).await {
            return;
        }
        self.purge().await;

        let start = Instant::now();
        let mut cycle_timer = interval_at(start + self.check_interval, self.check_interval);
        cycle_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat_timer = interval_at(start + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
        heartbeat_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut purge_timer = interval_at(start + PURGE_INTERVAL, PURGE_INTERVAL);
        purge_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping scheduler");
                    break;
                }
                _ = cycle_timer.tick() => {
                    if self.cycle_or_shutdown(&mut shutdown).await {
                        break;
                    }
                }
                _ = heartbeat_timer.tick() => {
                    self.heartbeat().await;
                }
                _ = purge_timer.tick() => {
                    self.purge().await;
                }
            }
        }
    }

    /// Run one cycle. Returns true if `shutdown` fired while it ran; the
    /// cycle is then cancelled and awaited up to its next safe point.
    async fn cycle_or_shutdown<F>(&self, shutdown: &mut Pin<&mut F>) -> bool
    where
        F: Future<Output = ()>,
    {
        let cancel = CancellationToken::new();
        let cycle = self.reconciler.run_cycle_until(&self.feeds, &cancel);
        tokio::pin!(cycle);

        tokio::select! {
            _ = &mut cycle => false,
            _ = shutdown.as_mut() => {
                info!("Shutdown requested, stopping after the current item");
                cancel.cancel();
                cycle.await;
                true
            }
        }
    }

    async fn heartbeat(&self) {
        let ledger = DeliveryLedger::new(self.reconciler.database().pool());
        match ledger.count_all().await {
            Ok(count) => info!(
                "Heartbeat: monitoring {} feed(s), {} item(s) tracked",
                self.feeds.len(),
                count
            ),
            Err(e) => error!("Heartbeat: failed to count sent items: {}", e),
        }
    }

    /// Remove ledger records past the retention window.
    pub async fn purge(&self) {
        if self.retention_days == 0 {
            return;
        }

        let ledger = DeliveryLedger::new(self.reconciler.database().pool());
        match ledger.purge_older_than(self.retention_days).await {
            Ok(0) => debug!("No sent items older than {} days", self.retention_days),
            Ok(deleted) => info!(
                "Purged {} sent item(s) older than {} days",
                deleted, self.retention_days
            ),
            Err(e) => error!("Failed to purge sent items: {}", e),
        }
    }
}
