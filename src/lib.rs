//! feedmail - RSS/Atom to email
//!
//! Polls a list of feeds and emails every new entry to a single recipient.
//! Delivery state lives in SQLite so restarts never re-send an item, and a
//! feed seen for the first time only produces one email for its newest entry.

pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod ledger;
pub mod logging;
pub mod mail;
pub mod reconciler;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use db::Database;
pub use error::{FeedmailError, Result};
pub use feed::{
    CacheValidators, FeedFetch, FeedItem, FeedSource, FetchError, HttpFeedSource, ParsedFeed,
};
pub use ledger::{DeliveryLedger, FeedStatus, FeedStatusRepository, SentRecord};
pub use mail::{format_item_email, Mailer, OutgoingMail, SmtpMailer};
pub use reconciler::{select_most_recent, CycleStats, FeedReconciler, ReconcilerOptions};
pub use scheduler::Scheduler;
