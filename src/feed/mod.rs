//! Feed fetching and normalization.

pub mod backoff;
pub mod fetcher;
pub mod types;

pub use fetcher::{normalize_entry, parse_feed, FeedSource, HttpFeedSource};
pub use types::{
    CacheValidators, FeedFetch, FeedItem, FetchError, ParsedFeed, MAX_FEED_SIZE, NO_SUMMARY,
    UNKNOWN_DATE, UNTITLED_ITEM,
};
