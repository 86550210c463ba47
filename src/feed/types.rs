//! Feed types for feedmail.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Title used when an entry has none.
pub const UNTITLED_ITEM: &str = "No Title";

/// Summary used when an entry has neither summary nor content.
pub const NO_SUMMARY: &str = "No summary available.";

/// Published text used when an entry carries no usable date.
pub const UNKNOWN_DATE: &str = "Unknown";

/// Display format for `FeedItem::published_text`.
pub const PUBLISHED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Maximum feed size in bytes (5MB).
pub const MAX_FEED_SIZE: u64 = 5 * 1024 * 1024;

/// One normalized feed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    /// Entry title.
    pub title: String,
    /// Entry link, empty when the entry has none.
    pub link: String,
    /// Stable identifier (explicit id, else guid, else link). Never empty.
    pub guid: String,
    /// Human-readable publication date, or `"Unknown"`.
    pub published_text: String,
    /// Parsed publication date, used only for ordering.
    pub published_at: Option<DateTime<Utc>>,
    /// Summary markup as supplied by the feed.
    pub summary: String,
}

impl FeedItem {
    /// Create an item with the given guid and title and default remaining fields.
    pub fn new(guid: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: String::new(),
            guid: guid.into(),
            published_text: UNKNOWN_DATE.to_string(),
            published_at: None,
            summary: NO_SUMMARY.to_string(),
        }
    }

    /// Set the link.
    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = link.into();
        self
    }

    /// Set the publication date (also updates `published_text`).
    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_text = published_at.format(PUBLISHED_FORMAT).to_string();
        self.published_at = Some(published_at);
        self
    }

    /// Set the summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }
}

/// HTTP cache validators remembered between fetches of one feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheValidators {
    /// `ETag` response header.
    pub etag: Option<String>,
    /// `Last-Modified` response header.
    pub last_modified: Option<String>,
}

impl CacheValidators {
    /// True when neither validator is known.
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// A fetched and normalized feed.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    /// Feed title (the feed URL when the feed has no title).
    pub title: String,
    /// Entries in the feed's own order.
    pub items: Vec<FeedItem>,
    /// Validators returned with this response.
    pub validators: CacheValidators,
}

/// Result of one successful fetch.
#[derive(Debug, Clone)]
pub enum FeedFetch {
    /// The server returned a feed body.
    Fetched(ParsedFeed),
    /// The server answered 304 Not Modified.
    NotModified,
}

/// Why a feed could not be fetched.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The URL could not be used.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Connection, TLS, timeout or body read failure.
    #[error("failed to fetch feed: {0}")]
    Transport(String),

    /// The server answered with a non-success status.
    #[error("HTTP error: {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw `Retry-After` header, if any.
        retry_after: Option<String>,
    },

    /// The body exceeded the configured size limit.
    #[error("feed too large: {size} bytes (max {max} bytes)")]
    TooLarge {
        /// Reported or actual size.
        size: u64,
        /// Configured limit.
        max: u64,
    },

    /// The body is not a feed.
    #[error("failed to parse feed: {0}")]
    Parse(String),
}

impl FetchError {
    /// HTTP status that caused the failure, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// `Retry-After` header sent with the failure.
    pub fn retry_after(&self) -> Option<&str> {
        match self {
            FetchError::Status { retry_after, .. } => retry_after.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_feed_item_defaults() {
        let item = FeedItem::new("guid-1", "Title");
        assert_eq!(item.guid, "guid-1");
        assert_eq!(item.title, "Title");
        assert_eq!(item.link, "");
        assert_eq!(item.published_text, UNKNOWN_DATE);
        assert!(item.published_at.is_none());
        assert_eq!(item.summary, NO_SUMMARY);
    }

    #[test]
    fn test_feed_item_with_published_at() {
        let dt = Utc.with_ymd_and_hms(2024, 12, 24, 18, 30, 0).unwrap();
        let item = FeedItem::new("g", "t").with_published_at(dt);
        assert_eq!(item.published_at, Some(dt));
        assert_eq!(item.published_text, "2024-12-24 18:30:00");
    }

    #[test]
    fn test_cache_validators_is_empty() {
        assert!(CacheValidators::default().is_empty());
        let validators = CacheValidators {
            etag: Some("\"abc\"".to_string()),
            last_modified: None,
        };
        assert!(!validators.is_empty());
    }

    #[test]
    fn test_fetch_error_accessors() {
        let err = FetchError::Status {
            status: 429,
            retry_after: Some("120".to_string()),
        };
        assert_eq!(err.status(), Some(429));
        assert_eq!(err.retry_after(), Some("120"));

        let err = FetchError::Transport("timed out".to_string());
        assert_eq!(err.status(), None);
        assert_eq!(err.retry_after(), None);
        assert_eq!(err.to_string(), "failed to fetch feed: timed out");
    }
}
