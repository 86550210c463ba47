//! RSS/Atom feed fetcher.
//!
//! Fetches a feed over HTTP with timeouts, conditional-request headers and a
//! size limit, then normalizes every entry into a [`FeedItem`].

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use feed_rs::model::{Entry, Link, Text};
use feed_rs::parser;
use reqwest::header::{HeaderMap, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::feed::types::{
    CacheValidators, FeedFetch, FeedItem, FetchError, ParsedFeed, NO_SUMMARY, PUBLISHED_FORMAT,
    UNKNOWN_DATE, UNTITLED_ITEM,
};
use crate::{FeedmailError, Result};

/// User agent string for feed fetching.
const USER_AGENT: &str = concat!("feedmail/", env!("CARGO_PKG_VERSION"), " (RSS to email)");

/// Source of feed contents.
///
/// The reconciler only talks to feeds through this trait.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch and normalize the feed at `url`.
    ///
    /// `validators` come from the previous successful fetch and may be empty.
    async fn fetch(
        &self,
        url: &str,
        validators: &CacheValidators,
    ) -> std::result::Result<FeedFetch, FetchError>;
}

/// HTTP feed fetcher.
pub struct HttpFeedSource {
    client: Client,
    max_feed_size: u64,
}

impl HttpFeedSource {
    /// Create a fetcher from the fetch configuration.
    ///
    /// Certificate verification stays enabled.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .timeout(Duration::from_secs(config.total_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FeedmailError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_feed_size: config.max_feed_size_bytes,
        })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(
        &self,
        url: &str,
        validators: &CacheValidators,
    ) -> std::result::Result<FeedFetch, FetchError> {
        url::Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;

        let mut request = self.client.get(url);
        if let Some(etag) = &validators.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &validators.last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        debug!("Fetching feed: {}", url);
        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            debug!("Feed not modified: {}", url);
            return Ok(FeedFetch::NotModified);
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                retry_after: header_value(response.headers(), RETRY_AFTER),
            });
        }

        if let Some(content_length) = response.content_length() {
            if content_length > self.max_feed_size {
                return Err(FetchError::TooLarge {
                    size: content_length,
                    max: self.max_feed_size,
                });
            }
        }

        let validators = CacheValidators {
            etag: header_value(response.headers(), ETAG),
            last_modified: header_value(response.headers(), LAST_MODIFIED),
        };

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(format!("failed to read response: {}", e)))?;

        if bytes.len() as u64 > self.max_feed_size {
            return Err(FetchError::TooLarge {
                size: bytes.len() as u64,
                max: self.max_feed_size,
            });
        }

        let mut feed = parse_feed(url, &bytes)?;
        feed.validators = validators;
        Ok(FeedFetch::Fetched(feed))
    }
}

fn header_value(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parse feed bytes into a [`ParsedFeed`].
///
/// Entries without an id, guid or link are dropped with a warning. The feed
/// URL doubles as the title when the feed has none.
pub fn parse_feed(url: &str, bytes: &[u8]) -> std::result::Result<ParsedFeed, FetchError> {
    let body = fix_markup(bytes);

    // An empty generated id marks entries that carry no identifier of their own.
    let feed_parser = parser::Builder::new()
        .id_generator(|_links: &[Link], _title: &Option<Text>, _uri: Option<&str>| String::new())
        .build();
    let feed = feed_parser
        .parse(body.as_ref())
        .map_err(|e| FetchError::Parse(e.to_string()))?;

    let title = feed
        .title
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| url.to_string());

    let mut items = Vec::with_capacity(feed.entries.len());
    for entry in feed.entries {
        let entry_title = entry.title.as_ref().map(|t| t.content.clone());
        match normalize_entry(entry) {
            Some(item) => items.push(item),
            None => warn!(
                "Skipping item with no GUID or link - Title: {}, Feed: {}",
                entry_title.as_deref().unwrap_or(UNTITLED_ITEM),
                url
            ),
        }
    }

    debug!("Parsed {} item(s) from {} ({})", items.len(), title, url);

    Ok(ParsedFeed {
        title,
        items,
        validators: CacheValidators::default(),
    })
}

/// Map one parsed entry to a [`FeedItem`].
///
/// Identifier: explicit id/guid, else the first link. Date: published, else
/// updated. Summary: summary, else content body, else a placeholder.
pub fn normalize_entry(entry: Entry) -> Option<FeedItem> {
    let link = entry
        .links
        .first()
        .map(|l| l.href.trim().to_string())
        .unwrap_or_default();

    let id = entry.id.trim();
    let guid = if id.is_empty() { link.clone() } else { id.to_string() };
    if guid.is_empty() {
        return None;
    }

    let title = entry
        .title
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED_ITEM.to_string());

    let published_at = entry.published.or(entry.updated);
    let published_text = published_at
        .map(|dt| dt.format(PUBLISHED_FORMAT).to_string())
        .unwrap_or_else(|| UNKNOWN_DATE.to_string());

    let summary = entry
        .summary
        .map(|t| t.content)
        .filter(|s| !s.trim().is_empty())
        .or_else(|| entry.content.and_then(|c| c.body))
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| NO_SUMMARY.to_string());

    Some(FeedItem {
        title,
        link,
        guid,
        published_text,
        published_at,
        summary,
    })
}

/// Rewrite `</br>` (a common feed typo) to `<br/>` so the XML parses.
fn fix_markup(bytes: &[u8]) -> Cow<'_, [u8]> {
    const BAD: &[u8] = b"</br>";
    const GOOD: &[u8] = b"<br/>";

    if !bytes.windows(BAD.len()).any(|w| w == BAD) {
        return Cow::Borrowed(bytes);
    }

    let mut fixed = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(BAD) {
            fixed.extend_from_slice(GOOD);
            i += BAD.len();
        } else {
            fixed.push(bytes[i]);
            i += 1;
        }
    }
    Cow::Owned(fixed)
}
