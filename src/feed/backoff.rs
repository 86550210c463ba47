//! Polling backoff for feeds that fail to fetch.

use chrono::{DateTime, Duration, Utc};

/// HTTP 410 Gone.
const STATUS_GONE: u16 = 410;

/// Upper bound for error backoff.
pub const MAX_BACKOFF_HOURS: i64 = 24;

/// How long a feed that answered 410 Gone stays parked.
pub const GONE_PARK_DAYS: i64 = 365;

/// Compute when a failing feed may be fetched again.
///
/// - 410 Gone parks the feed for a year.
/// - A parseable `Retry-After` (delta seconds or HTTP date) is honored.
/// - Otherwise `base × 2^(errors-1)`, clamped to `[base, 24h]`.
pub fn next_check_after(
    now: DateTime<Utc>,
    base: Duration,
    status: Option<u16>,
    retry_after: Option<&str>,
    error_count: u32,
) -> DateTime<Utc> {
    if status == Some(STATUS_GONE) {
        return now + Duration::days(GONE_PARK_DAYS);
    }

    if let Some(delay) = retry_after.and_then(|h| parse_retry_after(h, now)) {
        if delay > Duration::zero() {
            return now + delay;
        }
    }

    let max = Duration::hours(MAX_BACKOFF_HOURS);
    let exponent = error_count.saturating_sub(1).min(16);
    let backoff = base
        .checked_mul(1i32 << exponent)
        .unwrap_or(max)
        .min(max)
        .max(base);

    now + backoff
}

/// Parse a `Retry-After` header relative to `now`.
pub fn parse_retry_after(header: &str, now: DateTime<Utc>) -> Option<Duration> {
    let header = header.trim();
    if header.is_empty() {
        return None;
    }
    if let Ok(seconds) = header.parse::<i64>() {
        return Some(Duration::seconds(seconds));
    }
    DateTime::parse_from_rfc2822(header)
        .ok()
        .map(|at| at.with_timezone(&Utc) - now)
}
