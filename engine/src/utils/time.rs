//! Time utility functions
//!
//! CDM stores timestamps as milliseconds since the Unix epoch, usually
//! encoded as JSON strings.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

/// Convert milliseconds since Unix epoch to DateTime<Utc>
pub fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(|| {
        tracing::warn!(millis, "Invalid timestamp, using epoch");
        DateTime::UNIX_EPOCH
    })
}

/// Parse a millisecond epoch stored as text ("1705315200000" or "1705315200000.0")
pub fn parse_millis(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    trimmed
        .parse::<i64>()
        .ok()
        .or_else(|| trimmed.parse::<f64>().ok().map(|f| f as i64))
}

/// Millisecond epoch of the first instant of a calendar day (UTC)
pub fn day_start_millis(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// Millisecond epoch of the last millisecond of a calendar day (UTC)
pub fn day_end_millis(date: NaiveDate) -> i64 {
    day_start_millis(date) + 86_400_000 - 1
}
