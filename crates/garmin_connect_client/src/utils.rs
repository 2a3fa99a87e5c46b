//! Timestamp parsing and formatting shared by the client and its callers.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// Parse an ISO-8601 start time.
///
/// Accepts:
/// - RFC3339 with offset -> kept as given
/// - naive datetime (`T` or space separated) -> interpreted in `tz`
/// - YYYY-MM-DD -> midnight in `tz`
pub fn parse_start_time<Tz: TimeZone>(s: &str, tz: &Tz) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.fixed_offset())
}

/// Parse a timestamp as returned in remote activity rows. Values without an
/// offset are read as UTC.
pub fn parse_remote_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|ndt| ndt.and_utc())
}

/// Format a timestamp the way the activity service expects it.
pub fn format_remote_timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}

/// Read an expiry from either unix seconds or an RFC3339 string.
pub(crate) fn timestamp_from_json(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    if let Some(secs) = value.as_i64() {
        return DateTime::from_timestamp(secs, 0);
    }
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn decode_base64_json(raw: &str) -> Option<serde_json::Value> {
    let bytes = STANDARD.decode(raw).ok()?;
    serde_json::from_slice(&bytes).ok()
}
