use crate::app_error::{AppError, AppResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::time::SystemTime;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const NAIVE_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

pub fn format_system_time(t: SystemTime) -> String {
    DateTime::<Utc>::from(t).format(TIMESTAMP_FORMAT).to_string()
}

pub fn now_timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a query time into the stored `TIMESTAMP_FORMAT` so it compares
/// correctly as a string against `DateModified`.
///
/// Accepted forms: a bare `YYYY-MM-DD` date (start of that day), RFC 3339 with
/// any offset, and a naive `T`- or space-separated datetime read as UTC.
/// Fractional seconds are truncated.
pub fn canonical_query_time(raw: &str) -> AppResult<String> {
    let trimmed = raw.trim();
    let parsed = if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc())
    } else if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        Some(dt.with_timezone(&Utc))
    } else {
        NAIVE_DATETIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
            .map(|naive| naive.and_utc())
    };

    parsed
        .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
        .ok_or_else(|| {
            AppError::new(
                "VL_QUERY_INVALID_TIME",
                "query",
                "query time must be a YYYY-MM-DD date or an ISO 8601 datetime",
                false,
                serde_json::json!({ "time": raw }),
            )
        })
}
