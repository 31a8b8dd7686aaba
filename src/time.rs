//! Conversion between boundary timestamps and store milliseconds.

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone};
use chrono_tz::Tz;

use crate::error::SchedulerError;
use crate::model::{Ms, Span};

/// Parse an absolute instant. Only RFC 3339 with an explicit offset (or `Z`)
/// is accepted; a local wall-clock time is ambiguous and rejected.
pub fn parse_instant(field: &str, raw: &str) -> Result<Ms, SchedulerError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.timestamp_millis())
        .map_err(|_| {
            SchedulerError::validation(format!(
                "{field} must be an RFC 3339 timestamp with offset, got {raw:?}"
            ))
        })
}

pub fn format_instant(ms: Ms) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}

/// Resolve a listing date. Accepts `YYYY-MM-DD`, or an absolute instant whose
/// calendar date in `tz` is used.
pub fn parse_day(raw: &str, tz: Tz) -> Result<NaiveDate, SchedulerError> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&tz).date_naive())
        .map_err(|_| {
            SchedulerError::validation(format!(
                "date must be YYYY-MM-DD or an RFC 3339 timestamp, got {raw:?}"
            ))
        })
}

/// `[local midnight, next local midnight)` of `date` in `tz`.
pub fn day_window(date: NaiveDate, tz: Tz) -> Result<Span, SchedulerError> {
    let next = date
        .succ_opt()
        .ok_or_else(|| SchedulerError::validation("date out of range"))?;
    let start = start_of_day(date, tz)?;
    let end = start_of_day(next, tz)?;
    Span::try_new(start, end).ok_or_else(|| SchedulerError::validation("empty day window"))
}

/// First existing instant of a local calendar day. Zones that spring forward
/// at midnight have no 00:00, so the next valid hour is used instead.
fn start_of_day(date: NaiveDate, tz: Tz) -> Result<Ms, SchedulerError> {
    (0..=3)
        .find_map(|hour| {
            let local = date.and_hms_opt(hour, 0, 0)?;
            tz.from_local_datetime(&local).earliest()
        })
        .map(|dt| dt.timestamp_millis())
        .ok_or_else(|| SchedulerError::validation(format!("no local midnight for {date} in {tz}")))
}
