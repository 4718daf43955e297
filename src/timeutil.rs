//! Shared time parsing and formatting helpers.
//!
//! All catalog timestamps are stored as fixed-width ISO-8601 UTC strings
//! ("2026-08-01T18:30:00Z") so lexicographic comparison in SQL matches
//! chronological order. Epoch milliseconds remain authoritative for ordering
//! decisions made in Rust.

use chrono::{DateTime, Duration, Local, SecondsFormat, TimeZone, Timelike, Utc};

/// Format a UTC timestamp in the canonical catalog form (seconds precision,
/// trailing `Z`).
pub fn fmt_iso_utc(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an ISO-8601 timestamp, tolerating both `Z` and `+00:00` suffixes
/// and naive values (treated as UTC).
pub fn parse_iso_utc(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Naive "YYYY-MM-DDTHH:MM:SS" or "YYYY-MM-DD HH:MM:SS"
    let normalized = s.replace(' ', "T");
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S") {
        return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
    }
    None
}

/// Epoch milliseconds to UTC datetime.
pub fn ms_to_dt(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Truncate to the top of the hour.
pub fn floor_hour(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_minute(0)
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt)
}

/// Round up to the next top of the hour (identity when already aligned).
pub fn ceil_hour(dt: DateTime<Utc>) -> DateTime<Utc> {
    let floored = floor_hour(dt);
    if floored == dt {
        dt
    } else {
        floored + Duration::hours(1)
    }
}

/// Snap down to the nearest 15-minute boundary.
pub fn snap_down_quarter(dt: DateTime<Utc>) -> DateTime<Utc> {
    let minute = (dt.minute() / 15) * 15;
    dt.with_minute(minute)
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt)
}

/// Snap up to the next 15-minute boundary (identity when already aligned).
pub fn snap_up_quarter(dt: DateTime<Utc>) -> DateTime<Utc> {
    let snapped = snap_down_quarter(dt);
    if snapped == dt {
        dt
    } else {
        snapped + Duration::minutes(15)
    }
}

/// Snap up to the next :00 or :30 boundary. Used to align pre-event
/// placeholder blocks on guide-friendly boundaries.
pub fn snap_to_half_hour(dt: DateTime<Utc>) -> DateTime<Utc> {
    let m = dt.minute();
    let zeroed = dt
        .with_second(0)
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt);
    if m == 0 || m == 30 {
        zeroed
    } else if m < 30 {
        zeroed.with_minute(30).unwrap_or(zeroed)
    } else {
        floor_hour(zeroed) + Duration::hours(1)
    }
}

/// Human-friendly local time for placeholder descriptions,
/// e.g. "Sun at 04:00 AM EST".
pub fn fmt_local_short(dt_utc: DateTime<Utc>) -> String {
    let local = dt_utc.with_timezone(&Local);
    let tz = local.format("%Z").to_string();
    local.format(&format!("%a at %I:%M %p {}", tz)).to_string()
}
