use std::ops::RangeInclusive;

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};

use super::{guess, CandidateTime, Method};

/// Free-form wall-clock layouts, tried in order.
const NAIVE_FORMATS: &[&str] = &[
    "%Y:%m:%d %H:%M:%S",
    "%Y-%m-%d@%H-%M-%S",
    "%Y:%m:%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Layouts carrying a numeric UTC offset.
const OFFSET_FORMATS: &[&str] = &["%Y:%m:%d %H:%M:%S%:z", "%Y:%m:%d %H:%M:%S%.f%:z"];

/// Epoch values at or above this magnitude are milliseconds.
const EPOCH_MILLIS_THRESHOLD: u64 = 100_000_000_000;

/// Years that render as four digits in stamps and stored fields.
pub const SUPPORTED_YEARS: RangeInclusive<i32> = 1000..=9999;

/// Parse one raw value reported for `method`. `None` when no accepted
/// layout matches or the year is outside [`SUPPORTED_YEARS`]. Fractions
/// of a second are dropped.
pub fn parse_raw(method: Method, raw: &str) -> Option<CandidateTime> {
    parse_precise(method, raw.trim())
        .filter(|time| SUPPORTED_YEARS.contains(&time.to_utc().year()))
        .map(whole_seconds)
}

fn whole_seconds(time: CandidateTime) -> CandidateTime {
    match time {
        CandidateTime::Floating(dt) => CandidateTime::Floating(dt.with_nanosecond(0).unwrap_or(dt)),
        CandidateTime::Instant(dt) => CandidateTime::Instant(dt.with_nanosecond(0).unwrap_or(dt)),
        CandidateTime::Zoned(dt) => CandidateTime::Zoned(dt.with_nanosecond(0).unwrap_or(dt)),
    }
}

fn parse_precise(method: Method, raw: &str) -> Option<CandidateTime> {
    if raw.is_empty() {
        return None;
    }

    if method == Method::FilenameDateTime {
        return guess::guess_date_from_filename(raw).map(CandidateTime::Floating);
    }

    parse_epoch(raw)
        .or_else(|| parse_with_offset(raw))
        .or_else(|| parse_naive(raw).map(CandidateTime::Floating))
}

fn parse_naive(raw: &str) -> Option<NaiveDateTime> {
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

fn parse_with_offset(raw: &str) -> Option<CandidateTime> {
    let normalized;
    let raw = match raw.strip_suffix('Z') {
        Some(rest) => {
            normalized = format!("{rest}+00:00");
            normalized.as_str()
        }
        None => raw,
    };
    OFFSET_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(raw, fmt).ok())
        .map(|dt| CandidateTime::Instant(dt.with_timezone(&Utc)))
}

fn parse_epoch(raw: &str) -> Option<CandidateTime> {
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: i64 = raw.parse().ok()?;
    let dt = if value.unsigned_abs() >= EPOCH_MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(value)?
    } else {
        DateTime::from_timestamp(value, 0)?
    };
    Some(CandidateTime::Instant(dt))
}
