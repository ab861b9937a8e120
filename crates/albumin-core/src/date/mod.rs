pub mod exif;
pub mod formats;
pub mod guess;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::ValidationError;

/// Where a timestamp came from, declared from most to least trusted.
///
/// Ordering is by trust: `ManualTrusted` is the greatest value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    ManualTrusted,
    ExifDateTimeOriginal,
    MakerNotesDateTimeOriginal,
    ExifCreateDate,
    MakerNotesCreateDate,
    QuickTimeCreateDate,
    FilenameDateTime,
    ManualUntrusted,
    FileModifyTime,
}

impl Method {
    /// All methods, most trusted first.
    pub const ALL: [Method; 9] = [
        Method::ManualTrusted,
        Method::ExifDateTimeOriginal,
        Method::MakerNotesDateTimeOriginal,
        Method::ExifCreateDate,
        Method::MakerNotesCreateDate,
        Method::QuickTimeCreateDate,
        Method::FilenameDateTime,
        Method::ManualUntrusted,
        Method::FileModifyTime,
    ];

    /// Position in the precedence list (0 = most trusted).
    pub fn rank(self) -> usize {
        self as usize
    }

    /// Canonical name, as stored and printed in reports.
    pub fn name(self) -> &'static str {
        match self {
            Method::ManualTrusted => "Manual/Trusted",
            Method::ExifDateTimeOriginal => "ExifTool/EXIF/DateTimeOriginal",
            Method::MakerNotesDateTimeOriginal => "ExifTool/MakerNotes/DateTimeOriginal",
            Method::ExifCreateDate => "ExifTool/EXIF/CreateDate",
            Method::MakerNotesCreateDate => "ExifTool/MakerNotes/CreateDate",
            Method::QuickTimeCreateDate => "ExifTool/QuickTime/CreateDate",
            Method::FilenameDateTime => "Filename/DateTime",
            Method::ManualUntrusted => "Manual/Untrusted",
            Method::FileModifyTime => "File/FileModifyDate",
        }
    }

    /// Tag name an extraction adapter reports this evidence under.
    pub fn tag(self) -> &'static str {
        match self {
            Method::ManualTrusted => "Manual:Trusted",
            Method::ExifDateTimeOriginal => "EXIF:DateTimeOriginal",
            Method::MakerNotesDateTimeOriginal => "MakerNotes:DateTimeOriginal",
            Method::ExifCreateDate => "EXIF:CreateDate",
            Method::MakerNotesCreateDate => "MakerNotes:CreateDate",
            Method::QuickTimeCreateDate => "QuickTime:CreateDate",
            Method::FilenameDateTime => "File:FileName",
            Method::ManualUntrusted => "Manual:Untrusted",
            Method::FileModifyTime => "File:FileModifyDate",
        }
    }

    /// Tags to request from an extraction adapter.
    pub fn tags() -> Vec<&'static str> {
        Method::ALL.iter().map(|m| m.tag()).collect()
    }
}

impl Ord for Method {
    fn cmp(&self, other: &Self) -> Ordering {
        other.rank().cmp(&self.rank())
    }
}

impl PartialOrd for Method {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Method {
    type Err = ValidationError;

    /// Accepts either the canonical name or the extractor tag.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.name() == s || m.tag() == s)
            .ok_or_else(|| ValidationError::UnknownMethod(s.to_string()))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The date-time carried by a candidate.
#[derive(Debug, Clone, Copy)]
pub enum CandidateTime {
    /// Wall-clock time with no zone information.
    Floating(NaiveDateTime),
    /// An absolute moment without a named zone.
    Instant(DateTime<Utc>),
    /// A moment in a named zone.
    Zoned(DateTime<Tz>),
}

impl CandidateTime {
    pub fn zone(&self) -> Option<Tz> {
        match self {
            CandidateTime::Zoned(dt) => Some(dt.timezone()),
            _ => None,
        }
    }

    pub fn is_zoned(&self) -> bool {
        matches!(self, CandidateTime::Zoned(_))
    }

    /// Whether two values describe the same time for conflict purposes.
    pub fn agrees_with(&self, other: &CandidateTime) -> bool {
        match (self, other) {
            (CandidateTime::Floating(a), CandidateTime::Floating(b)) => a == b,
            (CandidateTime::Floating(_), _) | (_, CandidateTime::Floating(_)) => false,
            (a, b) => a.to_utc() == b.to_utc(),
        }
    }

    /// Pin the value to `tz`. Wall clocks are interpreted in the zone,
    /// moments are converted into it.
    pub fn localize(&self, tz: Tz) -> DateTime<Tz> {
        match self {
            CandidateTime::Floating(naive) => localize_naive(tz, *naive),
            CandidateTime::Instant(dt) => dt.with_timezone(&tz),
            CandidateTime::Zoned(dt) => dt.with_timezone(&tz),
        }
    }

    /// Floating values are read as UTC.
    pub fn to_utc(&self) -> DateTime<Utc> {
        match self {
            CandidateTime::Floating(naive) => Utc.from_utc_datetime(naive),
            CandidateTime::Instant(dt) => *dt,
            CandidateTime::Zoned(dt) => dt.with_timezone(&Utc),
        }
    }
}

impl PartialEq for CandidateTime {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CandidateTime::Floating(a), CandidateTime::Floating(b)) => a == b,
            (CandidateTime::Instant(a), CandidateTime::Instant(b)) => a == b,
            (CandidateTime::Zoned(a), CandidateTime::Zoned(b)) => {
                a == b && a.timezone() == b.timezone()
            }
            _ => false,
        }
    }
}

impl Eq for CandidateTime {}

fn localize_naive(tz: Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
        return dt;
    }
    // Skipped by a DST transition: move past the gap.
    let shifted = naive + Duration::hours(1);
    tracing::debug!(%naive, zone = tz.name(), "wall clock falls in a DST gap, shifting forward");
    tz.from_local_datetime(&shifted)
        .earliest()
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}

/// One piece of date evidence and its provenance.
///
/// `==` compares method and value. Precedence comparisons go through
/// [`compare_precedence`] and [`TimestampCandidate::outranks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampCandidate {
    pub method: Method,
    pub time: CandidateTime,
}

impl TimestampCandidate {
    pub fn new(method: Method, time: CandidateTime) -> Self {
        Self { method, time }
    }

    /// Build a candidate from a method name (or tag) and a raw value.
    pub fn parse(method: &str, raw: &str) -> Result<Self, ValidationError> {
        let method: Method = method.parse()?;
        Self::from_raw(method, raw)
    }

    pub fn from_raw(method: Method, raw: &str) -> Result<Self, ValidationError> {
        let time = formats::parse_raw(method, raw)
            .ok_or_else(|| ValidationError::UnparseableTimestamp(raw.to_string()))?;
        Ok(Self { method, time })
    }

    /// True when `self` has strictly higher precedence than `other`.
    /// Every candidate outranks absence.
    pub fn outranks(&self, other: Option<&TimestampCandidate>) -> bool {
        compare_precedence(Some(self), other) == Ordering::Greater
    }

    pub fn zone(&self) -> Option<Tz> {
        self.time.zone()
    }

    pub fn localized(&self, tz: Tz) -> Self {
        Self {
            method: self.method,
            time: CandidateTime::Zoned(self.time.localize(tz)),
        }
    }

    /// Parse the text produced by `Display`:
    /// `YYYY-MM-DD HH:MM:SS[ ±HHMM] @ (<zone>) (<method>)`.
    pub fn from_report_text(text: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::UnparseableTimestamp(text.to_string());
        let (date, info) = text.split_once(" @ ").ok_or_else(invalid)?;
        let (zone, method) = info
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .and_then(|s| s.split_once(") ("))
            .ok_or_else(invalid)?;
        let method: Method = method.parse()?;

        let time = match zone {
            FLOATING => CandidateTime::Floating(
                NaiveDateTime::parse_from_str(date, REPORT_NAIVE_FORMAT).map_err(|_| invalid())?,
            ),
            INSTANT => CandidateTime::Instant(
                DateTime::parse_from_str(date, REPORT_FORMAT)
                    .map_err(|_| invalid())?
                    .with_timezone(&Utc),
            ),
            name => {
                let tz = parse_zone(name)?;
                CandidateTime::Zoned(
                    DateTime::parse_from_str(date, REPORT_FORMAT)
                        .map_err(|_| invalid())?
                        .with_timezone(&tz),
                )
            }
        };
        Ok(Self { method, time })
    }
}

const FLOATING: &str = "floating";
const INSTANT: &str = "instant";
const REPORT_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";
const REPORT_NAIVE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

impl fmt::Display for TimestampCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.time {
            CandidateTime::Floating(dt) => {
                write!(f, "{} @ ({}) ({})", dt.format(REPORT_NAIVE_FORMAT), FLOATING, self.method)
            }
            CandidateTime::Instant(dt) => {
                write!(f, "{} @ ({}) ({})", dt.format(REPORT_FORMAT), INSTANT, self.method)
            }
            CandidateTime::Zoned(dt) => write!(
                f,
                "{} @ ({}) ({})",
                dt.format(REPORT_FORMAT),
                dt.timezone().name(),
                self.method
            ),
        }
    }
}

/// Compare by method precedence only. Absence is lower than any
/// candidate and equal to absence.
pub fn compare_precedence(
    a: Option<&TimestampCandidate>,
    b: Option<&TimestampCandidate>,
) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (Some(a), Some(b)) => a.method.cmp(&b.method),
    }
}

/// Parse an IANA zone name.
pub fn parse_zone(name: &str) -> Result<Tz, ValidationError> {
    name.parse::<Tz>()
        .map_err(|_| ValidationError::UnknownTimeZone(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn naive(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_precedence_ignores_timestamp_value() {
        let trusted = TimestampCandidate::new(
            Method::ManualTrusted,
            CandidateTime::Floating(naive(2000, 1, 1, 0, 0, 0)),
        );
        let exif = TimestampCandidate::new(
            Method::ExifDateTimeOriginal,
            CandidateTime::Floating(naive(2021, 6, 1, 0, 0, 0)),
        );
        assert!(trusted.outranks(Some(&exif)));
        assert!(!exif.outranks(Some(&trusted)));
        assert_eq!(compare_precedence(Some(&trusted), Some(&exif)), Ordering::Greater);
    }

    #[test]
    fn test_every_method_outranks_the_next() {
        for pair in Method::ALL.windows(2) {
            assert!(pair[0] > pair[1], "{} should outrank {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_absence_comparisons() {
        let c = TimestampCandidate::from_raw(Method::FileModifyTime, "1431785069").unwrap();
        assert!(c.outranks(None));
        assert_eq!(compare_precedence(None, Some(&c)), Ordering::Less);
        assert_eq!(compare_precedence(None, None), Ordering::Equal);
    }

    #[test]
    fn test_method_from_name_or_tag() {
        assert_eq!("EXIF:DateTimeOriginal".parse::<Method>().unwrap(), Method::ExifDateTimeOriginal);
        assert_eq!("Manual/Trusted".parse::<Method>().unwrap(), Method::ManualTrusted);
        assert_eq!(
            "EXIF:Flash".parse::<Method>(),
            Err(ValidationError::UnknownMethod("EXIF:Flash".into()))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            TimestampCandidate::parse("Manual/Trusted", "yesterday"),
            Err(ValidationError::UnparseableTimestamp(_))
        ));
        assert!(matches!(
            TimestampCandidate::parse("Manual/Bogus", "2015:05:16 14:04:29"),
            Err(ValidationError::UnknownMethod(_))
        ));
    }

    #[test]
    fn test_localize_floating_and_instant() {
        let tz: Tz = "Europe/Istanbul".parse().unwrap();
        let floating = CandidateTime::Floating(naive(2015, 5, 16, 14, 4, 29));
        let local = floating.localize(tz);
        assert_eq!(local.naive_local(), naive(2015, 5, 16, 14, 4, 29));
        assert_eq!(local.naive_utc(), naive(2015, 5, 16, 11, 4, 29));

        let instant = CandidateTime::Instant(Utc.from_utc_datetime(&naive(2015, 5, 16, 11, 4, 29)));
        assert_eq!(instant.localize(tz), local);
        assert!(instant.agrees_with(&CandidateTime::Zoned(local)));
        assert!(!floating.agrees_with(&instant));
    }

    #[test]
    fn test_localize_dst_gap_moves_forward() {
        let tz: Tz = "Europe/Berlin".parse().unwrap();
        let gap = CandidateTime::Floating(naive(2021, 3, 28, 2, 30, 0));
        assert_eq!(gap.localize(tz).naive_local(), naive(2021, 3, 28, 3, 30, 0));
    }

    #[test]
    fn test_zone_is_part_of_value_equality() {
        let utc = CandidateTime::Zoned(Tz::UTC.from_utc_datetime(&naive(2020, 1, 1, 0, 0, 0)));
        let london: Tz = "Europe/London".parse().unwrap();
        let same_moment = CandidateTime::Zoned(london.from_utc_datetime(&naive(2020, 1, 1, 0, 0, 0)));
        assert!(utc.agrees_with(&same_moment));
        assert_ne!(utc, same_moment);
    }

    #[test]
    fn test_report_text_round_trip() {
        let tz: Tz = "America/New_York".parse().unwrap();
        // 01:30 on this day happens twice in New York.
        let second_pass = tz
            .from_local_datetime(&naive(2021, 11, 7, 1, 30, 0))
            .latest()
            .unwrap();
        let candidates = [
            TimestampCandidate::new(Method::ExifCreateDate, CandidateTime::Zoned(second_pass)),
            TimestampCandidate::new(
                Method::FilenameDateTime,
                CandidateTime::Floating(naive(2019, 9, 19, 5, 38, 57)),
            ),
            TimestampCandidate::from_raw(Method::FileModifyTime, "1431785069").unwrap(),
        ];
        for c in candidates {
            let text = c.to_string();
            assert_eq!(TimestampCandidate::from_report_text(&text).unwrap(), c, "{text}");
        }
    }

    #[test]
    fn test_report_text_format() {
        let c = TimestampCandidate::from_raw(Method::ExifDateTimeOriginal, "2015:05:16 14:04:29")
            .unwrap()
            .localized(Tz::UTC);
        assert_eq!(
            c.to_string(),
            "2015-05-16 14:04:29 +0000 @ (UTC) (ExifTool/EXIF/DateTimeOriginal)"
        );
    }
}
