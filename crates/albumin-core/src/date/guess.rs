use chrono::NaiveDateTime;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

struct DatePattern {
    regex: &'static LazyLock<Regex>,
    format: &'static str,
}

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("static date pattern")
}

static RE_DASH: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?P<date>(20|19|18)\d{2}(0[1-9]|1[0-2])[0-3]\d-\d{6})"));
static RE_UNDERSCORE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?P<date>(20|19|18)\d{2}(0[1-9]|1[0-2])[0-3]\d_\d{6})"));
static RE_DASHED_FIELDS: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?P<date>(20|19|18)\d{2}-(0[1-9]|1[0-2])-[0-3]\d-\d{2}-\d{2}-\d{2})")
});
static RE_DASHED_DATE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?P<date>(20|19|18)\d{2}-(0[1-9]|1[0-2])-[0-3]\d-\d{6})"));
static RE_STAMP: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?P<date>(20|19|18)\d{2}-(0[1-9]|1[0-2])-[0-3]\d@\d{2}-\d{2}-\d{2})")
});
static RE_COMPACT: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?P<date>(20|19|18)\d{2}(0[1-9]|1[0-2])[0-3]\d{7})"));
static RE_UNDERSCORED_FIELDS: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?P<date>(20|19|18)\d{2}_(0[1-9]|1[0-2])_[0-3]\d_\d{2}_\d{2}_\d{2})")
});

const COMPACT_FORMAT: &str = "%Y%m%d%H%M%S";

static PATTERNS: &[DatePattern] = &[
    DatePattern { regex: &RE_DASH, format: "%Y%m%d-%H%M%S" },
    DatePattern { regex: &RE_UNDERSCORE, format: "%Y%m%d_%H%M%S" },
    DatePattern { regex: &RE_DASHED_FIELDS, format: "%Y-%m-%d-%H-%M-%S" },
    DatePattern { regex: &RE_DASHED_DATE, format: "%Y-%m-%d-%H%M%S" },
    DatePattern { regex: &RE_STAMP, format: "%Y-%m-%d@%H-%M-%S" },
    DatePattern { regex: &RE_COMPACT, format: COMPACT_FORMAT },
    DatePattern { regex: &RE_UNDERSCORED_FIELDS, format: "%Y_%m_%d_%H_%M_%S" },
];

/// Read a wall-clock time out of a date-encoded basename.
pub fn guess_date_from_filename(filename: &str) -> Option<NaiveDateTime> {
    let basename = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename);

    for pat in PATTERNS {
        let Some(date_str) = pat.regex.captures(basename).and_then(|c| c.name("date")) else {
            continue;
        };
        // Arranged names append a sequence number to the compact form.
        let s = if pat.format == COMPACT_FORMAT {
            &date_str.as_str()[..14]
        } else {
            date_str.as_str()
        };
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, pat.format) {
            return Some(dt);
        }
    }

    None
}
