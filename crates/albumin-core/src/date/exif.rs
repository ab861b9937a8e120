use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use exif::{Exif, In, Reader, Tag, Value};

use super::Method;

/// EXIF date fields and the offset field that qualifies each one.
const DATE_TAGS: &[(Tag, Tag, Method)] = &[
    (Tag::DateTimeOriginal, Tag::OffsetTimeOriginal, Method::ExifDateTimeOriginal),
    (Tag::DateTimeDigitized, Tag::OffsetTimeDigitized, Method::ExifCreateDate),
];

/// Read the raw EXIF date strings of an image, keyed by extractor tag.
/// EXIF datetimes have no zone unless an OffsetTime field accompanies them.
pub fn read_exif_dates(path: &Path) -> Vec<(&'static str, String)> {
    let Ok(file) = File::open(path) else {
        return vec![];
    };
    let Ok(exif) = Reader::new().read_from_container(&mut BufReader::new(file)) else {
        return vec![];
    };

    DATE_TAGS
        .iter()
        .filter_map(|&(date_tag, offset_tag, method)| {
            let date = ascii_field(&exif, date_tag)?;
            let mut raw = normalize_exif_datetime(&date);
            if let Some(offset) = ascii_field(&exif, offset_tag) {
                raw.push_str(offset.trim());
            }
            Some((method.tag(), raw))
        })
        .collect()
}

fn ascii_field(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Ascii(parts) => parts
            .first()
            .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

/// Cameras disagree on the date separator; EXIF mandates colons.
fn normalize_exif_datetime(s: &str) -> String {
    let (date, rest) = s.split_at(s.find(' ').unwrap_or(s.len()));
    let date: String = date
        .chars()
        .map(|c| if matches!(c, '-' | '/' | '\\' | '.') { ':' } else { c })
        .collect();
    format!("{date}{rest}")
}
