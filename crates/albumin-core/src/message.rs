//! Batch messages: the text record of one import.
//!
//! ```text
//! Batch: 20240101T120000Z
//!
//! [tags]
//! event: trip
//!
//! [report]
//! [K+] SHA256E-s1000--abc.jpg
//! [ F] :: a.jpg
//! [ T] :: 2015-05-16 14:04:29 +0000 @ (UTC) (ExifTool/EXIF/DateTimeOriginal)
//! ```
//!
//! Lines starting with `#` are ignored when parsing.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::{ReportParseError, ValidationError};
use crate::report::Report;
use crate::store::validate_user_field;

const TITLE_PREFIX: &str = "Batch: ";
const TAGS_HEADER: &str = "[tags]";
const REPORT_HEADER: &str = "[report]";

/// Layout of batch labels, derived from the import time.
pub const LABEL_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Label for a batch imported at `at`.
pub fn batch_label(at: DateTime<Utc>) -> String {
    at.format(LABEL_FORMAT).to_string()
}

/// Split a user tag written `name:value`. The name must not collide
/// with internal fields.
pub fn parse_tag(text: &str) -> Result<(String, String), ValidationError> {
    let (name, value) = text
        .split_once(':')
        .ok_or_else(|| ValidationError::MalformedTag(text.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::MalformedTag(text.to_string()));
    }
    validate_user_field(name)?;
    Ok((name.to_string(), value.trim().to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchMessage {
    pub label: String,
    pub tags: BTreeMap<String, String>,
    pub report: Report,
}

impl BatchMessage {
    pub fn new(label: impl Into<String>, tags: BTreeMap<String, String>, report: Report) -> Self {
        Self {
            label: label.into(),
            tags,
            report,
        }
    }

    pub fn title(&self) -> String {
        format!("{TITLE_PREFIX}{}", self.label)
    }

    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![self.title(), String::new(), TAGS_HEADER.to_string()];
        lines.extend(self.tags.iter().map(|(k, v)| format!("{k}: {v}")));
        lines.push(String::new());
        lines.push(REPORT_HEADER.to_string());
        lines.extend(self.report.short());
        lines
    }

    pub fn parse(text: &str) -> Result<Self, ReportParseError> {
        let lines: Vec<&str> = text.lines().collect();
        let mut label = None;
        let mut tags = BTreeMap::new();
        let mut in_tags = false;
        let mut report_start = None;

        for (idx, line) in lines.iter().enumerate() {
            let line_no = idx + 1;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            if label.is_none() {
                let rest = line
                    .strip_prefix(TITLE_PREFIX)
                    .ok_or_else(|| ReportParseError::new(line_no, "expected a batch title"))?;
                label = Some(rest.trim().to_string());
                continue;
            }
            match *line {
                TAGS_HEADER => in_tags = true,
                REPORT_HEADER => {
                    report_start = Some(idx + 1);
                    break;
                }
                _ if in_tags => {
                    let (name, value) = parse_tag(line)
                        .map_err(|e| ReportParseError::new(line_no, e.to_string()))?;
                    tags.insert(name, value);
                }
                _ => {
                    return Err(ReportParseError::new(
                        line_no,
                        format!("unexpected line {line:?}"),
                    ))
                }
            }
        }

        let label = label.ok_or_else(|| ReportParseError::new(1, "missing batch title"))?;
        let start = report_start
            .ok_or_else(|| ReportParseError::new(lines.len(), "missing [report] section"))?;
        let report = Report::parse(&lines[start..]).map_err(|e| ReportParseError {
            line: e.line + start,
            reason: e.reason,
        })?;

        Ok(Self { label, tags, report })
    }
}

impl fmt::Display for BatchMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines().join("\n"))
    }
}
