//! Outcome of reconciling a batch of files against the metadata store.
//!
//! # Text schema (version 1)
//!
//! [`Report::short`] emits one record per file, in four sections:
//! unknown, updated, new, redundant. A record opens with a header line
//! whose four-character prefix names the primary key and outcome, then
//! continuation lines:
//!
//! ```text
//! [K!] <identity>                 [F!] <file>
//! [ F] :: <file>                  [ T] :: <new timestamp>
//! [ T] :: <new timestamp>         [ t] :: <old timestamp>
//! [ t] :: <old timestamp>
//! ```
//!
//! `?` marks files without any information, `+` new timestamps, `!`
//! replaced timestamps and `=` files whose stored timestamp stands.
//! Timestamps use the `Display` form of [`TimestampCandidate`].
//! [`Report::parse`] inverts `short` and ignores `#` comment lines.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::date::TimestampCandidate;
use crate::error::ReportParseError;
use crate::identity::Identity;

/// A path ordered by directory first, then basename.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LexicalPath(PathBuf);

impl LexicalPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    fn key(&self) -> (&OsStr, &OsStr) {
        let dir = self.0.parent().map(Path::as_os_str).unwrap_or_default();
        let name = self.0.file_name().unwrap_or_default();
        (dir, name)
    }
}

impl Ord for LexicalPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key()
            .cmp(&other.key())
            .then_with(|| self.0.as_os_str().cmp(other.0.as_os_str()))
    }
}

impl PartialOrd for LexicalPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<PathBuf> for LexicalPath {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

/// Which key heads each record in the text form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keying {
    Files,
    Identities,
}

impl Keying {
    fn symbol(self) -> char {
        match self {
            Keying::Files => 'F',
            Keying::Identities => 'K',
        }
    }
}

/// A timestamp to write for an identity, and what it replaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub new: TimestampCandidate,
    pub old: Option<TimestampCandidate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// No evidence and nothing stored.
    Unknown,
    Added { new: TimestampCandidate },
    Updated { new: TimestampCandidate, old: TimestampCandidate },
    /// The stored timestamp stands.
    Redundant,
}

impl Outcome {
    fn kind(&self) -> Kind {
        match self {
            Outcome::Unknown => Kind::Unknown,
            Outcome::Added { .. } => Kind::Added,
            Outcome::Updated { .. } => Kind::Updated,
            Outcome::Redundant => Kind::Redundant,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Unknown,
    Updated,
    Added,
    Redundant,
}

/// Order of sections in the text form.
const SECTIONS: [Kind; 4] = [Kind::Unknown, Kind::Updated, Kind::Added, Kind::Redundant];

impl Kind {
    fn symbol(self) -> char {
        match self {
            Kind::Unknown => '?',
            Kind::Updated => '!',
            Kind::Added => '+',
            Kind::Redundant => '=',
        }
    }

    fn from_symbol(c: char) -> Option<Self> {
        SECTIONS.into_iter().find(|k| k.symbol() == c)
    }

    fn heading(self, keying: Keying) -> &'static str {
        match (self, keying) {
            (Kind::Unknown, _) => "No Information:",
            (Kind::Updated, Keying::Files) => "Updated Files:",
            (Kind::Updated, Keying::Identities) => "Updated Keys:",
            (Kind::Added, Keying::Files) => "New Files:",
            (Kind::Added, Keying::Identities) => "New Keys:",
            (Kind::Redundant, Keying::Files) => "Redundant Files:",
            (Kind::Redundant, Keying::Identities) => "Redundant Keys:",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub identity: Identity,
    pub outcome: Outcome,
}

const FILE_PREFIX: &str = "[ F] :: ";
const NEW_PREFIX: &str = "[ T] :: ";
const OLD_PREFIX: &str = "[ t] :: ";

/// Immutable classification of every file in a batch.
///
/// Each file holds exactly one [`Outcome`], so the four categories
/// partition the file set. Equality ignores [`Keying`], which only
/// affects rendering.
#[derive(Debug, Clone)]
pub struct Report {
    keying: Keying,
    entries: BTreeMap<LexicalPath, Entry>,
}

impl PartialEq for Report {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for Report {}

impl Report {
    /// Classify `files` against updates keyed by identity. Files with
    /// no update are unknown when listed in `remaining`, redundant
    /// otherwise.
    pub fn new(
        files: BTreeMap<PathBuf, Identity>,
        updates: &BTreeMap<Identity, Update>,
        remaining: &BTreeSet<PathBuf>,
    ) -> Self {
        Self::build(Keying::Identities, files, updates, remaining)
    }

    /// A report whose files are their own identities.
    pub fn by_file(
        files: impl IntoIterator<Item = PathBuf>,
        updates: BTreeMap<PathBuf, Update>,
        remaining: &BTreeSet<PathBuf>,
    ) -> Self {
        let files: BTreeMap<PathBuf, Identity> = files
            .into_iter()
            .map(|f| {
                let identity = path_identity(&f);
                (f, identity)
            })
            .collect();
        let updates: BTreeMap<Identity, Update> = updates
            .into_iter()
            .map(|(f, u)| (path_identity(&f), u))
            .collect();
        Self::build(Keying::Files, files, &updates, remaining)
    }

    fn build(
        keying: Keying,
        files: BTreeMap<PathBuf, Identity>,
        updates: &BTreeMap<Identity, Update>,
        remaining: &BTreeSet<PathBuf>,
    ) -> Self {
        let entries = files
            .into_iter()
            .map(|(file, identity)| {
                let outcome = match updates.get(&identity) {
                    Some(Update { new, old: Some(old) }) => Outcome::Updated {
                        new: new.clone(),
                        old: old.clone(),
                    },
                    Some(Update { new, old: None }) => Outcome::Added { new: new.clone() },
                    None if remaining.contains(&file) => Outcome::Unknown,
                    None => Outcome::Redundant,
                };
                (LexicalPath(file), Entry { identity, outcome })
            })
            .collect();
        Self { keying, entries }
    }

    pub fn keying(&self) -> Keying {
        self.keying
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every file and its identity, in lexical order.
    pub fn files(&self) -> impl Iterator<Item = (&Path, &Identity)> {
        self.entries.iter().map(|(p, e)| (p.as_path(), &e.identity))
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Path, &Entry)> {
        self.entries.iter().map(|(p, e)| (p.as_path(), e))
    }

    pub fn additions(&self) -> impl Iterator<Item = (&Path, &Identity, &TimestampCandidate)> {
        self.entries.iter().filter_map(|(p, e)| match &e.outcome {
            Outcome::Added { new } => Some((p.as_path(), &e.identity, new)),
            _ => None,
        })
    }

    pub fn overwrites(
        &self,
    ) -> impl Iterator<Item = (&Path, &Identity, &TimestampCandidate, &TimestampCandidate)> {
        self.entries.iter().filter_map(|(p, e)| match &e.outcome {
            Outcome::Updated { new, old } => Some((p.as_path(), &e.identity, new, old)),
            _ => None,
        })
    }

    pub fn redundants(&self) -> impl Iterator<Item = (&Path, &Identity)> {
        self.with_outcome(Kind::Redundant)
    }

    pub fn remaining(&self) -> impl Iterator<Item = (&Path, &Identity)> {
        self.with_outcome(Kind::Unknown)
    }

    fn with_outcome(&self, kind: Kind) -> impl Iterator<Item = (&Path, &Identity)> {
        self.entries
            .iter()
            .filter(move |(_, e)| e.outcome.kind() == kind)
            .map(|(p, e)| (p.as_path(), &e.identity))
    }

    /// Timestamps to write, keyed by identity.
    pub fn updates(&self) -> BTreeMap<Identity, Update> {
        self.entries
            .values()
            .filter_map(|e| {
                let update = match &e.outcome {
                    Outcome::Added { new } => Update { new: new.clone(), old: None },
                    Outcome::Updated { new, old } => Update {
                        new: new.clone(),
                        old: Some(old.clone()),
                    },
                    _ => return None,
                };
                Some((e.identity.clone(), update))
            })
            .collect()
    }

    /// Records in the line-oriented text schema.
    pub fn short(&self) -> impl Iterator<Item = String> + '_ {
        SECTIONS.into_iter().flat_map(move |kind| {
            self.entries
                .iter()
                .filter(move |(_, e)| e.outcome.kind() == kind)
                .flat_map(move |(path, entry)| self.record(path.as_path(), entry))
        })
    }

    fn record(&self, path: &Path, entry: &Entry) -> Vec<String> {
        let head = format!("[{}{}]", self.keying.symbol(), entry.outcome.kind().symbol());
        let mut lines = match self.keying {
            Keying::Identities => vec![
                format!("{head} {}", entry.identity),
                format!("{FILE_PREFIX}{}", path.display()),
            ],
            Keying::Files => vec![format!("{head} {}", path.display())],
        };
        match &entry.outcome {
            Outcome::Added { new } => lines.push(format!("{NEW_PREFIX}{new}")),
            Outcome::Updated { new, old } => {
                lines.push(format!("{NEW_PREFIX}{new}"));
                lines.push(format!("{OLD_PREFIX}{old}"));
            }
            Outcome::Unknown | Outcome::Redundant => {}
        }
        lines
    }

    /// Records grouped under section headings, blank line between groups.
    pub fn long(&self) -> impl Iterator<Item = String> + '_ {
        let keying = self.keying;
        let mut current: Option<&'static str> = None;
        self.short().flat_map(move |line| {
            let mut out = Vec::with_capacity(3);
            if let Some((_, kind, _)) = parse_header(&line) {
                let section = kind.heading(keying);
                if current != Some(section) {
                    if current.is_some() {
                        out.push(String::new());
                    }
                    current = Some(section);
                    out.push(section.to_string());
                }
            }
            out.push(format!("  {}", line.get(5..).unwrap_or_default()));
            out
        })
    }

    /// Rebuild a report from lines produced by [`Report::short`].
    pub fn parse<I, S>(lines: I) -> Result<Self, ReportParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut records: Vec<ParsedRecord> = Vec::new();

        for (idx, line) in lines.into_iter().enumerate() {
            let line_no = idx + 1;
            let line = line.as_ref();
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((keying, kind, subject)) = parse_header(line) {
                if subject.is_empty() {
                    return Err(ReportParseError::new(line_no, "record without a subject"));
                }
                records.push(ParsedRecord {
                    line: line_no,
                    keying,
                    kind,
                    subject: subject.to_string(),
                    file: None,
                    new: None,
                    old: None,
                });
                continue;
            }

            let record = records
                .last_mut()
                .ok_or_else(|| ReportParseError::new(line_no, "continuation before any record"))?;
            let timestamp = |text: &str| {
                TimestampCandidate::from_report_text(text)
                    .map_err(|e| ReportParseError::new(line_no, e.to_string()))
            };
            let (slot_name, filled) = if let Some(file) = line.strip_prefix(FILE_PREFIX) {
                ("file", record.file.replace(PathBuf::from(file)).is_some())
            } else if let Some(text) = line.strip_prefix(NEW_PREFIX) {
                ("new timestamp", record.new.replace(timestamp(text)?).is_some())
            } else if let Some(text) = line.strip_prefix(OLD_PREFIX) {
                ("old timestamp", record.old.replace(timestamp(text)?).is_some())
            } else {
                return Err(ReportParseError::new(line_no, format!("unrecognized line {line:?}")));
            };
            if filled {
                return Err(ReportParseError::new(line_no, format!("duplicate {slot_name}")));
            }
        }

        let keying = if records.iter().any(|r| r.keying == Keying::Identities) {
            Keying::Identities
        } else {
            Keying::Files
        };

        let mut files = BTreeMap::new();
        let mut updates: BTreeMap<Identity, Update> = BTreeMap::new();
        let mut remaining = BTreeSet::new();

        for record in &records {
            let (file, identity) = record.subject()?;
            if files.insert(file.clone(), identity.clone()).is_some() {
                return Err(record.error(format!("file {} listed twice", file.display())));
            }
            match record.kind {
                Kind::Unknown => {
                    remaining.insert(file);
                }
                Kind::Redundant => {}
                Kind::Added | Kind::Updated => {
                    let update = record.update()?;
                    if let Some(previous) = updates.get(&identity) {
                        if *previous != update {
                            return Err(record.error(format!("inconsistent updates for {identity}")));
                        }
                    }
                    updates.insert(identity, update);
                }
            }
        }

        let report = Self::build(keying, files, &updates, &remaining);

        // Files sharing an identity must share an outcome.
        for record in &records {
            let (file, _) = record.subject()?;
            let kind = report.entries[&LexicalPath(file)].outcome.kind();
            if kind != record.kind {
                return Err(record.error(format!(
                    "outcome {} contradicts other records of the same identity",
                    record.kind.symbol()
                )));
            }
        }

        Ok(report)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, line) in self.long().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            f.write_str(&line)?;
        }
        Ok(())
    }
}

fn path_identity(path: &Path) -> Identity {
    Identity::new(path.display().to_string())
}

fn parse_header(line: &str) -> Option<(Keying, Kind, &str)> {
    let mut chars = line.chars();
    if chars.next()? != '[' {
        return None;
    }
    let keying = match chars.next()? {
        'K' => Keying::Identities,
        'F' => Keying::Files,
        _ => return None,
    };
    let kind = Kind::from_symbol(chars.next()?)?;
    if chars.next()? != ']' {
        return None;
    }
    let rest = &line[4..];
    let subject = rest.strip_prefix(' ').unwrap_or(rest);
    Some((keying, kind, subject))
}

struct ParsedRecord {
    line: usize,
    keying: Keying,
    kind: Kind,
    subject: String,
    file: Option<PathBuf>,
    new: Option<TimestampCandidate>,
    old: Option<TimestampCandidate>,
}

impl ParsedRecord {
    fn error(&self, reason: impl Into<String>) -> ReportParseError {
        ReportParseError::new(self.line, reason)
    }

    fn subject(&self) -> Result<(PathBuf, Identity), ReportParseError> {
        match (self.keying, &self.file) {
            (Keying::Identities, Some(file)) => Ok((file.clone(), Identity::new(&self.subject))),
            (Keying::Identities, None) => Err(self.error("identity record without a file line")),
            (Keying::Files, None) => {
                let file = PathBuf::from(&self.subject);
                let identity = path_identity(&file);
                Ok((file, identity))
            }
            (Keying::Files, Some(_)) => Err(self.error("file record with a file line")),
        }
    }

    fn update(&self) -> Result<Update, ReportParseError> {
        let new = self
            .new
            .clone()
            .ok_or_else(|| self.error("missing new timestamp"))?;
        match (self.kind, &self.old) {
            (Kind::Added, None) => Ok(Update { new, old: None }),
            (Kind::Updated, Some(old)) => Ok(Update {
                new,
                old: Some(old.clone()),
            }),
            (Kind::Added, Some(_)) => Err(self.error("new record with an old timestamp")),
            _ => Err(self.error("missing old timestamp")),
        }
    }
}
