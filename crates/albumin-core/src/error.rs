use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::date::TimestampCandidate;

/// A method name or timestamp string that cannot form a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown timestamp method: {0:?}")]
    UnknownMethod(String),

    #[error("unrecognized timestamp: {0:?}")]
    UnparseableTimestamp(String),

    #[error("unknown time zone: {0:?}")]
    UnknownTimeZone(String),

    #[error("tag {0:?} is reserved for internal fields")]
    ReservedTag(String),

    #[error("malformed tag {0:?}, expected <name>:<value>")]
    MalformedTag(String),
}

/// Two candidates of equal, maximum precedence that disagree.
///
/// `subject` names the file or identity the evidence belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("conflicting timestamps for {subject}: {first} vs {second}")]
pub struct ConflictError {
    pub subject: String,
    pub first: TimestampCandidate,
    pub second: TimestampCandidate,
}

/// Every sequence number for one destination timestamp is occupied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("ran out of slots for {stem} in {}", dir.display())]
pub struct CapacityError {
    pub dir: PathBuf,
    pub stem: String,
}

/// Files for which no timestamp could be determined at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no date information for {} file(s): {}", files.len(), list_files(files))]
pub struct IncompleteInformationError {
    pub files: Vec<PathBuf>,
}

fn list_files(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|f| f.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Report or batch message text that does not follow the line schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {reason}")]
pub struct ReportParseError {
    pub line: usize,
    pub reason: String,
}

impl ReportParseError {
    pub(crate) fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Capacity(#[from] CapacityError),

    #[error(transparent)]
    Incomplete(#[from] IncompleteInformationError),

    #[error("malformed report: {0}")]
    ReportParse(#[from] ReportParseError),

    #[error("metadata store: {0}")]
    Store(#[from] serde_json::Error),

    #[error("unsupported metadata store version {0}")]
    UnsupportedStoreVersion(u32),

    #[error("corrupt metadata for {key}: field {field} = {value:?}")]
    CorruptField {
        key: String,
        field: String,
        value: String,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
