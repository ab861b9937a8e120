use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

use crate::date::{Method, TimestampCandidate};
use crate::error::ConflictError;
use crate::extract::TagRecord;

/// Raw `(tag, value)` readings per file.
pub type RawEvidence = BTreeMap<PathBuf, Vec<(String, String)>>;

/// Best candidate per file, plus the files nothing could be read from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub candidates: BTreeMap<PathBuf, TimestampCandidate>,
    pub remaining: BTreeSet<PathBuf>,
}

/// Turn adapter output into evidence covering every file in `paths`.
/// Files the adapter omitted get an empty reading.
pub fn evidence_from_records(paths: &[PathBuf], records: Vec<TagRecord>) -> RawEvidence {
    let mut evidence: RawEvidence = paths.iter().map(|p| (p.clone(), Vec::new())).collect();
    for record in records {
        evidence
            .entry(record.path)
            .or_default()
            .extend(record.tags);
    }
    evidence
}

/// Collapse each file's readings into its single best candidate.
///
/// Values that name an unknown method or match no accepted layout are
/// skipped. Disagreement at the winning precedence is a conflict.
pub fn resolve(evidence: &RawEvidence) -> Result<Resolution, ConflictError> {
    let mut resolution = Resolution::default();

    for (path, readings) in evidence {
        let parsed: Vec<TimestampCandidate> = readings
            .iter()
            .filter_map(|(tag, raw)| match TimestampCandidate::parse(tag, raw) {
                Ok(candidate) => Some(candidate),
                Err(err) => {
                    tracing::debug!(path = %path.display(), %tag, %err, "discarding reading");
                    None
                }
            })
            .collect();

        match select_best(&path.display().to_string(), &parsed)? {
            Some(best) => {
                resolution.candidates.insert(path.clone(), best);
            }
            None => {
                resolution.remaining.insert(path.clone());
            }
        }
    }

    Ok(resolution)
}

/// Pick the highest-precedence candidate: the first method in the
/// precedence list that has any evidence wins. Every candidate at that
/// method must agree on the time.
pub fn select_best<'a>(
    subject: &str,
    candidates: impl IntoIterator<Item = &'a TimestampCandidate>,
) -> Result<Option<TimestampCandidate>, ConflictError> {
    let mut by_method: HashMap<Method, Vec<&TimestampCandidate>> = HashMap::new();
    for candidate in candidates {
        by_method.entry(candidate.method).or_default().push(candidate);
    }

    let Some(top) = Method::ALL.iter().find_map(|m| by_method.get(m)) else {
        return Ok(None);
    };
    let first = top[0];
    if let Some(other) = top.iter().find(|c| !c.time.agrees_with(&first.time)) {
        tracing::warn!(%subject, %first, %other, "conflicting timestamp evidence");
        return Err(ConflictError {
            subject: subject.to_string(),
            first: first.clone(),
            second: (*other).clone(),
        });
    }
    Ok(Some(first.clone()))
}
