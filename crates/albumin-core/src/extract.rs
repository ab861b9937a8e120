use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use filetime::FileTime;

use crate::date::{exif, Method};
use crate::error::Result;

/// Raw tag readings for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagRecord {
    pub path: PathBuf,
    pub tags: BTreeMap<String, String>,
}

/// Source of raw date evidence. Implementations may return a subset of
/// the requested tags per file, or omit a file entirely.
pub trait ExtractionAdapter {
    fn extract(&self, tag_names: &[&str], paths: &[PathBuf]) -> Result<Vec<TagRecord>>;
}

/// Reads EXIF from image files and file-level facts from the filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExifAdapter;

impl ExifAdapter {
    fn read(path: &Path) -> BTreeMap<String, String> {
        let mut tags: BTreeMap<String, String> = exif::read_exif_dates(path)
            .into_iter()
            .map(|(tag, raw)| (tag.to_string(), raw))
            .collect();

        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            tags.insert(Method::FilenameDateTime.tag().to_string(), name.to_string());
        }
        if let Ok(meta) = std::fs::metadata(path) {
            let mtime = FileTime::from_last_modification_time(&meta);
            tags.insert(
                Method::FileModifyTime.tag().to_string(),
                mtime.unix_seconds().to_string(),
            );
        }
        tags
    }
}

impl ExtractionAdapter for ExifAdapter {
    fn extract(&self, tag_names: &[&str], paths: &[PathBuf]) -> Result<Vec<TagRecord>> {
        let records = paths
            .iter()
            .filter_map(|path| {
                let tags: BTreeMap<String, String> = Self::read(path)
                    .into_iter()
                    .filter(|(tag, _)| tag_names.contains(&tag.as_str()))
                    .collect();
                if tags.is_empty() {
                    tracing::debug!(path = %path.display(), "nothing extractable");
                    return None;
                }
                Some(TagRecord {
                    path: path.clone(),
                    tags,
                })
            })
            .collect();
        Ok(records)
    }
}

/// Fixed tag readings, e.g. manual evidence entered by a user.
#[derive(Debug, Clone, Default)]
pub struct MemoryAdapter {
    records: BTreeMap<PathBuf, BTreeMap<String, String>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(
        mut self,
        path: impl Into<PathBuf>,
        tag: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.insert(path, tag, value);
        self
    }

    pub fn insert(
        &mut self,
        path: impl Into<PathBuf>,
        tag: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.records
            .entry(path.into())
            .or_default()
            .insert(tag.into(), value.into());
    }
}

impl ExtractionAdapter for MemoryAdapter {
    fn extract(&self, tag_names: &[&str], paths: &[PathBuf]) -> Result<Vec<TagRecord>> {
        Ok(paths
            .iter()
            .filter_map(|path| {
                let tags: BTreeMap<String, String> = self
                    .records
                    .get(path)?
                    .iter()
                    .filter(|(tag, _)| tag_names.contains(&tag.as_str()))
                    .map(|(t, v)| (t.clone(), v.clone()))
                    .collect();
                (!tags.is_empty()).then(|| TagRecord {
                    path: path.clone(),
                    tags,
                })
            })
            .collect())
    }
}
