pub mod arrange;
pub mod date;
pub mod error;
pub mod extract;
pub mod identity;
pub mod message;
pub mod reconcile;
pub mod report;
pub mod resolve;
pub mod scan;
pub mod store;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::Utc;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::info;

pub use arrange::Arranger;
pub use date::{CandidateTime, Method, TimestampCandidate};
pub use error::{
    CapacityError, ConflictError, Error, IncompleteInformationError, ReportParseError, Result,
    ValidationError,
};
pub use extract::{ExifAdapter, ExtractionAdapter, MemoryAdapter};
pub use identity::{ContentIdentifier, Identity, Sha256Identifier};
pub use message::BatchMessage;
pub use reconcile::Reconciler;
pub use report::Report;
pub use store::{JsonStore, MemoryStore, MetadataStore};

/// Environment variable naming the default library directory.
pub const LIBRARY_ENV: &str = "ALBUMIN_LIBRARY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeOptions {
    /// File or directory to analyze.
    pub path: PathBuf,
    /// IANA zone for timestamps without one.
    #[serde(default)]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportOptions {
    pub source: PathBuf,
    pub library: PathBuf,
    #[serde(default)]
    pub timezone: Option<String>,
    /// User tags written `name:value`, applied to every imported file.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Import files with no date information instead of refusing.
    #[serde(default)]
    pub allow_unknown: bool,
    /// Batch label; derived from the import time when absent.
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrangeOptions {
    pub path: PathBuf,
    pub library: PathBuf,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportResult {
    pub message: BatchMessage,
    pub renamed: usize,
}

fn zone_option(name: Option<&str>) -> Result<Option<Tz>> {
    Ok(name.map(date::parse_zone).transpose()?)
}

/// Report what importing `options.path` would change in the store.
pub fn analyze<A, S>(
    options: &AnalyzeOptions,
    adapter: &A,
    identifier: &dyn ContentIdentifier,
    store: &S,
) -> Result<Report>
where
    A: ExtractionAdapter + ?Sized,
    S: MetadataStore + ?Sized,
{
    let timezone = zone_option(options.timezone.as_deref())?;
    let files = scan::media_files(&options.path)?;
    let identities = identity::identify_all(identifier, &files)?;
    Reconciler::new(adapter, store).diff(&identities, timezone)
}

/// Report the timestamps the files under `options.path` would get
/// outside any library. Files are keyed by path and never hashed, and
/// there is no stored state to compare against.
pub fn analyze_files<A>(options: &AnalyzeOptions, adapter: &A) -> Result<Report>
where
    A: ExtractionAdapter + ?Sized,
{
    let timezone = zone_option(options.timezone.as_deref())?;
    let files = scan::media_files(&options.path)?;
    Reconciler::new(adapter, &MemoryStore::new()).diff_files(&files, timezone)
}

/// Reconcile, tag and arrange a batch of files into the library.
///
/// Nothing is written when the batch has conflicts, or files without
/// any date while `allow_unknown` is off.
pub fn import<A, S>(
    options: &ImportOptions,
    adapter: &A,
    identifier: &dyn ContentIdentifier,
    store: &mut S,
) -> Result<ImportResult>
where
    A: ExtractionAdapter + ?Sized,
    S: MetadataStore + ?Sized,
{
    let timezone = zone_option(options.timezone.as_deref())?;
    let tags = options
        .tags
        .iter()
        .map(|t| message::parse_tag(t))
        .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;

    let files = scan::media_files(&options.source)?;
    let identities = identity::identify_all(identifier, &files)?;
    let report = Reconciler::new(adapter, &*store).diff(&identities, timezone)?;
    if !options.allow_unknown {
        reconcile::require_complete(&report)?;
    }

    reconcile::apply(&report, store)?;
    let unique: BTreeSet<&Identity> = identities.values().collect();
    for identity in unique {
        for (name, value) in &tags {
            store.set(identity, name, value)?;
        }
    }

    let label = options
        .label
        .clone()
        .unwrap_or_else(|| message::batch_label(Utc::now()));
    let resolved = reconcile::effective_timestamps(&identities, &*store)?;
    let renamed = Arranger::new(&options.library, identifier).arrange(&identities, &resolved, &label)?;

    info!(%label, files = identities.len(), renamed, "imported batch");
    Ok(ImportResult {
        message: BatchMessage::new(label, tags, report),
        renamed,
    })
}

/// Arrange already-dated files under `<library>/<label>/` using the
/// timestamps in the store.
pub fn arrange_batch<S: MetadataStore + ?Sized>(
    options: &ArrangeOptions,
    identifier: &dyn ContentIdentifier,
    store: &S,
) -> Result<usize> {
    let files = scan::media_files(&options.path)?;
    let identities = identity::identify_all(identifier, &files)?;
    let resolved = reconcile::effective_timestamps(&identities, store)?;
    Arranger::new(&options.library, identifier).arrange(&identities, &resolved, &options.label)
}

/// Record a manual timestamp for `identity`. The value is localized in
/// `timezone`, else the stored zone, else UTC.
pub fn fix<S: MetadataStore + ?Sized>(
    store: &mut S,
    identity: &Identity,
    method: Method,
    raw: &str,
    timezone: Option<Tz>,
) -> Result<TimestampCandidate> {
    let candidate = TimestampCandidate::from_raw(method, raw)?;
    let zone = match timezone {
        Some(tz) => tz,
        None => store::stored_zone(&*store, identity)?.unwrap_or(Tz::UTC),
    };
    let candidate = candidate.localized(zone);
    store::record_timestamp(store, identity, &candidate)?;
    info!(%identity, %candidate, "fixed timestamp");
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn import_options(source: &Path, library: &Path) -> ImportOptions {
        ImportOptions {
            source: source.to_path_buf(),
            library: library.to_path_buf(),
            timezone: None,
            tags: vec!["event:trip".to_string()],
            allow_unknown: false,
            label: Some("20240101T120000Z".to_string()),
        }
    }

    #[test]
    fn test_import_dates_tags_and_arranges() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("card");
        let library = dir.path().join("library");
        let a = source.join("DCIM").join("a.jpg");
        let b = source.join("DCIM").join("b.jpg");
        write(&a, "a");
        write(&b, "b");

        let adapter = MemoryAdapter::new()
            .with_tag(&a, "EXIF:DateTimeOriginal", "2015:05:16 14:04:29")
            .with_tag(&b, "File:FileModifyDate", "1431785069");
        let mut store = MemoryStore::new();

        let result = import(
            &import_options(&source, &library),
            &adapter,
            &Sha256Identifier,
            &mut store,
        )
        .unwrap();

        assert_eq!(result.renamed, 2);
        assert_eq!(result.message.report.additions().count(), 2);
        let batch = library.join("20240101T120000Z");
        assert_eq!(fs::read_to_string(batch.join("2015051614042900.jpg")).unwrap(), "a");
        assert_eq!(fs::read_to_string(batch.join("2015051614042901.jpg")).unwrap(), "b");
        assert!(!source.join("DCIM").exists());

        let id = Sha256Identifier.identify(&batch.join("2015051614042900.jpg")).unwrap();
        assert_eq!(store.get(&id, "event").unwrap().as_deref(), Some("trip"));
        assert_eq!(store.get(&id, store::DATETIME).unwrap().as_deref(), Some("2015-05-16@14-04-29"));

        let parsed = BatchMessage::parse(&result.message.to_string()).unwrap();
        assert_eq!(parsed, result.message);
    }

    #[test]
    fn test_import_refuses_undated_files() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("card");
        let a = source.join("a.jpg");
        let b = source.join("b.jpg");
        write(&a, "a");
        write(&b, "b");
        let adapter = MemoryAdapter::new().with_tag(&a, "EXIF:DateTimeOriginal", "2015:05:16 14:04:29");
        let mut store = MemoryStore::new();

        let err = import(
            &import_options(&source, &dir.path().join("library")),
            &adapter,
            &Sha256Identifier,
            &mut store,
        )
        .unwrap_err();

        match err {
            Error::Incomplete(e) => assert_eq!(e.files, [b.clone()]),
            other => panic!("expected incomplete information, got {other:?}"),
        }
        assert_eq!(store.keys().count(), 0);
        assert!(a.exists() && b.exists());
    }

    #[test]
    fn test_import_with_conflicting_copies_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("card");
        let a = source.join("a.jpg");
        let b = source.join("b.jpg");
        write(&a, "same");
        write(&b, "same");
        let adapter = MemoryAdapter::new()
            .with_tag(&a, "EXIF:DateTimeOriginal", "2015:05:16 14:04:29")
            .with_tag(&b, "EXIF:DateTimeOriginal", "2016:01:01 00:00:00");
        let mut store = MemoryStore::new();
        let library = dir.path().join("library");

        let err = import(&import_options(&source, &library), &adapter, &Sha256Identifier, &mut store)
            .unwrap_err();

        assert!(matches!(err, Error::Conflict(_)), "expected conflict, got {err:?}");
        assert_eq!(store.keys().count(), 0);
        assert_eq!(fs::read_to_string(&a).unwrap(), "same");
        assert_eq!(fs::read_to_string(&b).unwrap(), "same");
        assert!(!library.exists());
    }

    #[test]
    fn test_import_allowing_unknown_leaves_undated_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("card");
        let a = source.join("a.jpg");
        let b = source.join("b.jpg");
        write(&a, "a");
        write(&b, "b");
        let adapter = MemoryAdapter::new().with_tag(&a, "EXIF:DateTimeOriginal", "2015:05:16 14:04:29");
        let mut store = MemoryStore::new();
        let options = ImportOptions {
            allow_unknown: true,
            ..import_options(&source, &dir.path().join("library"))
        };

        let result = import(&options, &adapter, &Sha256Identifier, &mut store).unwrap();

        assert_eq!(result.renamed, 1);
        assert_eq!(result.message.report.remaining().count(), 1);
        assert!(b.exists());
    }

    #[test]
    fn test_import_rejects_reserved_tags() {
        let dir = tempfile::tempdir().unwrap();
        let options = ImportOptions {
            tags: vec!["datetime:2020".to_string()],
            ..import_options(dir.path(), dir.path())
        };
        let err = import(&options, &MemoryAdapter::new(), &Sha256Identifier, &mut MemoryStore::new())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::ReservedTag(_))));
    }

    #[test]
    fn test_manual_fix_outranks_exif_in_analysis() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        write(&a, "a");
        let id = Sha256Identifier.identify(&a).unwrap();
        let adapter = MemoryAdapter::new().with_tag(&a, "EXIF:DateTimeOriginal", "2015:05:16 14:04:29");
        let mut store = MemoryStore::new();
        let options = AnalyzeOptions {
            path: dir.path().to_path_buf(),
            timezone: None,
        };

        assert_eq!(analyze(&options, &adapter, &Sha256Identifier, &store).unwrap().additions().count(), 1);

        let tz = date::parse_zone("Europe/Istanbul").unwrap();
        let fixed = fix(&mut store, &id, Method::ManualTrusted, "2014-01-01@10-00-00", Some(tz)).unwrap();
        assert_eq!(fixed.zone(), Some(tz));

        let report = analyze(&options, &adapter, &Sha256Identifier, &store).unwrap();
        assert_eq!(report.redundants().count(), 1);
    }

    #[test]
    fn test_fix_rejects_garbage() {
        let err = fix(&mut MemoryStore::new(), &Identity::from("K"), Method::ManualTrusted, "soon", None)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::UnparseableTimestamp(_))));
    }

    #[test]
    fn test_analyze_files_keys_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        let b = dir.path().join("b.jpg");
        write(&a, "same");
        write(&b, "same");
        let adapter = MemoryAdapter::new()
            .with_tag(&a, "EXIF:DateTimeOriginal", "2015:05:16 14:04:29")
            .with_tag(&b, "EXIF:DateTimeOriginal", "2016:01:01 00:00:00");
        let options = AnalyzeOptions {
            path: dir.path().to_path_buf(),
            timezone: None,
        };

        // Identical content only conflicts once files share an identity.
        let report = analyze_files(&options, &adapter).unwrap();
        assert_eq!(report.keying(), report::Keying::Files);
        assert_eq!(report.additions().count(), 2);
        assert!(matches!(
            analyze(&options, &adapter, &Sha256Identifier, &MemoryStore::new()),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn test_unknown_zone_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let options = AnalyzeOptions {
            path: dir.path().to_path_buf(),
            timezone: Some("Mars/Olympus".to_string()),
        };
        let err = analyze(&options, &MemoryAdapter::new(), &Sha256Identifier, &MemoryStore::new()).unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::UnknownTimeZone(_))));
    }

    #[test]
    fn test_arrange_batch_uses_stored_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let incoming = dir.path().join("incoming");
        let a = incoming.join("a.jpg");
        write(&a, "a");
        let mut store = MemoryStore::new();
        let id = Sha256Identifier.identify(&a).unwrap();
        fix(&mut store, &id, Method::ManualUntrusted, "2010:02:03 04:05:06", None).unwrap();

        let options = ArrangeOptions {
            path: incoming.clone(),
            library: dir.path().to_path_buf(),
            label: "manual".to_string(),
        };
        assert_eq!(arrange_batch(&options, &Sha256Identifier, &store).unwrap(), 1);
        assert!(dir.path().join("manual").join("2010020304050600.jpg").exists());
        assert!(!incoming.exists());

        let again = ArrangeOptions {
            path: dir.path().join("manual"),
            ..options
        };
        assert_eq!(arrange_batch(&again, &Sha256Identifier, &store).unwrap(), 0);
    }
}
