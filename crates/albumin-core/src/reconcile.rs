use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono_tz::Tz;
use tracing::{debug, info};

use crate::date::{Method, TimestampCandidate};
use crate::error::{IncompleteInformationError, Result};
use crate::extract::ExtractionAdapter;
use crate::identity::Identity;
use crate::report::{Report, Update};
use crate::resolve::{evidence_from_records, resolve, select_best};
use crate::store::{record_timestamp, stored_timestamp, stored_zone, MetadataStore};

/// Compares fresh evidence against stored timestamps.
pub struct Reconciler<'a, A: ?Sized, S: ?Sized> {
    adapter: &'a A,
    store: &'a S,
}

impl<'a, A, S> Reconciler<'a, A, S>
where
    A: ExtractionAdapter + ?Sized,
    S: MetadataStore + ?Sized,
{
    pub fn new(adapter: &'a A, store: &'a S) -> Self {
        Self { adapter, store }
    }

    /// Classify every file against the store. Conflicting evidence for
    /// one identity aborts the whole diff.
    pub fn diff(
        &self,
        files: &BTreeMap<PathBuf, Identity>,
        timezone: Option<Tz>,
    ) -> Result<Report> {
        let (updates, remaining) = self.reconcile(files, timezone)?;
        Ok(Report::new(files.clone(), &updates, &remaining))
    }

    /// Like [`Reconciler::diff`] for loose files, each its own identity.
    pub fn diff_files(&self, paths: &[PathBuf], timezone: Option<Tz>) -> Result<Report> {
        let files: BTreeMap<PathBuf, Identity> = paths
            .iter()
            .map(|p| (p.clone(), Identity::new(p.display().to_string())))
            .collect();
        let (updates, remaining) = self.reconcile(&files, timezone)?;
        let by_path: BTreeMap<PathBuf, Update> = files
            .iter()
            .filter_map(|(path, identity)| Some((path.clone(), updates.get(identity)?.clone())))
            .collect();
        Ok(Report::by_file(files.into_keys(), by_path, &remaining))
    }

    fn reconcile(
        &self,
        files: &BTreeMap<PathBuf, Identity>,
        timezone: Option<Tz>,
    ) -> Result<(BTreeMap<Identity, Update>, BTreeSet<PathBuf>)> {
        let paths: Vec<PathBuf> = files.keys().cloned().collect();
        let records = self.adapter.extract(&Method::tags(), &paths)?;
        let resolution = resolve(&evidence_from_records(&paths, records))?;

        let mut by_identity: BTreeMap<&Identity, Vec<&TimestampCandidate>> = BTreeMap::new();
        for (file, identity) in files {
            let candidates = by_identity.entry(identity).or_default();
            candidates.extend(resolution.candidates.get(file));
        }

        let mut updates = BTreeMap::new();
        let mut known: BTreeSet<&Identity> = BTreeSet::new();

        for (identity, candidates) in by_identity {
            let resolved = select_best(identity.as_str(), candidates).map_err(|mut conflict| {
                conflict.subject = format!("{identity} ({})", files_of(files, identity));
                conflict
            })?;
            let stored = stored_timestamp(self.store, identity)?;
            if stored.is_some() {
                known.insert(identity);
            }
            let Some(resolved) = resolved else {
                continue;
            };
            known.insert(identity);

            let resolved = if resolved.time.is_zoned() {
                resolved
            } else {
                let zone = match timezone {
                    Some(tz) => tz,
                    None => stored_zone(self.store, identity)?.unwrap_or(Tz::UTC),
                };
                resolved.localized(zone)
            };

            if needs_update(&resolved, stored.as_ref()) {
                debug!(%identity, new = %resolved, "timestamp needs update");
                updates.insert(
                    identity.clone(),
                    Update {
                        new: resolved,
                        old: stored,
                    },
                );
            }
        }

        let remaining: BTreeSet<PathBuf> = files
            .iter()
            .filter(|(_, identity)| !known.contains(identity))
            .map(|(file, _)| file.clone())
            .collect();

        info!(
            files = files.len(),
            updates = updates.len(),
            unknown = remaining.len(),
            "reconciled batch"
        );
        Ok((updates, remaining))
    }
}

fn files_of(files: &BTreeMap<PathBuf, Identity>, identity: &Identity) -> String {
    files
        .iter()
        .filter(|(_, i)| *i == identity)
        .map(|(f, _)| f.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Whether `resolved` should replace `stored`: it outranks it, or it has
/// the same method but a different time or zone.
pub fn needs_update(resolved: &TimestampCandidate, stored: Option<&TimestampCandidate>) -> bool {
    let Some(stored) = stored else {
        return true;
    };
    match resolved.method.cmp(&stored.method) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => {
            !resolved.time.agrees_with(&stored.time) || resolved.zone() != stored.zone()
        }
    }
}

/// Write every update of `report` into the store.
pub fn apply<S: MetadataStore + ?Sized>(report: &Report, store: &mut S) -> Result<usize> {
    let updates = report.updates();
    for (identity, update) in &updates {
        record_timestamp(store, identity, &update.new)?;
    }
    info!(count = updates.len(), "applied timestamp updates");
    Ok(updates.len())
}

/// Fail when any file has no timestamp information at all.
pub fn require_complete(report: &Report) -> std::result::Result<(), IncompleteInformationError> {
    let files: Vec<PathBuf> = report.remaining().map(|(p, _)| p.to_path_buf()).collect();
    if files.is_empty() {
        Ok(())
    } else {
        Err(IncompleteInformationError { files })
    }
}

/// The stored timestamp of each identity in `files` that has one.
pub fn effective_timestamps<S: MetadataStore + ?Sized>(
    files: &BTreeMap<PathBuf, Identity>,
    store: &S,
) -> Result<BTreeMap<Identity, TimestampCandidate>> {
    let mut timestamps = BTreeMap::new();
    for identity in files.values() {
        if timestamps.contains_key(identity) {
            continue;
        }
        if let Some(stored) = stored_timestamp(store, identity)? {
            timestamps.insert(identity.clone(), stored);
        }
    }
    Ok(timestamps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date::parse_zone;
    use crate::error::Error;
    use crate::extract::MemoryAdapter;
    use crate::store::{MemoryStore, DATETIME};

    fn files(pairs: &[(&str, &str)]) -> BTreeMap<PathBuf, Identity> {
        pairs
            .iter()
            .map(|(f, k)| (PathBuf::from(f), Identity::from(*k)))
            .collect()
    }

    #[test]
    fn test_new_files_and_unknown_files() {
        let adapter = MemoryAdapter::new().with_tag("a.jpg", "EXIF:DateTimeOriginal", "2015:05:16 14:04:29");
        let store = MemoryStore::new();
        let files = files(&[("a.jpg", "KA"), ("b.jpg", "KB")]);

        let report = Reconciler::new(&adapter, &store).diff(&files, None).unwrap();

        let added: Vec<_> = report.additions().map(|(p, ..)| p.to_path_buf()).collect();
        let unknown: Vec<_> = report.remaining().map(|(p, _)| p.to_path_buf()).collect();
        assert_eq!(added, [PathBuf::from("a.jpg")]);
        assert_eq!(unknown, [PathBuf::from("b.jpg")]);
        assert_eq!(report.overwrites().count(), 0);
        assert_eq!(report.redundants().count(), 0);

        let (_, _, new) = report.additions().next().unwrap();
        assert_eq!(new.zone(), Some(Tz::UTC));
    }

    #[test]
    fn test_manual_trust_is_not_overridden() {
        let mut store = MemoryStore::new();
        let trusted = TimestampCandidate::from_raw(Method::ManualTrusted, "2020:01:01 00:00:00")
            .unwrap()
            .localized(Tz::UTC);
        record_timestamp(&mut store, &Identity::from("KA"), &trusted).unwrap();

        let adapter = MemoryAdapter::new().with_tag("a.jpg", "EXIF:CreateDate", "2021:06:01 00:00:00");
        let files = files(&[("a.jpg", "KA")]);
        let report = Reconciler::new(&adapter, &store).diff(&files, None).unwrap();

        assert_eq!(report.redundants().count(), 1);
        assert!(report.updates().is_empty());
    }

    #[test]
    fn test_stored_but_no_new_evidence_is_redundant() {
        let mut store = MemoryStore::new();
        let stored = TimestampCandidate::from_raw(Method::ExifCreateDate, "2020:01:01 00:00:00")
            .unwrap()
            .localized(Tz::UTC);
        record_timestamp(&mut store, &Identity::from("KA"), &stored).unwrap();

        let adapter = MemoryAdapter::new();
        let report = Reconciler::new(&adapter, &store)
            .diff(&files(&[("a.jpg", "KA")]), None)
            .unwrap();
        assert_eq!(report.redundants().count(), 1);
        assert_eq!(report.remaining().count(), 0);
    }

    #[test]
    fn test_higher_precedence_overwrites() {
        let mut store = MemoryStore::new();
        let stored = TimestampCandidate::from_raw(Method::FileModifyTime, "1431785069").unwrap();
        record_timestamp(&mut store, &Identity::from("KA"), &stored).unwrap();

        let adapter = MemoryAdapter::new().with_tag("a.jpg", "EXIF:DateTimeOriginal", "2015:05:16 14:04:29");
        let report = Reconciler::new(&adapter, &store)
            .diff(&files(&[("a.jpg", "KA")]), None)
            .unwrap();

        let (_, _, new, old) = report.overwrites().next().unwrap();
        assert_eq!(new.method, Method::ExifDateTimeOriginal);
        assert_eq!(old.method, Method::FileModifyTime);
    }

    #[test]
    fn test_same_method_same_value_is_redundant_different_value_updates() {
        let mut store = MemoryStore::new();
        let stored = TimestampCandidate::from_raw(Method::ExifDateTimeOriginal, "2015:05:16 14:04:29")
            .unwrap()
            .localized(Tz::UTC);
        record_timestamp(&mut store, &Identity::from("KA"), &stored).unwrap();
        record_timestamp(&mut store, &Identity::from("KB"), &stored).unwrap();

        let adapter = MemoryAdapter::new()
            .with_tag("a.jpg", "EXIF:DateTimeOriginal", "2015:05:16 14:04:29")
            .with_tag("b.jpg", "EXIF:DateTimeOriginal", "2015:05:16 14:04:30");
        let report = Reconciler::new(&adapter, &store)
            .diff(&files(&[("a.jpg", "KA"), ("b.jpg", "KB")]), None)
            .unwrap();

        let redundant: Vec<_> = report.redundants().map(|(p, _)| p.to_path_buf()).collect();
        let updated: Vec<_> = report.overwrites().map(|(p, ..)| p.to_path_buf()).collect();
        assert_eq!(redundant, [PathBuf::from("a.jpg")]);
        assert_eq!(updated, [PathBuf::from("b.jpg")]);
    }

    #[test]
    fn test_zone_priority() {
        let istanbul = parse_zone("Europe/Istanbul").unwrap();
        let tokyo = parse_zone("Asia/Tokyo").unwrap();

        let mut store = MemoryStore::new();
        let stored = TimestampCandidate::from_raw(Method::FileModifyTime, "1431785069")
            .unwrap()
            .localized(istanbul);
        record_timestamp(&mut store, &Identity::from("KA"), &stored).unwrap();

        let adapter = MemoryAdapter::new()
            .with_tag("a.jpg", "EXIF:DateTimeOriginal", "2015:05:16 14:04:29")
            .with_tag("b.jpg", "EXIF:DateTimeOriginal", "2015:05:16 14:04:29");
        let files = files(&[("a.jpg", "KA"), ("b.jpg", "KB")]);
        let reconciler = Reconciler::new(&adapter, &store);

        // Stored zone for KA, UTC for the never-seen KB.
        let updates = reconciler.diff(&files, None).unwrap().updates();
        assert_eq!(updates[&Identity::from("KA")].new.zone(), Some(istanbul));
        assert_eq!(updates[&Identity::from("KB")].new.zone(), Some(Tz::UTC));

        // An explicit zone wins over both.
        let updates = reconciler.diff(&files, Some(tokyo)).unwrap().updates();
        assert_eq!(updates[&Identity::from("KA")].new.zone(), Some(tokyo));
        assert_eq!(updates[&Identity::from("KB")].new.zone(), Some(tokyo));
    }

    #[test]
    fn test_zone_change_alone_triggers_update() {
        let mut store = MemoryStore::new();
        let stored = TimestampCandidate::from_raw(Method::ExifDateTimeOriginal, "2015:05:16 14:04:29")
            .unwrap()
            .localized(Tz::UTC);
        record_timestamp(&mut store, &Identity::from("KA"), &stored).unwrap();

        let adapter = MemoryAdapter::new().with_tag("a.jpg", "EXIF:DateTimeOriginal", "2015:05:16 14:04:29");
        let files = files(&[("a.jpg", "KA")]);
        let reconciler = Reconciler::new(&adapter, &store);

        assert_eq!(reconciler.diff(&files, None).unwrap().overwrites().count(), 0);
        let tz = parse_zone("Europe/Istanbul").unwrap();
        assert_eq!(reconciler.diff(&files, Some(tz)).unwrap().overwrites().count(), 1);
    }

    #[test]
    fn test_conflict_across_files_of_one_identity() {
        let adapter = MemoryAdapter::new()
            .with_tag("a.jpg", "EXIF:DateTimeOriginal", "2015:05:16 14:04:29")
            .with_tag("copy/a.jpg", "EXIF:DateTimeOriginal", "2015:05:16 18:00:00");
        let store = MemoryStore::new();
        let files = files(&[("a.jpg", "KA"), ("copy/a.jpg", "KA")]);

        let err = Reconciler::new(&adapter, &store).diff(&files, None).unwrap_err();
        match err {
            Error::Conflict(conflict) => {
                assert_eq!(conflict.subject, "KA (a.jpg, copy/a.jpg)");
                assert_eq!(conflict.first.method, Method::ExifDateTimeOriginal);
            }
            other => panic!("expected a conflict, got {other:?}"),
        }
        assert_eq!(store.get(&Identity::from("KA"), DATETIME).unwrap(), None);
    }

    #[test]
    fn test_duplicates_share_the_better_evidence() {
        let adapter = MemoryAdapter::new()
            .with_tag("a.jpg", "File:FileModifyDate", "1600000000")
            .with_tag("copy/a.jpg", "EXIF:DateTimeOriginal", "2015:05:16 14:04:29");
        let store = MemoryStore::new();
        let report = Reconciler::new(&adapter, &store)
            .diff(&files(&[("a.jpg", "KA"), ("copy/a.jpg", "KA")]), None)
            .unwrap();

        assert_eq!(report.additions().count(), 2);
        assert_eq!(report.updates()[&Identity::from("KA")].new.method, Method::ExifDateTimeOriginal);
    }

    #[test]
    fn test_apply_and_effective_timestamps() {
        let adapter = MemoryAdapter::new().with_tag("a.jpg", "EXIF:DateTimeOriginal", "2015:05:16 14:04:29");
        let mut store = MemoryStore::new();
        let files = files(&[("a.jpg", "KA"), ("b.jpg", "KB")]);

        let report = Reconciler::new(&adapter, &store).diff(&files, None).unwrap();
        assert!(require_complete(&report).is_err());
        assert_eq!(apply(&report, &mut store).unwrap(), 1);

        let timestamps = effective_timestamps(&files, &store).unwrap();
        assert_eq!(timestamps.len(), 1);
        assert_eq!(timestamps[&Identity::from("KA")].method, Method::ExifDateTimeOriginal);

        // A second pass finds nothing new.
        let again = Reconciler::new(&adapter, &store).diff(&files, None).unwrap();
        assert!(again.updates().is_empty());
        let unknown: Vec<_> = again.remaining().map(|(p, _)| p.to_path_buf()).collect();
        assert_eq!(unknown, [PathBuf::from("b.jpg")]);
    }

    #[test]
    fn test_require_complete_lists_every_file() {
        let adapter = MemoryAdapter::new();
        let store = MemoryStore::new();
        let report = Reconciler::new(&adapter, &store)
            .diff_files(&[PathBuf::from("x.jpg"), PathBuf::from("y.jpg")], None)
            .unwrap();
        let err = require_complete(&report).unwrap_err();
        assert_eq!(err.files, [PathBuf::from("x.jpg"), PathBuf::from("y.jpg")]);
    }

    #[test]
    fn test_diff_files_is_file_keyed() {
        let adapter = MemoryAdapter::new().with_tag("a.jpg", "EXIF:DateTimeOriginal", "2015:05:16 14:04:29");
        let store = MemoryStore::new();
        let report = Reconciler::new(&adapter, &store)
            .diff_files(&[PathBuf::from("a.jpg")], None)
            .unwrap();
        assert_eq!(report.short().next().unwrap(), "[F+] a.jpg");
    }

    #[test]
    fn test_needs_update_rules() {
        let exif = TimestampCandidate::from_raw(Method::ExifCreateDate, "2015:05:16 14:04:29")
            .unwrap()
            .localized(Tz::UTC);
        let manual = TimestampCandidate::from_raw(Method::ManualTrusted, "2010:01:01 00:00:00")
            .unwrap()
            .localized(Tz::UTC);
        assert!(needs_update(&exif, None));
        assert!(needs_update(&manual, Some(&exif)));
        assert!(!needs_update(&exif, Some(&manual)));
        assert!(!needs_update(&exif, Some(&exif)));
    }
}
