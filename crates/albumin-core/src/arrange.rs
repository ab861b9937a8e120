use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use tracing::{debug, info, warn};

use crate::date::TimestampCandidate;
use crate::error::{CapacityError, Result};
use crate::identity::{ContentIdentifier, Identity};

/// Sequence numbers available per destination second.
pub const SLOTS: u32 = 100;

/// Compact UTC stamp leading every arranged basename.
const STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// The family of slot names one file may take: `<stamp><seq><ext>`.
#[derive(Debug, Clone)]
struct Target {
    stem: String,
    ext: String,
}

impl Target {
    fn new(candidate: &TimestampCandidate, file: &Path) -> Self {
        Self {
            stem: candidate.time.to_utc().format(STAMP_FORMAT).to_string(),
            ext: file
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default(),
        }
    }

    fn slot(&self, dir: &Path, seq: u32) -> PathBuf {
        dir.join(format!("{}{seq:02}{}", self.stem, self.ext))
    }

    /// Whether `path` already is one of the slots in `dir`.
    fn holds(&self, dir: &Path, path: &Path) -> bool {
        path.parent() == Some(dir)
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix(self.stem.as_str()))
                .and_then(|n| n.strip_suffix(self.ext.as_str()))
                .is_some_and(|seq| seq.len() == 2 && seq.bytes().all(|b| b.is_ascii_digit()))
    }
}

/// Moves files into `<root>/<batch label>/<stamp><seq><ext>`.
///
/// Destinations are planned for the whole batch before anything moves.
/// A file already in one of its slots keeps it, so a second run over an
/// arranged batch renames nothing.
pub struct Arranger<'a> {
    root: PathBuf,
    identifier: &'a dyn ContentIdentifier,
}

impl<'a> Arranger<'a> {
    pub fn new(root: impl Into<PathBuf>, identifier: &'a dyn ContentIdentifier) -> Self {
        Self {
            root: root.into(),
            identifier,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Place every file with a resolved timestamp and return how many
    /// were renamed. Files without one stay where they are.
    ///
    /// Running out of slots fails before any rename. An I/O error midway
    /// leaves earlier renames in place.
    pub fn arrange(
        &self,
        files: &BTreeMap<PathBuf, Identity>,
        resolved: &BTreeMap<Identity, TimestampCandidate>,
        batch_label: &str,
    ) -> Result<usize> {
        let moves = self.plan(files, resolved, &self.root.join(batch_label))?;

        let mut vacated: BTreeSet<PathBuf> = BTreeSet::new();
        for (from, to) in &moves {
            move_file(from, to)?;
            info!(
                from = %from.display(),
                to = %self.relative(to).display(),
                "arranged"
            );
            if let Some(parent) = from.parent() {
                vacated.insert(parent.to_path_buf());
            }
        }

        // Deepest first, so emptied parents are seen empty.
        for dir in vacated.iter().rev() {
            self.prune(dir)?;
        }

        info!(renamed = moves.len(), files = files.len(), label = batch_label, "arrangement done");
        Ok(moves.len())
    }

    /// Renames to perform, in an order where every destination is free
    /// by the time its file moves.
    fn plan(
        &self,
        files: &BTreeMap<PathBuf, Identity>,
        resolved: &BTreeMap<Identity, TimestampCandidate>,
        dest_dir: &Path,
    ) -> Result<Vec<(PathBuf, PathBuf)>> {
        // One file per identity is placed; a copy already sitting in a
        // slot is preferred over one that would have to move.
        let mut placed: BTreeMap<&Identity, (&PathBuf, Target)> = BTreeMap::new();
        for (file, identity) in files {
            let Some(candidate) = resolved.get(identity) else {
                warn!(file = %file.display(), %identity, "no timestamp, leaving in place");
                continue;
            };
            let target = Target::new(candidate, file);
            match placed.entry(identity) {
                Entry::Vacant(entry) => {
                    entry.insert((file, target));
                }
                Entry::Occupied(mut entry) => {
                    let (chosen, chosen_target) = entry.get();
                    if !chosen_target.holds(dest_dir, chosen) && target.holds(dest_dir, file) {
                        entry.insert((file, target));
                    } else {
                        debug!(file = %file.display(), %identity, "duplicate content, leaving in place");
                    }
                }
            }
        }

        let mut members: Vec<(&PathBuf, &Identity, Target)> = placed
            .into_iter()
            .map(|(identity, (file, target))| (file, identity, target))
            .collect();
        members.sort_by(|a, b| a.0.cmp(b.0));
        let (settled, pending): (Vec<_>, Vec<_>) = members
            .into_iter()
            .partition(|(file, _, target)| target.holds(dest_dir, file));

        let mut claimed: HashSet<PathBuf> = settled.iter().map(|(file, ..)| (*file).clone()).collect();
        // Batch members need no hashing when they turn up as occupants.
        let mut occupants: HashMap<PathBuf, Identity> = files.clone().into_iter().collect();
        let mut leaving: HashSet<PathBuf> = HashSet::new();
        let mut moves = Vec::new();

        for (file, identity, target) in pending {
            match self.probe(identity, &target, dest_dir, &claimed, &leaving, &mut occupants)? {
                Probe::Free(dest) => {
                    claimed.insert(dest.clone());
                    leaving.insert(file.clone());
                    moves.push((file.clone(), dest));
                }
                Probe::Satisfied(dest) => {
                    debug!(
                        file = %file.display(),
                        slot = %self.relative(&dest).display(),
                        "identity already placed"
                    );
                }
            }
        }
        Ok(moves)
    }

    fn probe(
        &self,
        identity: &Identity,
        target: &Target,
        dest_dir: &Path,
        claimed: &HashSet<PathBuf>,
        leaving: &HashSet<PathBuf>,
        occupants: &mut HashMap<PathBuf, Identity>,
    ) -> Result<Probe> {
        for seq in 0..SLOTS {
            let dest = target.slot(dest_dir, seq);
            if claimed.contains(&dest) {
                debug!(slot = %dest.display(), "slot planned for another file");
                continue;
            }
            // Vacated by a member planned (and moved) earlier.
            if leaving.contains(&dest) {
                return Ok(Probe::Free(dest));
            }
            match self.occupant(&dest, occupants)? {
                None => return Ok(Probe::Free(dest)),
                Some(other) if other == *identity => return Ok(Probe::Satisfied(dest)),
                Some(other) => {
                    debug!(slot = %dest.display(), occupant = %other, "slot taken");
                }
            }
        }

        Err(CapacityError {
            dir: dest_dir.to_path_buf(),
            stem: target.stem.clone(),
        }
        .into())
    }

    /// Identity of whatever sits at `path`, hashing it at most once.
    fn occupant(
        &self,
        path: &Path,
        occupants: &mut HashMap<PathBuf, Identity>,
    ) -> Result<Option<Identity>> {
        if fs::symlink_metadata(path).is_err() {
            return Ok(None);
        }
        if let Some(identity) = occupants.get(path) {
            return Ok(Some(identity.clone()));
        }
        let identity = self.identifier.identify(path)?;
        occupants.insert(path.to_path_buf(), identity.clone());
        Ok(Some(identity))
    }

    /// Remove `dir` if empty, then its parents inside the root. Neither
    /// the root nor anything outside it is touched beyond `dir` itself.
    fn prune(&self, dir: &Path) -> Result<()> {
        let mut current = Some(dir);
        while let Some(dir) = current {
            if dir == self.root || !is_empty_dir(dir)? {
                break;
            }
            fs::remove_dir(dir)?;
            debug!(dir = %dir.display(), "pruned empty directory");
            current = dir.parent().filter(|p| p.starts_with(&self.root));
        }
        Ok(())
    }

    fn relative(&self, path: &Path) -> PathBuf {
        pathdiff::diff_paths(path, &self.root).unwrap_or_else(|| path.to_path_buf())
    }
}

/// Outcome of probing the slots of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Probe {
    Free(PathBuf),
    /// A copy of the same identity already holds this slot.
    Satisfied(PathBuf),
}

fn is_empty_dir(dir: &Path) -> Result<bool> {
    match fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Rename, falling back to copy and delete across filesystems. The
/// copy keeps the source modification time.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }

    let meta = fs::metadata(from)?;
    fs::copy(from, to)?;
    filetime::set_file_mtime(to, FileTime::from_last_modification_time(&meta))?;
    fs::remove_file(from)?;
    Ok(())
}
