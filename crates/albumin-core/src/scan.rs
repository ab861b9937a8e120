use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::store::STORE_DIR;

/// Directories never descended into.
const SKIPPED_DIRS: &[&str] = &[".git", STORE_DIR];

/// Whether the name looks like a photo or video.
pub fn is_media(path: &Path) -> bool {
    let mime = mime_guess::from_path(path).first();
    match &mime {
        Some(m) => {
            m.type_() == mime_guess::mime::IMAGE
                || m.type_() == mime_guess::mime::VIDEO
                || has_extension(path, "mts")
        }
        None => has_extension(path, "mts"),
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// Media files under `path`, sorted. A media file path yields itself.
pub fn media_files(path: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if path.is_dir() {
        scan_recursive(path, &mut files)?;
    } else if is_media(path) {
        files.push(path.to_path_buf());
    }
    files.sort();
    tracing::debug!(root = %path.display(), files = files.len(), "scanned media");
    Ok(files)
}

fn scan_recursive(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            let skipped = entry
                .file_name()
                .to_str()
                .is_some_and(|name| SKIPPED_DIRS.contains(&name));
            if !skipped {
                scan_recursive(&path, files)?;
            }
        } else if is_media(&path) {
            files.push(path);
        }
    }
    Ok(())
}
