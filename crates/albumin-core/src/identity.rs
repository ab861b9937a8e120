use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Content-derived key of a file payload. Files with identical bytes
/// share an identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Computes the identity of whatever currently sits at a path.
pub trait ContentIdentifier: Sync {
    fn identify(&self, path: &Path) -> Result<Identity>;
}

/// git-annex style `SHA256E` keys: `SHA256E-s<size>--<hex><.ext>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Identifier;

impl ContentIdentifier for Sha256Identifier {
    fn identify(&self, path: &Path) -> Result<Identity> {
        let mut file = File::open(path)?;
        let size = file.metadata()?.len();

        let mut hasher = Sha256::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_default();
        Ok(Identity(format!(
            "SHA256E-s{}--{}{}",
            size,
            hex::encode(hasher.finalize()),
            ext
        )))
    }
}

/// Identify a batch of files in parallel. Keys of the result are the
/// given paths.
pub fn identify_all(
    identifier: &dyn ContentIdentifier,
    paths: &[PathBuf],
) -> Result<BTreeMap<PathBuf, Identity>> {
    let pb = ProgressBar::new(paths.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40}] {pos}/{len} hashing files")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let identities: Vec<(PathBuf, Identity)> = paths
        .par_iter()
        .map(|path| {
            let identity = identifier.identify(path)?;
            pb.inc(1);
            Ok((path.clone(), identity))
        })
        .collect::<Result<Vec<_>>>()?;

    pb.finish_and_clear();
    tracing::debug!(files = identities.len(), "identified files");
    Ok(identities.into_iter().collect())
}
