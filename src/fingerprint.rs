//! Content fingerprinting for change detection
//!
//! A fingerprint is a single SHA-256 digest over everything a profile would
//! back up. Watch mode compares fingerprints to skip uploads when nothing
//! observable changed. Archive bytes are not stable across runs, so they
//! cannot serve that purpose.
//!
//! ## What is hashed
//!
//! For each watched source, in order:
//!
//! 1. the source's archive entry name
//! 2. for a directory: the sorted list of relative paths under it, then the
//!    bytes of every regular file in that order
//! 3. for a file: its bytes
//!
//! Credentials from a virtual source are hashed last, in canonical JSON.
//! Every variable-length field is length-prefixed so that moving bytes
//! between fields always changes the digest.
//!
//! Missing sources contribute nothing, and files that vanish or cannot be
//! read during the scan are skipped. File contents are read in parallel and
//! folded in sorted order, so the result does not depend on traversal order.

use crate::credentials::Credentials;
use crate::error::Result;
use crate::types::{Fingerprint, WatchedSource};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// One entry found while scanning a directory source
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScannedEntry {
    /// Path relative to the scanned root, `/`-separated
    pub relative: String,
    /// Absolute path
    pub path: PathBuf,
    /// Whether the entry is a directory
    pub is_dir: bool,
    /// Whether the entry is a regular file
    pub is_file: bool,
}

/// List everything under `root` recursively, sorted by relative path
///
/// Entries that cannot be read are skipped. Symbolic links are listed but
/// not followed.
pub(crate) fn scan_directory(root: &Path) -> Vec<ScannedEntry> {
    let mut entries: Vec<ScannedEntry> = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Skipping unreadable path under {}: {}", root.display(), e);
                None
            }
        })
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(root).ok()?;
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let file_type = entry.file_type();
            Some(ScannedEntry {
                relative,
                path: entry.path().to_path_buf(),
                is_dir: file_type.is_dir(),
                is_file: file_type.is_file(),
            })
        })
        .collect();

    entries.sort_by(|a, b| a.relative.cmp(&b.relative));
    entries
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Compute the fingerprint of a set of sources plus optional credentials
///
/// # Errors
///
/// Only fails if the credentials cannot be serialized. Missing or unreadable
/// files never cause an error.
///
/// # Examples
///
/// ```rust,no_run
/// use profsync::fingerprint::compute_fingerprint;
/// use profsync::types::SourceLayout;
/// use std::path::Path;
///
/// # fn main() -> profsync::Result<()> {
/// let layout = SourceLayout::under(Path::new("/home/alex"));
/// let before = compute_fingerprint(&layout.sources(), None)?;
/// let after = compute_fingerprint(&layout.sources(), None)?;
/// assert_eq!(before, after);
/// # Ok(())
/// # }
/// ```
pub fn compute_fingerprint(
    sources: &[WatchedSource],
    credentials: Option<&Credentials>,
) -> Result<Fingerprint> {
    let mut hasher = Sha256::new();

    for source in sources {
        let metadata = match fs::metadata(&source.path) {
            Ok(metadata) => metadata,
            Err(_) => {
                trace!("Source {} is absent", source.path.display());
                continue;
            }
        };

        hasher.update(b"S");
        update_field(&mut hasher, source.entry_name.as_bytes());

        if metadata.is_dir() {
            let entries = scan_directory(&source.path);

            hasher.update((entries.len() as u64).to_le_bytes());
            for entry in &entries {
                update_field(&mut hasher, entry.relative.as_bytes());
            }

            let contents: Vec<(&str, Option<Vec<u8>>)> = entries
                .par_iter()
                .filter(|entry| entry.is_file)
                .map(|entry| (entry.relative.as_str(), fs::read(&entry.path).ok()))
                .collect();

            for (relative, content) in contents {
                match content {
                    Some(bytes) => {
                        hasher.update(b"F");
                        update_field(&mut hasher, &bytes);
                    }
                    None => trace!("Skipping unreadable file {}", relative),
                }
            }
        } else if metadata.is_file() {
            match fs::read(&source.path) {
                Ok(bytes) => {
                    hasher.update(b"F");
                    update_field(&mut hasher, &bytes);
                }
                Err(e) => debug!("Skipping unreadable {}: {}", source.path.display(), e),
            }
        }
    }

    if let Some(credentials) = credentials {
        hasher.update(b"V");
        update_field(&mut hasher, &credentials.to_canonical_json()?);
    }

    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hasher.finalize());
    let fingerprint = Fingerprint::from_bytes(digest);
    debug!("Computed fingerprint {}", fingerprint.short());
    Ok(fingerprint)
}
