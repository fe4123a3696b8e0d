//! Core types used throughout profsync
//!
//! This module holds the data model shared by the fingerprint engine, the
//! archive codec, the verification gate and the transfer protocol: watched
//! sources and their fixed archive entry names, validated profile names,
//! fingerprints and archive blobs.
//!
//! ## Archive layout
//!
//! Entry names inside an archive are part of the stored format. Profiles
//! written by one version must be restorable by the next, so these names
//! never change:
//!
//! | Entry                                 | Local source                    |
//! |---------------------------------------|---------------------------------|
//! | `config-dir/`                         | configuration directory         |
//! | `config-dir/.credentials.json`        | plain credentials file          |
//! | `config.json`                         | top-level configuration file    |
//! | `config.json.backup`                  | backup of the configuration file|
//! | `.keychain-credentials.json`          | OS keychain (virtual source)    |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{ProfsyncError, Result};

/// Archive entry holding the configuration directory
pub const CONFIG_DIR_ENTRY: &str = "config-dir";
/// Archive entry holding the top-level configuration file
pub const CONFIG_FILE_ENTRY: &str = "config.json";
/// Archive entry holding the configuration file's backup copy
pub const CONFIG_BACKUP_ENTRY: &str = "config.json.backup";
/// File name of the plain credentials file inside the configuration directory
pub const CREDENTIALS_FILE_NAME: &str = ".credentials.json";
/// Archive entry holding credentials read from the OS keychain
pub const KEYCHAIN_CREDENTIALS_ENTRY: &str = ".keychain-credentials.json";

/// Longest accepted profile name
pub const MAX_PROFILE_NAME_LEN: usize = 64;

/// Whether a watched source is a single file or a directory tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A single regular file
    File,
    /// A directory, archived recursively
    Directory,
}

/// One logical backup unit
///
/// The path is already resolved to an absolute location; the entry name is
/// the root name the source takes inside the archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchedSource {
    /// Absolute local path
    pub path: PathBuf,
    /// Root name inside the archive
    pub entry_name: String,
    /// File or directory
    pub kind: SourceKind,
}

impl WatchedSource {
    /// Create a single-file source
    pub fn file(path: impl Into<PathBuf>, entry_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            entry_name: entry_name.into(),
            kind: SourceKind::File,
        }
    }

    /// Create a directory source
    pub fn directory(path: impl Into<PathBuf>, entry_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            entry_name: entry_name.into(),
            kind: SourceKind::Directory,
        }
    }

    /// Check whether the source currently exists with the expected kind
    pub fn exists(&self) -> bool {
        match self.kind {
            SourceKind::File => self.path.is_file(),
            SourceKind::Directory => self.path.is_dir(),
        }
    }
}

/// The well-known local paths backed up by a profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLayout {
    /// Configuration directory
    pub config_dir: PathBuf,
    /// Top-level configuration file
    pub config_file: PathBuf,
    /// Backup copy of the configuration file
    pub config_backup: PathBuf,
}

impl SourceLayout {
    /// Layout rooted at a single directory, mostly useful for tests
    ///
    /// Produces `<root>/.assistant`, `<root>/.assistant.json` and
    /// `<root>/.assistant.json.backup`.
    pub fn under(root: &Path) -> Self {
        Self {
            config_dir: root.join(".assistant"),
            config_file: root.join(".assistant.json"),
            config_backup: root.join(".assistant.json.backup"),
        }
    }

    /// Watched sources in archive order
    pub fn sources(&self) -> Vec<WatchedSource> {
        vec![
            WatchedSource::directory(&self.config_dir, CONFIG_DIR_ENTRY),
            WatchedSource::file(&self.config_file, CONFIG_FILE_ENTRY),
            WatchedSource::file(&self.config_backup, CONFIG_BACKUP_ENTRY),
        ]
    }

    /// Location of the plain credentials file
    pub fn credentials_file(&self) -> PathBuf {
        self.config_dir.join(CREDENTIALS_FILE_NAME)
    }

    /// Map an archive entry path (e.g. `config-dir/.credentials.json`) to its
    /// local path
    ///
    /// Returns `None` for entries that have no local file counterpart, such
    /// as the keychain entry.
    pub fn local_path(&self, entry: &str) -> Option<PathBuf> {
        let entry = entry.trim_end_matches('/');
        if entry == CONFIG_FILE_ENTRY {
            return Some(self.config_file.clone());
        }
        if entry == CONFIG_BACKUP_ENTRY {
            return Some(self.config_backup.clone());
        }
        if entry == CONFIG_DIR_ENTRY {
            return Some(self.config_dir.clone());
        }
        entry
            .strip_prefix(CONFIG_DIR_ENTRY)
            .and_then(|rest| rest.strip_prefix('/'))
            .map(|rest| self.config_dir.join(rest))
    }
}

/// A validated profile name
///
/// Names are restricted to lowercase ASCII letters, digits and single
/// hyphens, without a leading or trailing hyphen. Validation happens before
/// any remote operation so that remote entry names are never ambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProfileName(String);

impl ProfileName {
    /// Validate and wrap a profile name
    ///
    /// # Errors
    ///
    /// Returns [`ProfsyncError::InvalidProfileName`] if the name is empty,
    /// too long, or contains anything besides `[a-z0-9-]`, or has a leading,
    /// trailing or doubled hyphen.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if Self::is_valid(&name) {
            Ok(Self(name))
        } else {
            Err(ProfsyncError::InvalidProfileName(name))
        }
    }

    /// Check a candidate name without allocating
    pub fn is_valid(name: &str) -> bool {
        !name.is_empty()
            && name.len() <= MAX_PROFILE_NAME_LEN
            && name
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
            && !name.starts_with('-')
            && !name.ends_with('-')
            && !name.contains("--")
    }

    /// Borrow the name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProfileName {
    type Err = ProfsyncError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for ProfileName {
    type Error = ProfsyncError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ProfileName> for String {
    fn from(name: ProfileName) -> Self {
        name.0
    }
}

impl AsRef<str> for ProfileName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Content digest over everything a profile would back up
///
/// Used only for change detection; never stored.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Wrap a raw SHA-256 digest
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hex representation
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 hex characters, for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A compressed archive of one point-in-time snapshot
#[derive(Clone, PartialEq, Eq)]
pub struct ArchiveBlob(Vec<u8>);

impl ArchiveBlob {
    /// Wrap archive bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Size in bytes before transport encoding
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the blob holds no bytes at all
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Take ownership of the raw bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for ArchiveBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArchiveBlob({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for ArchiveBlob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_name_accepts_simple_names() {
        for name in ["work", "home-laptop", "a", "profile-2", "2024"] {
            assert!(ProfileName::new(name).is_ok(), "{} should be valid", name);
        }
    }

    #[test]
    fn test_profile_name_rejects_bad_names() {
        for name in ["Work_1", "", "-work", "work-", "wo--rk", "work.json", "wörk", "a b"] {
            let err = ProfileName::new(name).unwrap_err();
            assert!(matches!(err, ProfsyncError::InvalidProfileName(_)), "{}", name);
        }
        assert!(ProfileName::new("a".repeat(MAX_PROFILE_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_layout_maps_entries_to_local_paths() {
        let layout = SourceLayout::under(Path::new("/home/u"));

        assert_eq!(
            layout.local_path("config.json"),
            Some(PathBuf::from("/home/u/.assistant.json"))
        );
        assert_eq!(
            layout.local_path("config-dir/.credentials.json"),
            Some(PathBuf::from("/home/u/.assistant/.credentials.json"))
        );
        assert_eq!(
            layout.local_path("config-dir/"),
            Some(PathBuf::from("/home/u/.assistant"))
        );
        assert_eq!(layout.local_path(KEYCHAIN_CREDENTIALS_ENTRY), None);
        assert_eq!(layout.local_path("config-dirt/x"), None);
    }

    #[test]
    fn test_fingerprint_display() {
        let fp = Fingerprint::from_bytes([0xab; 32]);
        assert_eq!(fp.short(), "abababab");
        assert_eq!(fp.to_string().len(), 64);
    }
}
