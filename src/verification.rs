//! Verification gate for restorable profiles
//!
//! Before anything destructive happens, profsync checks that a profile
//! actually contains what is needed to restore a working configuration.
//! The gate runs in two places:
//!
//! 1. **Before store**, against the live local state. Paths are checked
//!    directly and the keychain entry is checked through the credential
//!    source.
//! 2. **Before restore**, against a fresh extraction of the downloaded
//!    archive in a temporary directory.
//!
//! A failed gate blocks the upload or the copy-over entirely and surfaces the
//! list of issues. The gate itself never modifies anything.
//!
//! ## Essential entries
//!
//! | Entry                             | keychain platform | other platforms |
//! |-----------------------------------|-------------------|-----------------|
//! | `config.json`                     | essential         | essential       |
//! | `.keychain-credentials.json`      | essential         | optional        |
//! | `config-dir/.credentials.json`    | optional          | essential       |
//! | `config-dir`                      | optional          | optional        |
//! | `config.json.backup`              | optional          | optional        |
//!
//! Directory entries only contribute a file count to the report.

use crate::credentials::{CredentialSource, Credentials};
use crate::error::{ProfsyncError, Result};
use crate::fingerprint::scan_directory;
use crate::types::{
    SourceLayout, CONFIG_BACKUP_ENTRY, CONFIG_DIR_ENTRY, CONFIG_FILE_ENTRY,
    CREDENTIALS_FILE_NAME, KEYCHAIN_CREDENTIALS_ENTRY,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// How an entry is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryShape {
    /// A regular file
    File,
    /// A JSON file that must parse
    JsonFile,
    /// A directory; contributes a file count
    Directory,
    /// Credentials from the virtual keychain source
    Credentials,
}

/// One entry the gate knows about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRequirement {
    /// Archive entry path
    pub entry: String,
    /// How the entry is stored
    pub shape: EntryShape,
    /// Whether a missing entry fails the gate
    pub essential: bool,
}

/// The set of entries checked by the gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateRequirements {
    entries: Vec<EntryRequirement>,
}

impl GateRequirements {
    /// Requirements for a platform with or without a keychain
    pub fn for_platform(keychain: bool) -> Self {
        let requirement = |entry: String, shape, essential| EntryRequirement {
            entry,
            shape,
            essential,
        };
        Self {
            entries: vec![
                requirement(CONFIG_FILE_ENTRY.to_string(), EntryShape::JsonFile, true),
                requirement(
                    KEYCHAIN_CREDENTIALS_ENTRY.to_string(),
                    EntryShape::Credentials,
                    keychain,
                ),
                requirement(
                    format!("{}/{}", CONFIG_DIR_ENTRY, CREDENTIALS_FILE_NAME),
                    EntryShape::JsonFile,
                    !keychain,
                ),
                requirement(CONFIG_DIR_ENTRY.to_string(), EntryShape::Directory, false),
                requirement(CONFIG_BACKUP_ENTRY.to_string(), EntryShape::File, false),
            ],
        }
    }

    /// All requirements in check order
    pub fn entries(&self) -> &[EntryRequirement] {
        &self.entries
    }

    /// Names of the essential entries
    pub fn essential(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|r| r.essential)
            .map(|r| r.entry.as_str())
    }
}

/// Result of checking one entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryCheck {
    /// Archive entry path
    pub entry: String,
    /// Whether the entry was essential
    pub essential: bool,
    /// Whether the entry was found
    pub present: bool,
    /// Number of regular files, for directory entries
    pub file_count: Option<usize>,
    /// Problem found with a present entry
    pub error: Option<String>,
}

/// Outcome of running the gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Whether the tree is a valid, restorable profile
    pub valid: bool,
    /// Human-readable problems that made the tree invalid
    pub issues: Vec<String>,
    /// Per-entry details
    pub entries: Vec<EntryCheck>,
    /// Time taken in milliseconds
    pub verification_time_ms: u64,
}

impl VerificationReport {
    /// Turn an invalid report into [`ProfsyncError::VerificationFailed`]
    pub fn into_result(self) -> Result<Self> {
        if self.valid {
            Ok(self)
        } else {
            Err(ProfsyncError::VerificationFailed {
                issues: self.issues,
            })
        }
    }

    /// Total regular files counted under directory entries
    pub fn directory_file_count(&self) -> usize {
        self.entries.iter().filter_map(|e| e.file_count).sum()
    }

    /// One-line summary
    pub fn summary(&self) -> String {
        if self.valid {
            let present = self.entries.iter().filter(|e| e.present).count();
            format!(
                "valid ({} of {} entries present, {} files in directories)",
                present,
                self.entries.len(),
                self.directory_file_count()
            )
        } else {
            format!("invalid: {}", self.issues.join("; "))
        }
    }
}

/// Where the gate looks for entries
enum Tree<'a> {
    Extracted(&'a Path),
    Live {
        layout: &'a SourceLayout,
        credentials: &'a dyn CredentialSource,
    },
}

impl Tree<'_> {
    fn locate(&self, entry: &str) -> Option<PathBuf> {
        match self {
            Tree::Extracted(root) => Some(root.join(entry)),
            Tree::Live { layout, .. } => layout.local_path(entry),
        }
    }
}

/// Runs the verification gate
///
/// # Examples
///
/// ```rust,no_run
/// use profsync::verification::{GateRequirements, ProfileVerifier};
/// use std::path::Path;
///
/// let verifier = ProfileVerifier::new(GateRequirements::for_platform(false));
/// let report = verifier.verify_extracted(Path::new("/tmp/extracted"));
/// if !report.valid {
///     for issue in &report.issues {
///         eprintln!("{}", issue);
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ProfileVerifier {
    requirements: GateRequirements,
}

impl ProfileVerifier {
    /// Create a verifier for the given requirements
    pub fn new(requirements: GateRequirements) -> Self {
        Self { requirements }
    }

    /// Requirements this verifier checks
    pub fn requirements(&self) -> &GateRequirements {
        &self.requirements
    }

    /// Check an extracted archive tree
    pub fn verify_extracted(&self, root: &Path) -> VerificationReport {
        self.verify(Tree::Extracted(root))
    }

    /// Check the live local state
    pub fn verify_live(
        &self,
        layout: &SourceLayout,
        credentials: &dyn CredentialSource,
    ) -> VerificationReport {
        self.verify(Tree::Live {
            layout,
            credentials,
        })
    }

    fn verify(&self, tree: Tree<'_>) -> VerificationReport {
        let start = Instant::now();
        let mut issues = Vec::new();
        let mut entries = Vec::with_capacity(self.requirements.entries.len());

        for requirement in &self.requirements.entries {
            let check = check_entry(&tree, requirement);

            if requirement.essential {
                match (&check.error, check.present) {
                    (Some(error), _) => issues.push(format!(
                        "essential entry {} is unusable: {}",
                        requirement.entry, error
                    )),
                    (None, false) => {
                        issues.push(format!("missing essential entry {}", requirement.entry))
                    }
                    (None, true) => {}
                }
            } else if let Some(error) = &check.error {
                debug!("Optional entry {}: {}", requirement.entry, error);
            }
            entries.push(check);
        }

        let report = VerificationReport {
            valid: issues.is_empty(),
            issues,
            entries,
            verification_time_ms: start.elapsed().as_millis() as u64,
        };

        if report.valid {
            info!("Verification passed: {}", report.summary());
        } else {
            warn!("Verification failed: {}", report.issues.join("; "));
        }
        report
    }
}

fn check_entry(tree: &Tree<'_>, requirement: &EntryRequirement) -> EntryCheck {
    let mut check = EntryCheck {
        entry: requirement.entry.clone(),
        essential: requirement.essential,
        present: false,
        file_count: None,
        error: None,
    };

    match requirement.shape {
        EntryShape::Credentials => match tree {
            Tree::Live { credentials, .. } => match credentials.read() {
                Ok(Some(_)) => check.present = true,
                Ok(None) => {}
                Err(e) => check.error = Some(e.to_string()),
            },
            Tree::Extracted(_) => {
                if let Some(path) = tree.locate(&requirement.entry).filter(|p| p.is_file()) {
                    check.present = true;
                    if let Err(e) = fs::read(&path)
                        .map_err(ProfsyncError::from)
                        .and_then(|bytes| Credentials::parse(&bytes))
                    {
                        check.error = Some(e.to_string());
                    }
                }
            }
        },
        EntryShape::Directory => {
            if let Some(path) = tree.locate(&requirement.entry).filter(|p| p.is_dir()) {
                check.present = true;
                check.file_count = Some(
                    scan_directory(&path)
                        .into_iter()
                        .filter(|entry| entry.is_file)
                        .count(),
                );
            }
        }
        EntryShape::File | EntryShape::JsonFile => {
            if let Some(path) = tree.locate(&requirement.entry).filter(|p| p.is_file()) {
                check.present = true;
                if requirement.shape == EntryShape::JsonFile {
                    check.error = validate_json(&path).err();
                }
            }
        }
    }

    check
}

fn validate_json(path: &Path) -> std::result::Result<(), String> {
    let bytes = fs::read(path).map_err(|e| e.to_string())?;
    serde_json::from_slice::<serde_json::Value>(&bytes)
        .map(|_| ())
        .map_err(|e| format!("not valid JSON: {}", e))
}
