//! Main Profsync implementation
//!
//! This module provides the [`Profsync`] struct, the entry point for every
//! profile operation: storing the local configuration as a named profile,
//! restoring it, verifying it, listing and deleting profiles, and keeping a
//! profile in sync while files change.
//!
//! ## Overview
//!
//! `Profsync` coordinates the subsystems:
//!
//! - **Source layout**: the local paths a profile covers
//! - **Verification gate**: certifies a tree before anything destructive
//! - **Archive codec**: packs the sources into one compressed blob
//! - **Transfer protocol**: moves blobs to and from the remote store
//! - **Credential source**: supplies and receives keychain credentials
//! - **Scheduler**: decides when watch mode saves
//!
//! Profile names are validated before any remote call is made.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use profsync::{Profsync, DirectoryStore, SourceLayout};
//! use std::path::Path;
//!
//! # fn main() -> profsync::Result<()> {
//! let profsync = Profsync::builder()
//!     .layout(SourceLayout::under(Path::new("/home/alex")))
//!     .store(DirectoryStore::new("/mnt/backup/profiles"))
//!     .build()?;
//!
//! profsync.store("work")?;
//! for name in profsync.list()? {
//!     println!("{}", name);
//! }
//! profsync.restore("work")?;
//! # Ok(())
//! # }
//! ```

use crate::archive::{self, ArchiveEntry, BuildStats};
use crate::config::{Backend, Config};
use crate::credentials::{CredentialSource, Credentials, KeychainSource, NoCredentials};
use crate::error::{ProfsyncError, Result};
use crate::fingerprint::{compute_fingerprint, scan_directory};
use crate::fs_watcher::FsWatcher;
use crate::gist::GistStore;
use crate::scheduler::{SaveCycle, DEFAULT_SETTLE, DEFAULT_THROTTLE};
use crate::sink::{EventSink, WatchEvent};
use crate::store::{DirectoryStore, RemoteStore};
use crate::transfer::{SizeReport, Transfer};
use crate::types::{
    Fingerprint, ProfileName, SourceKind, SourceLayout, KEYCHAIN_CREDENTIALS_ENTRY,
};
use crate::utils::PathResolver;
use crate::verification::{GateRequirements, ProfileVerifier, VerificationReport};
use crate::watch::{run_watch, ProfileSaver, WatchSummary};
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Outcome of a successful store
#[derive(Debug, Clone)]
pub struct StoreResult {
    /// Profile written
    pub profile: ProfileName,
    /// Size categories of the upload
    pub size: SizeReport,
    /// What went into the archive
    pub stats: BuildStats,
    /// Report of the live gate that allowed the store
    pub verification: VerificationReport,
    /// Total time in milliseconds
    pub duration_ms: u64,
}

/// Outcome of a successful restore
#[derive(Debug, Clone)]
pub struct RestoreResult {
    /// Profile restored
    pub profile: ProfileName,
    /// Regular files written to local paths
    pub files_restored: usize,
    /// Whether credentials were written to the credential source
    pub credentials_restored: bool,
    /// Non-fatal problems
    pub warnings: Vec<String>,
    /// Report of the gate run on the extracted archive
    pub verification: VerificationReport,
    /// Total time in milliseconds
    pub duration_ms: u64,
}

/// Presence of one local source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStatus {
    /// Archive entry name
    pub entry_name: String,
    /// Local path
    pub path: PathBuf,
    /// File or directory
    pub kind: SourceKind,
    /// Whether the path exists with the expected kind
    pub present: bool,
}

/// Snapshot of the local state as it would be stored
#[derive(Debug, Clone)]
pub struct StatusReport {
    /// Per-source presence
    pub sources: Vec<SourceStatus>,
    /// Fingerprint of the current state
    pub fingerprint: Fingerprint,
    /// Whether a keychain credential source is in use
    pub keychain: bool,
    /// Whether the credential source currently holds credentials
    pub credentials_present: bool,
    /// Entries of a freshly built archive; empty if there is no content
    pub entries: Vec<ArchiveEntry>,
    /// Size categories of that archive, if one could be built
    pub size: Option<SizeReport>,
    /// Live verification gate
    pub verification: VerificationReport,
}

/// Main entry point for profile operations
///
/// All one-shot operations are synchronous. [`Profsync::watch`] is async and
/// expects a tokio runtime with the blocking pool available.
pub struct Profsync {
    layout: SourceLayout,
    transfer: Arc<Transfer>,
    credentials: Arc<dyn CredentialSource>,
    settle: Duration,
    throttle: Duration,
}

impl std::fmt::Debug for Profsync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profsync")
            .field("layout", &self.layout)
            .field("slot_description", &self.transfer.description())
            .field("keychain", &self.credentials.is_keychain())
            .field("settle", &self.settle)
            .field("throttle", &self.throttle)
            .finish()
    }
}

impl Profsync {
    /// Start configuring an instance
    pub fn builder() -> ProfsyncBuilder {
        ProfsyncBuilder::new()
    }

    /// Build an instance from loaded configuration
    ///
    /// Paths are resolved against the current user's environment.
    pub fn from_config(config: &Config) -> Result<Self> {
        ProfsyncBuilder::from_config(config, &PathResolver::from_env())?.build()
    }

    /// Local paths covered by profiles
    pub fn layout(&self) -> &SourceLayout {
        &self.layout
    }

    /// Transfer protocol in use
    pub fn transfer(&self) -> &Transfer {
        &self.transfer
    }

    fn verifier(&self) -> ProfileVerifier {
        ProfileVerifier::new(GateRequirements::for_platform(
            self.credentials.is_keychain(),
        ))
    }

    fn read_credentials(&self) -> Result<Option<Credentials>> {
        if self.credentials.is_keychain() {
            self.credentials.read()
        } else {
            Ok(None)
        }
    }

    /// Store the local state as profile `name`
    ///
    /// Runs the live verification gate first; nothing is uploaded if it
    /// fails. Storing under an existing name replaces that profile.
    ///
    /// # Errors
    ///
    /// - [`ProfsyncError::InvalidProfileName`] before any other work
    /// - [`ProfsyncError::VerificationFailed`] if the local state is not a
    ///   restorable profile
    /// - [`ProfsyncError::NoContent`] if nothing exists to archive
    /// - transport, permission and credential errors from collaborators
    #[instrument(skip(self))]
    pub fn store(&self, name: &str) -> Result<StoreResult> {
        let profile = ProfileName::new(name)?;
        let start = Instant::now();

        let verification = self
            .verifier()
            .verify_live(&self.layout, self.credentials.as_ref())
            .into_result()?;

        let credentials = self.read_credentials()?;
        let (blob, stats) =
            archive::build_with_stats(&self.layout.sources(), credentials.as_ref())?;
        debug!(
            "Built archive: {} files, {} directories, {} bytes compressed",
            stats.files,
            stats.directories,
            blob.len()
        );

        let size = self.transfer.upload(&profile, &blob)?;
        let result = StoreResult {
            profile,
            size,
            stats,
            verification,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Stored profile {} ({} bytes encoded) in {}ms",
            result.profile, result.size.encoded_bytes, result.duration_ms
        );
        Ok(result)
    }

    /// Replace the local state with profile `name`
    ///
    /// The profile is downloaded and extracted into a temporary directory,
    /// and the verification gate runs on that copy. Only if it passes are
    /// files copied over the local paths. Files present locally but not in
    /// the profile are left alone. A keychain entry in the profile is
    /// written to the credential source when that source is a keychain.
    ///
    /// # Errors
    ///
    /// - [`ProfsyncError::InvalidProfileName`] before any remote call
    /// - [`ProfsyncError::ProfileNotFound`] if no such profile is stored
    /// - [`ProfsyncError::ExtractionFailed`] or
    ///   [`ProfsyncError::VerificationFailed`]; local state is untouched
    /// - [`ProfsyncError::RestoreFailed`] if a local path cannot be written
    #[instrument(skip(self))]
    pub fn restore(&self, name: &str) -> Result<RestoreResult> {
        let profile = ProfileName::new(name)?;
        let start = Instant::now();

        let blob = self.transfer.download(&profile)?;
        let staging = tempfile::TempDir::new()?;
        archive::extract(&blob, staging.path())?;
        let verification = self.verifier().verify_extracted(staging.path()).into_result()?;

        let mut warnings = Vec::new();
        let files_restored = self.copy_into_place(staging.path())?;

        let mut credentials_restored = false;
        let keychain_entry = staging.path().join(KEYCHAIN_CREDENTIALS_ENTRY);
        if keychain_entry.is_file() {
            let credentials = Credentials::parse(&fs::read(&keychain_entry)?)?;
            if self.credentials.is_keychain() {
                self.credentials.write(&credentials)?;
                credentials_restored = true;
            } else {
                warn!("Profile {} carries keychain credentials but no keychain is in use", profile);
                warnings.push(format!(
                    "{} was not restored: no keychain credential source",
                    KEYCHAIN_CREDENTIALS_ENTRY
                ));
            }
        }

        let result = RestoreResult {
            profile,
            files_restored,
            credentials_restored,
            warnings,
            verification,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Restored profile {} in {}ms ({} files)",
            result.profile, result.duration_ms, result.files_restored
        );
        Ok(result)
    }

    fn copy_into_place(&self, staging: &Path) -> Result<usize> {
        let mut restored = 0;
        for source in self.layout.sources() {
            let from = staging.join(&source.entry_name);
            if !from.exists() {
                continue;
            }
            match source.kind {
                SourceKind::File => {
                    copy_file(&from, &source.path)?;
                    restored += 1;
                }
                SourceKind::Directory => {
                    create_dir(&source.path)?;
                    for entry in scan_directory(&from) {
                        let target = source.path.join(&entry.relative);
                        if entry.is_dir {
                            create_dir(&target)?;
                        } else if entry.is_file {
                            copy_file(&entry.path, &target)?;
                            restored += 1;
                        }
                    }
                }
            }
        }
        Ok(restored)
    }

    /// Check that profile `name` is restorable without touching local state
    ///
    /// An invalid profile is reported through the returned report, not as
    /// an error.
    #[instrument(skip(self))]
    pub fn verify(&self, name: &str) -> Result<VerificationReport> {
        let profile = ProfileName::new(name)?;
        let blob = self.transfer.download(&profile)?;
        let staging = tempfile::TempDir::new()?;
        archive::extract(&blob, staging.path())?;
        let report = self.verifier().verify_extracted(staging.path());
        debug!("Profile {}: {}", profile, report.summary());
        Ok(report)
    }

    /// Run the live verification gate on the local state
    pub fn verify_local(&self) -> VerificationReport {
        self.verifier()
            .verify_live(&self.layout, self.credentials.as_ref())
    }

    /// Remove profile `name` from the remote store
    #[instrument(skip(self))]
    pub fn delete(&self, name: &str) -> Result<()> {
        let profile = ProfileName::new(name)?;
        if !self.transfer.exists(&profile)? {
            return Err(ProfsyncError::ProfileNotFound(profile.to_string()));
        }
        self.transfer.delete(&profile)?;
        info!("Deleted profile {}", profile);
        Ok(())
    }

    /// Names of all stored profiles
    pub fn list(&self) -> Result<Vec<ProfileName>> {
        self.transfer.list()
    }

    /// Whether profile `name` is stored
    pub fn exists(&self, name: &str) -> Result<bool> {
        let profile = ProfileName::new(name)?;
        self.transfer.exists(&profile)
    }

    /// Describe the local state as it would be stored right now
    ///
    /// Builds an archive in memory but uploads nothing.
    pub fn status(&self) -> Result<StatusReport> {
        let sources: Vec<SourceStatus> = self
            .layout
            .sources()
            .into_iter()
            .map(|source| SourceStatus {
                present: source.exists(),
                entry_name: source.entry_name,
                path: source.path,
                kind: source.kind,
            })
            .collect();

        let credentials = self.read_credentials()?;
        let fingerprint = compute_fingerprint(&self.layout.sources(), credentials.as_ref())?;

        let (entries, size) = match archive::build(&self.layout.sources(), credentials.as_ref()) {
            Ok(blob) => (
                archive::list_entries(&blob)?,
                Some(SizeReport::for_archive(blob.len() as u64)),
            ),
            Err(ProfsyncError::NoContent) => (Vec::new(), None),
            Err(e) => return Err(e),
        };

        Ok(StatusReport {
            sources,
            fingerprint,
            keychain: self.credentials.is_keychain(),
            credentials_present: credentials.is_some(),
            entries,
            size,
            verification: self.verify_local(),
        })
    }

    /// Keep profile `name` in sync with local changes until `stop` resolves
    ///
    /// Changes are debounced by the settle duration and saves are spaced by
    /// at least the throttle interval. Save failures are reported to `sink`
    /// and retried on the next change; they never end the session.
    ///
    /// # Errors
    ///
    /// Fails only during setup: an invalid name, or nothing to watch.
    pub async fn watch<F>(
        &self,
        name: &str,
        sink: Arc<dyn EventSink>,
        stop: F,
    ) -> Result<WatchSummary>
    where
        F: Future<Output = ()>,
    {
        let profile = ProfileName::new(name)?;
        let sources = self.layout.sources();

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let watcher = FsWatcher::new(&sources, tx)?;
        watcher.watch()?;

        sink.emit(&WatchEvent::Started {
            profile: profile.to_string(),
            paths: sources.iter().map(|s| s.path.clone()).collect(),
        });

        let saver = Arc::new(ProfileSaver::new(
            profile,
            self.layout.clone(),
            Arc::clone(&self.credentials),
            Arc::clone(&self.transfer),
        ));
        let summary = run_watch(
            SaveCycle::new(self.settle, self.throttle),
            saver,
            rx,
            stop,
            sink,
        )
        .await;

        watcher.stop()?;
        summary
    }
}

fn restore_failed(path: &Path, e: std::io::Error) -> ProfsyncError {
    ProfsyncError::RestoreFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| restore_failed(path, e))
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        create_dir(parent)?;
    }
    fs::copy(from, to).map_err(|e| restore_failed(to, e))?;
    Ok(())
}

/// Builder for [`Profsync`]
///
/// # Default Values
///
/// - `layout`: the default source paths under the user's home
/// - `credentials`: [`NoCredentials`]
/// - `description`: `"profsync profiles"`
/// - `settle`: 2 seconds
/// - `throttle`: 30 seconds
///
/// A remote store has no default and must be given.
pub struct ProfsyncBuilder {
    layout: Option<SourceLayout>,
    store: Option<Arc<dyn RemoteStore>>,
    credentials: Arc<dyn CredentialSource>,
    description: String,
    settle: Duration,
    throttle: Duration,
}

impl Default for ProfsyncBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfsyncBuilder {
    /// Create a builder with default settings
    pub fn new() -> Self {
        Self {
            layout: None,
            store: None,
            credentials: Arc::new(NoCredentials),
            description: crate::config::DEFAULT_DESCRIPTION.to_string(),
            settle: DEFAULT_SETTLE,
            throttle: DEFAULT_THROTTLE,
        }
    }

    /// Start from loaded configuration
    ///
    /// Selects the store backend and credential source the configuration
    /// names, and resolves its paths with `resolver`.
    pub fn from_config(config: &Config, resolver: &PathResolver) -> Result<Self> {
        let store: Arc<dyn RemoteStore> = match config.remote.backend {
            Backend::Gist => Arc::new(GistStore::new(config.remote.gh_binary.clone())),
            Backend::Directory => {
                let dir = config.remote.directory.as_deref().ok_or_else(|| {
                    ProfsyncError::config("remote.directory is required for the directory backend")
                })?;
                Arc::new(DirectoryStore::new(resolver.resolve(dir)?))
            }
        };

        let credentials: Arc<dyn CredentialSource> = if config.credentials.keychain.enabled() {
            Arc::new(KeychainSource::new(config.credentials.keychain_service.clone()))
        } else {
            Arc::new(NoCredentials)
        };

        Ok(Self {
            layout: Some(config.layout(resolver)?),
            store: Some(store),
            credentials,
            description: config.remote.description.clone(),
            settle: config.watch.settle,
            throttle: config.watch.throttle,
        })
    }

    /// Set the local source paths
    pub fn layout(mut self, layout: SourceLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Set the remote store
    pub fn store(self, store: impl RemoteStore + 'static) -> Self {
        self.shared_store(Arc::new(store))
    }

    /// Set a remote store that is shared with other owners
    pub fn shared_store(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the credential source
    pub fn credentials(self, credentials: impl CredentialSource + 'static) -> Self {
        self.shared_credentials(Arc::new(credentials))
    }

    /// Set a credential source that is shared with other owners
    pub fn shared_credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the description identifying the remote slot
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the watch mode settle duration
    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Set the minimum interval between watch mode saves
    pub fn throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    /// Build the instance
    ///
    /// # Errors
    ///
    /// Returns [`ProfsyncError::Config`] if no store was given or the
    /// settle duration is zero, and [`ProfsyncError::PathResolution`] if the
    /// default layout cannot be resolved.
    pub fn build(self) -> Result<Profsync> {
        let store = self
            .store
            .ok_or_else(|| ProfsyncError::config("no remote store configured"))?;
        if self.settle.is_zero() {
            return Err(ProfsyncError::config("settle duration must be greater than zero"));
        }
        let layout = match self.layout {
            Some(layout) => layout,
            None => Config::default().layout(&PathResolver::from_env())?,
        };

        Ok(Profsync {
            layout,
            transfer: Arc::new(Transfer::new(store, self.description)),
            credentials: self.credentials,
            settle: self.settle,
            throttle: self.throttle,
        })
    }
}
