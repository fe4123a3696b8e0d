//! # Profsync - Configuration profiles you can take anywhere
//!
//! Snapshot a small, fixed set of local configuration paths into a single
//! archive, keep it in a remote slot under a profile name, and restore it on
//! another machine later. A watch mode keeps the remote snapshot in sync
//! while you edit.
//!
//! ## Overview
//!
//! A profile covers:
//! - the application's configuration directory
//! - its top-level configuration file and that file's backup copy
//! - optionally, credentials held in the OS keychain
//!
//! Each profile is one mutable latest snapshot. Storing under an existing
//! name replaces it; there is no history and no merging. Last writer wins.
//!
//! ## Architecture
//!
//! - **Fingerprint Engine**: one SHA-256 digest over everything a profile
//!   would contain, used only to decide whether anything changed
//! - **Archive Codec**: gzip-compressed tar, with fixed entry names that
//!   form the wire contract between machines
//! - **Verification Gate**: certifies that a tree holds the essential
//!   entries before a store or a restore is allowed to proceed
//! - **Transfer Protocol**: base64 over a text-oriented remote store, with
//!   size categories and a mandatory raw fetch for truncated reads
//! - **Scheduler**: a pure debounce/throttle state machine that guarantees a
//!   single save in flight and a minimum interval between saves
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use profsync::{DirectoryStore, Profsync};
//!
//! # fn main() -> profsync::Result<()> {
//! let profsync = Profsync::builder()
//!     .store(DirectoryStore::new("/mnt/usb/profiles"))
//!     .build()?;
//!
//! let stored = profsync.store("work")?;
//! println!("Uploaded {} bytes", stored.size.encoded_bytes);
//!
//! let report = profsync.verify("work")?;
//! assert!(report.valid);
//! # Ok(())
//! # }
//! ```
//!
//! ### Watching for changes
//!
//! ```rust,no_run
//! use profsync::{Config, Profsync, TracingSink, Verbosity};
//! use std::sync::Arc;
//!
//! # async fn run() -> profsync::Result<()> {
//! let profsync = Profsync::from_config(&Config::load(None)?)?;
//! let sink = Arc::new(TracingSink::new(Verbosity::Normal));
//! let stop = async {
//!     let _ = tokio::signal::ctrl_c().await;
//! };
//! let summary = profsync.watch("work", sink, stop).await?;
//! println!("{} saves", summary.save_count);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return `Result<T, ProfsyncError>`. The variants separate
//! what a caller reacts to differently: an invalid name, nothing to store,
//! a failed gate, a missing profile, transport trouble, and authorization
//! trouble. [`ProfsyncError::user_message`] carries remediation text.
//!
//! ## Module Organization
//!
//! - [`profsync`]: the `Profsync` facade and its builder
//! - [`fingerprint`]: change detection
//! - [`archive`]: archive build, extract and listing
//! - [`verification`]: the verification gate
//! - [`transfer`]: encoding, size categories, upload and download
//! - [`store`], [`gist`]: remote store trait and implementations
//! - [`credentials`]: credential schemas and sources
//! - [`scheduler`], [`watch`], [`fs_watcher`], [`sink`]: watch mode
//! - [`config`]: TOML configuration
//! - [`types`], [`error`], [`utils`]: shared types and helpers

// Public API modules
pub mod archive;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fingerprint;
pub mod fs_watcher;
pub mod gist;
pub mod profsync;
pub mod scheduler;
pub mod sink;
pub mod store;
pub mod transfer;
pub mod types;
pub mod utils;
pub mod verification;
pub mod watch;

// Re-export main types for convenience
pub use config::Config;
pub use credentials::{
    CredentialDocument, CredentialSource, Credentials, KeychainSource, NoCredentials,
    StaticCredentials,
};
pub use error::{ProfsyncError, Result};
pub use gist::GistStore;
pub use profsync::{Profsync, ProfsyncBuilder, RestoreResult, StatusReport, StoreResult};
pub use scheduler::{Command, SaveCycle, SaveState, SchedulerEvent};
pub use sink::{CollectingSink, EventSink, TracingSink, Verbosity, WatchEvent};
pub use store::{DirectoryStore, MemoryStore, RemoteEntry, RemoteStore};
pub use transfer::{SizeReport, Transfer};
pub use types::*;
pub use verification::{GateRequirements, ProfileVerifier, VerificationReport};
pub use watch::WatchSummary;

#[cfg(test)]
mod tests;
