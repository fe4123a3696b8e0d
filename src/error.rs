//! Error types for profsync
//!
//! This module defines every error that can surface from profile operations.
//! The variants distinguish the situations a caller needs to react to
//! differently: a bad profile name, nothing to back up, a failed verification
//! gate, a missing remote profile, transport failures, and authorization
//! failures.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the profsync library
pub type Result<T> = std::result::Result<T, ProfsyncError>;

/// Main error type for all profsync operations
#[derive(Debug, Error)]
pub enum ProfsyncError {
    /// Profile name does not match the allowed pattern
    #[error("Invalid profile name '{0}': use lowercase letters, digits and single hyphens")]
    InvalidProfileName(String),

    /// None of the watched sources exist, so there is nothing to archive
    #[error("No content to archive: none of the configured sources exist")]
    NoContent,

    /// The verification gate found missing or malformed essential entries
    #[error("Verification failed: {}", .issues.join("; "))]
    VerificationFailed {
        /// Every issue the gate reported
        issues: Vec<String>,
    },

    /// The named profile does not exist in the remote store
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    /// Network or remote store failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote store rejected the request for authorization reasons
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The archive could not be decoded or unpacked
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or unreadable configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A configured path could not be resolved
    #[error("Cannot resolve path: {0}")]
    PathResolution(String),

    /// Watch mode could not be set up
    #[error("Watch error: {0}")]
    Watch(String),

    /// The credential source failed to read or write
    #[error("Credential source error: {0}")]
    Credentials(String),

    /// A local path could not be written during restore
    #[error("Restore failed for {path:?}: {reason}")]
    RestoreFailed {
        /// Local path being written
        path: PathBuf,
        /// Underlying reason
        reason: String,
    },

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<notify::Error> for ProfsyncError {
    fn from(err: notify::Error) -> Self {
        ProfsyncError::Watch(err.to_string())
    }
}

impl From<toml::de::Error> for ProfsyncError {
    fn from(err: toml::de::Error) -> Self {
        ProfsyncError::Config(err.to_string())
    }
}

impl ProfsyncError {
    /// Create a transport error with a custom message
    pub fn transport(msg: impl Into<String>) -> Self {
        ProfsyncError::Transport(msg.into())
    }

    /// Create an extraction error with a custom message
    pub fn extraction(msg: impl Into<String>) -> Self {
        ProfsyncError::ExtractionFailed(msg.into())
    }

    /// Create a configuration error with a custom message
    pub fn config(msg: impl Into<String>) -> Self {
        ProfsyncError::Config(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        ProfsyncError::Internal(msg.into())
    }

    /// Check if retrying the same operation later may succeed without
    /// the user changing anything
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ProfsyncError::Transport(_) | ProfsyncError::Io(_))
    }

    /// Check if this error means the archive must not be trusted
    ///
    /// Restore treats extraction failures exactly like a failed gate: local
    /// state is never touched.
    pub fn blocks_restore(&self) -> bool {
        matches!(
            self,
            ProfsyncError::VerificationFailed { .. } | ProfsyncError::ExtractionFailed(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            ProfsyncError::InvalidProfileName(name) => format!(
                "'{}' is not a valid profile name. Names may contain lowercase letters, \
                 digits and hyphens, e.g. 'work' or 'home-laptop'.",
                name
            ),
            ProfsyncError::ProfileNotFound(name) => format!(
                "Profile '{}' not found. Run 'profsync list' to see stored profiles.",
                name
            ),
            ProfsyncError::PermissionDenied(detail) => format!(
                "The remote store refused access ({}). Re-authenticate, e.g. \
                 'gh auth refresh -s gist', and try again.",
                detail
            ),
            ProfsyncError::Transport(detail) => format!(
                "Could not reach the remote store ({}). Check your connection and retry.",
                detail
            ),
            ProfsyncError::VerificationFailed { issues } => {
                let mut message = String::from("Verification failed:");
                for issue in issues {
                    message.push_str("\n  - ");
                    message.push_str(issue);
                }
                message
            }
            ProfsyncError::NoContent => {
                "Nothing to back up. Check the [sources] section of your configuration.".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Process exit code for the command-line interface
    pub fn exit_code(&self) -> i32 {
        match self {
            ProfsyncError::InvalidProfileName(_) | ProfsyncError::Config(_) => 2,
            ProfsyncError::ProfileNotFound(_) => 3,
            ProfsyncError::PermissionDenied(_) => 4,
            ProfsyncError::VerificationFailed { .. } | ProfsyncError::ExtractionFailed(_) => 5,
            _ => 1,
        }
    }
}
