//! Utility functions for profsync
//!
//! ## Path resolution
//!
//! Configured source paths are written the way a user would type them:
//! `~/.assistant`, `$XDG_CONFIG_HOME/app`, or an absolute path. The
//! [`PathResolver`] turns them into absolute paths. It carries the home
//! directory explicitly instead of reading it on every call, which keeps
//! resolution testable.
//!
//! ## File helpers
//!
//! - [`atomic_write`] replaces a file through a sibling temporary file
//! - [`format_bytes`] renders byte counts for humans

use crate::error::{ProfsyncError, Result};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::trace;

/// Expands logical paths to absolute file-system paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    home: Option<PathBuf>,
    cwd: PathBuf,
}

impl PathResolver {
    /// Resolver using the current user's home and working directory
    pub fn from_env() -> Self {
        Self {
            home: dirs::home_dir(),
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
        }
    }

    /// Resolver with an explicit home directory
    ///
    /// Relative paths resolve against `home` as well.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            cwd: home.clone(),
            home: Some(home),
        }
    }

    /// Home directory used for `~` expansion
    pub fn home(&self) -> Option<&Path> {
        self.home.as_deref()
    }

    /// Expand a logical path into an absolute path
    ///
    /// Supports a leading `~` or `~/`, and `$VAR` or `${VAR}` segments
    /// looked up in the process environment. Relative results are joined to
    /// the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ProfsyncError::PathResolution`] if `~` is used without a
    /// known home directory, if a referenced variable is unset, or if the
    /// input is empty.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ProfsyncError::PathResolution("empty path".to_string()));
        }

        if raw.match_indices("${").any(|(open, _)| !raw[open..].contains('}')) {
            return Err(ProfsyncError::PathResolution(format!(
                "{}: unterminated variable reference",
                raw
            )));
        }

        let home = || self.home.as_ref().map(|h| h.to_string_lossy().into_owned());
        let lookup = |name: &str| -> std::result::Result<Option<String>, std::env::VarError> {
            match (name, &self.home) {
                ("HOME", Some(home)) => Ok(Some(home.to_string_lossy().into_owned())),
                _ => std::env::var(name).map(Some),
            }
        };
        let expanded = shellexpand::full_with_context(raw, home, lookup).map_err(|e| {
            ProfsyncError::PathResolution(format!("{}: ${} is not set", raw, e.var_name))
        })?;

        let path = if expanded == "~" {
            self.require_home(raw)?.to_path_buf()
        } else if let Some(rest) = expanded.strip_prefix("~/") {
            self.require_home(raw)?.join(rest)
        } else {
            PathBuf::from(expanded.as_ref())
        };

        let absolute = if path.is_absolute() {
            path
        } else {
            self.cwd.join(path)
        };
        trace!("Resolved {} -> {}", raw, absolute.display());
        Ok(absolute)
    }

    fn require_home(&self, raw: &str) -> Result<&Path> {
        self.home.as_deref().ok_or_else(|| {
            ProfsyncError::PathResolution(format!("{}: home directory is unknown", raw))
        })
    }
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Check that a relative path stays inside its root
///
/// Rejects absolute paths and any `..` or prefix component.
pub fn is_contained(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Replace a file's content through a temporary sibling
///
/// The temporary file lives in the same directory so the final rename never
/// crosses file systems. Parent directories are created as needed.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| ProfsyncError::Io(e.error))?;
    Ok(())
}

/// Format bytes in human-readable form
///
/// ```rust,ignore
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
