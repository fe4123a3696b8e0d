//! Configuration loading
//!
//! Configuration is a TOML file, by default at
//! `$XDG_CONFIG_HOME/profsync/config.toml`. Every key is optional; a
//! missing default file means all defaults. Durations are written in
//! humantime form (`"2s"`, `"1m 30s"`).
//!
//! ```toml
//! [sources]
//! config_dir = "~/.assistant"
//! config_file = "~/.assistant.json"
//! config_backup = "~/.assistant.json.backup"
//!
//! [watch]
//! settle = "2s"
//! throttle = "30s"
//!
//! [remote]
//! backend = "directory"
//! directory = "~/Sync/profiles"
//!
//! [credentials]
//! keychain = "auto"
//! ```

use crate::credentials::{KeychainSource, DEFAULT_KEYCHAIN_SERVICE};
use crate::error::{ProfsyncError, Result};
use crate::scheduler::{DEFAULT_SETTLE, DEFAULT_THROTTLE};
use crate::types::SourceLayout;
use crate::utils::PathResolver;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Description that identifies the remote slot holding all profiles
pub const DEFAULT_DESCRIPTION: &str = "profsync profiles";

/// Complete configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Local paths to back up
    pub sources: SourcesConfig,
    /// Watch mode timing
    pub watch: WatchConfig,
    /// Remote store selection
    pub remote: RemoteConfig,
    /// Credential source selection
    pub credentials: CredentialsConfig,
}

/// Logical paths of the backed-up sources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourcesConfig {
    /// Configuration directory
    pub config_dir: String,
    /// Top-level configuration file
    pub config_file: String,
    /// Backup copy of the configuration file
    pub config_backup: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            config_dir: "~/.assistant".to_string(),
            config_file: "~/.assistant.json".to_string(),
            config_backup: "~/.assistant.json.backup".to_string(),
        }
    }
}

/// Debounce and throttle durations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    /// Quiet period before a save is considered
    #[serde(with = "humantime_duration")]
    pub settle: Duration,
    /// Minimum interval between completed saves
    #[serde(with = "humantime_duration")]
    pub throttle: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            settle: DEFAULT_SETTLE,
            throttle: DEFAULT_THROTTLE,
        }
    }
}

/// Which remote store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Hosted gists through the `gh` CLI
    #[default]
    Gist,
    /// A local or mounted directory
    Directory,
}

/// Remote store settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    /// Store implementation
    pub backend: Backend,
    /// Root of the directory backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    /// Description of the slot holding the profiles
    pub description: String,
    /// `gh` executable for the gist backend
    pub gh_binary: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Gist,
            directory: None,
            description: DEFAULT_DESCRIPTION.to_string(),
            gh_binary: "gh".to_string(),
        }
    }
}

/// Whether to use the OS keychain for credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeychainMode {
    /// Use it where the platform has one
    #[default]
    Auto,
    /// Always use it
    On,
    /// Never use it
    Off,
}

impl KeychainMode {
    /// Resolve against the current platform
    pub fn enabled(self) -> bool {
        match self {
            KeychainMode::Auto => KeychainSource::is_supported(),
            KeychainMode::On => true,
            KeychainMode::Off => false,
        }
    }
}

/// Credential settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CredentialsConfig {
    /// Keychain usage
    pub keychain: KeychainMode,
    /// Keychain service name of the credentials item
    pub keychain_service: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            keychain: KeychainMode::Auto,
            keychain_service: DEFAULT_KEYCHAIN_SERVICE.to_string(),
        }
    }
}

impl Config {
    /// Default location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("profsync").join("config.toml"))
    }

    /// Load configuration
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// used if present, and defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => path,
                None => {
                    debug!("No configuration file; using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let content = std::fs::read_to_string(&path).map_err(|e| {
            ProfsyncError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ProfsyncError::config(e.to_string()))
    }

    /// Check values that parse but make no sense
    pub fn validate(&self) -> Result<()> {
        if self.watch.settle.is_zero() {
            return Err(ProfsyncError::config("watch.settle must be greater than zero"));
        }
        if self.remote.description.trim().is_empty() {
            return Err(ProfsyncError::config("remote.description must not be empty"));
        }
        if self.remote.backend == Backend::Directory && self.remote.directory.is_none() {
            return Err(ProfsyncError::config(
                "remote.directory is required for the directory backend",
            ));
        }
        Ok(())
    }

    /// Resolve the configured source paths
    pub fn layout(&self, resolver: &PathResolver) -> Result<SourceLayout> {
        Ok(SourceLayout {
            config_dir: resolver.resolve(&self.sources.config_dir)?,
            config_file: resolver.resolve(&self.sources.config_file)?,
            config_backup: resolver.resolve(&self.sources.config_backup)?,
        })
    }
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}
