//! Credential sources and credential schema normalization
//!
//! On platforms with an OS keychain, the application keeps its OAuth
//! credentials there rather than in a plain file. profsync treats the
//! keychain as a virtual source: it is read, normalized and folded into the
//! fingerprint and the archive as if it were one more file.
//!
//! ## Schema versions
//!
//! Credential JSON has changed shape over time. Every known shape is one
//! variant of [`CredentialDocument`], and [`CredentialDocument::normalize`]
//! maps each of them to the single canonical [`Credentials`] value:
//!
//! - [`CredentialDocument::Canonical`]: profsync's own serialized form,
//!   `{"version": 2, "access_token": ..., "expires_at_ms": ...}`
//! - [`CredentialDocument::Nested`]: `{"oauth": {"accessToken": ...}}`, the
//!   shape the application currently writes
//! - [`CredentialDocument::Flat`]: `{"accessToken": ..., "expiresAt": ...}`
//! - [`CredentialDocument::Snake`]: `{"access_token": ..., "expires_at": <secs>,
//!   "scope": "a b"}`
//!
//! The archive always stores the canonical form; restore writes back the
//! nested form.

use crate::error::{ProfsyncError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Version tag written into the canonical form
pub const CANONICAL_VERSION: u32 = 2;

/// Default keychain service name
pub const DEFAULT_KEYCHAIN_SERVICE: &str = "assistant-credentials";

/// Canonical credential shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// OAuth access token
    pub access_token: String,
    /// OAuth refresh token
    pub refresh_token: Option<String>,
    /// Expiry as milliseconds since the Unix epoch
    pub expires_at_ms: Option<i64>,
    /// Granted scopes, sorted and deduplicated
    pub scopes: Vec<String>,
}

impl Credentials {
    /// Serialize to the canonical JSON form stored in archives
    ///
    /// Field order is fixed by the struct, so equal credentials always
    /// produce identical bytes.
    pub fn to_canonical_json(&self) -> Result<Vec<u8>> {
        let doc = CanonicalCredentials {
            version: CANONICAL_VERSION,
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at_ms: self.expires_at_ms,
            scopes: self.scopes.clone(),
        };
        Ok(serde_json::to_vec_pretty(&doc)?)
    }

    /// Serialize to the nested shape the application reads
    pub fn to_application_json(&self) -> Result<String> {
        let doc = NestedCredentials {
            oauth: FlatCredentials {
                access_token: self.access_token.clone(),
                refresh_token: self.refresh_token.clone(),
                expires_at: self.expires_at_ms,
                scopes: Some(self.scopes.clone()),
            },
        };
        Ok(serde_json::to_string(&doc)?)
    }

    /// Parse any known credential shape and normalize it
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Ok(CredentialDocument::parse(bytes)?.normalize())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CanonicalCredentials {
    version: u32,
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at_ms: Option<i64>,
    #[serde(default)]
    scopes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedCredentials {
    #[serde(alias = "claudeAiOauth", alias = "oauthCredentials")]
    oauth: FlatCredentials,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatCredentials {
    access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scopes: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnakeCredentials {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Seconds since the Unix epoch
    #[serde(default)]
    expires_at: Option<i64>,
    /// Space-separated scope list
    #[serde(default)]
    scope: Option<String>,
}

/// Every credential JSON shape profsync understands
///
/// Variants are tried in declaration order; the canonical form is the most
/// specific and is tried first.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CredentialDocument {
    /// profsync's versioned canonical form
    Canonical(CanonicalCredentials),
    /// Current application form, wrapped in an `oauth` object
    Nested(NestedCredentials),
    /// Older unwrapped camelCase form
    Flat(FlatCredentials),
    /// Oldest snake_case form with second-resolution expiry
    Snake(SnakeCredentials),
}

impl CredentialDocument {
    /// Parse credential JSON in any known shape
    ///
    /// # Errors
    ///
    /// Returns [`ProfsyncError::Credentials`] if the bytes are not JSON or
    /// match none of the known shapes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            ProfsyncError::Credentials(format!("unrecognized credential format: {}", e))
        })
    }

    /// Map this document to the canonical shape
    pub fn normalize(self) -> Credentials {
        let (access_token, refresh_token, expires_at_ms, mut scopes) = match self {
            CredentialDocument::Canonical(c) => {
                (c.access_token, c.refresh_token, c.expires_at_ms, c.scopes)
            }
            CredentialDocument::Nested(NestedCredentials { oauth: f })
            | CredentialDocument::Flat(f) => (
                f.access_token,
                f.refresh_token,
                f.expires_at,
                f.scopes.unwrap_or_default(),
            ),
            CredentialDocument::Snake(s) => (
                s.access_token,
                s.refresh_token,
                s.expires_at.map(|secs| secs.saturating_mul(1000)),
                s.scope
                    .map(|scope| scope.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default(),
            ),
        };
        scopes.sort();
        scopes.dedup();

        Credentials {
            access_token,
            refresh_token,
            expires_at_ms,
            scopes,
        }
    }
}

/// An optional, platform-conditional source of credentials
pub trait CredentialSource: Send + Sync + fmt::Debug {
    /// Read the current credentials, if any are stored
    fn read(&self) -> Result<Option<Credentials>>;

    /// Replace the stored credentials
    fn write(&self, credentials: &Credentials) -> Result<()>;

    /// Whether credentials live in an OS keychain rather than a plain file
    ///
    /// This decides which credential entry the verification gate treats as
    /// essential.
    fn is_keychain(&self) -> bool {
        false
    }
}

/// Credential source for platforms without a keychain
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentials;

impl CredentialSource for NoCredentials {
    fn read(&self) -> Result<Option<Credentials>> {
        Ok(None)
    }

    fn write(&self, _credentials: &Credentials) -> Result<()> {
        Err(ProfsyncError::Credentials(
            "no credential source is configured on this platform".to_string(),
        ))
    }
}

/// In-memory credential source
///
/// Behaves like a keychain; useful for tests and for embedding.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    inner: Mutex<Option<Credentials>>,
}

impl StaticCredentials {
    /// Create a source holding the given credentials
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self {
            inner: Mutex::new(credentials),
        }
    }
}

impl CredentialSource for StaticCredentials {
    fn read(&self) -> Result<Option<Credentials>> {
        Ok(self.inner.lock().clone())
    }

    fn write(&self, credentials: &Credentials) -> Result<()> {
        *self.inner.lock() = Some(credentials.clone());
        Ok(())
    }

    fn is_keychain(&self) -> bool {
        true
    }
}

/// macOS keychain accessed through the `security` tool
#[derive(Debug, Clone)]
pub struct KeychainSource {
    service: String,
    account: String,
}

/// Exit status `security` uses when an item does not exist
const SECURITY_ITEM_NOT_FOUND: i32 = 44;

/// Interactive-mode line that adds or updates the item
///
/// The secret goes in hex through stdin, never on a command line other
/// processes can read.
fn add_item_command(service: &str, account: &str, secret: &str) -> String {
    let quote = |s: &str| s.replace('\\', "\\\\").replace('"', "\\\"");
    format!(
        "add-generic-password -U -s \"{}\" -a \"{}\" -X {}\n",
        quote(service),
        quote(account),
        hex::encode(secret)
    )
}

impl KeychainSource {
    /// Keychain source for a generic-password item
    pub fn new(service: impl Into<String>) -> Self {
        let account = std::env::var("USER").unwrap_or_else(|_| "profsync".to_string());
        Self {
            service: service.into(),
            account,
        }
    }

    /// Whether this platform has a keychain profsync can use
    pub fn is_supported() -> bool {
        cfg!(target_os = "macos")
    }
}

impl CredentialSource for KeychainSource {
    fn read(&self) -> Result<Option<Credentials>> {
        let output = Command::new("security")
            .args(["find-generic-password", "-s", &self.service, "-w"])
            .output()
            .map_err(|e| ProfsyncError::Credentials(format!("cannot run security: {}", e)))?;

        if output.status.code() == Some(SECURITY_ITEM_NOT_FOUND) {
            debug!("No keychain item for service {}", self.service);
            return Ok(None);
        }
        if !output.status.success() {
            return Err(ProfsyncError::Credentials(format!(
                "security exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        match Credentials::parse(raw.as_bytes()) {
            Ok(credentials) => Ok(Some(credentials)),
            Err(e) => {
                warn!("Ignoring unreadable keychain item {}: {}", self.service, e);
                Ok(None)
            }
        }
    }

    fn write(&self, credentials: &Credentials) -> Result<()> {
        let json = credentials.to_application_json()?;
        let command = add_item_command(&self.service, &self.account, &json);
        let mut child = Command::new("security")
            .arg("-i")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProfsyncError::Credentials(format!("cannot run security: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(command.as_bytes())?;
        }
        let output = child.wait_with_output()?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() && stderr.trim().is_empty() {
            Ok(())
        } else {
            Err(ProfsyncError::Credentials(format!(
                "security add-generic-password failed ({}): {}",
                output.status,
                stderr.trim()
            )))
        }
    }

    fn is_keychain(&self) -> bool {
        true
    }
}
