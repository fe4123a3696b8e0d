//! Size-aware transfer of archives to and from the remote store
//!
//! Profiles live as base64 text entries named `<profile>.profile.b64` inside
//! one slot, which is found by its description and created on first upload.
//! Encoding inflates every archive by roughly a third, so size categories
//! are always computed on the encoded length.
//!
//! Reads of large entries may come back truncated. Whenever that happens the
//! inline payload is discarded and the complete content is fetched from the
//! raw locator.

use crate::error::{ProfsyncError, Result};
use crate::store::{RemoteStore, SlotId};
use crate::types::{ArchiveBlob, ProfileName};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Suffix of every profile entry in the slot
pub const PROFILE_ENTRY_SUFFIX: &str = ".profile.b64";
/// Largest entry the remote API accepts
pub const HARD_LIMIT_BYTES: u64 = 100 * 1024 * 1024;
/// Largest entry the remote web interface can display
pub const WEB_INTERFACE_LIMIT_BYTES: u64 = 25 * 1024 * 1024;
/// Size above which an upload is reported as large
pub const LARGE_WARNING_BYTES: u64 = 10 * 1024 * 1024;

/// Size categories of one encoded upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeReport {
    /// Archive size before encoding
    pub raw_bytes: u64,
    /// Size of the base64 text actually sent
    pub encoded_bytes: u64,
    /// Encoded size is at most the hard API limit
    pub within_limit: bool,
    /// Encoded size is above the large warning threshold
    pub is_large: bool,
    /// Encoded size is above what the web interface displays
    pub exceeds_web_interface_limit: bool,
}

impl SizeReport {
    /// Categorize an archive of `raw_bytes` bytes
    pub fn for_archive(raw_bytes: u64) -> Self {
        Self::for_encoded(raw_bytes, encoded_len(raw_bytes))
    }

    fn for_encoded(raw_bytes: u64, encoded_bytes: u64) -> Self {
        Self {
            raw_bytes,
            encoded_bytes,
            within_limit: encoded_bytes <= HARD_LIMIT_BYTES,
            is_large: encoded_bytes > LARGE_WARNING_BYTES,
            exceeds_web_interface_limit: encoded_bytes > WEB_INTERFACE_LIMIT_BYTES,
        }
    }
}

/// Length of padded base64 for `raw` input bytes
pub fn encoded_len(raw: u64) -> u64 {
    raw.div_ceil(3) * 4
}

/// Remote entry name for a profile
pub fn entry_name(profile: &ProfileName) -> String {
    format!("{}{}", profile, PROFILE_ENTRY_SUFFIX)
}

/// Encode an archive for a text-oriented slot
pub fn encode(blob: &ArchiveBlob) -> String {
    STANDARD.encode(blob.as_bytes())
}

/// Decode entry text back into an archive, ignoring line breaks
pub fn decode(text: &str) -> Result<ArchiveBlob> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map(ArchiveBlob::new)
        .map_err(|e| {
            ProfsyncError::extraction(format!("profile content is not valid base64: {}", e))
        })
}

/// Transfer protocol over a [`RemoteStore`]
#[derive(Debug)]
pub struct Transfer {
    store: Arc<dyn RemoteStore>,
    description: String,
    slot: Mutex<Option<SlotId>>,
}

impl Transfer {
    /// Use the slot described by `description` in `store`
    pub fn new(store: Arc<dyn RemoteStore>, description: impl Into<String>) -> Self {
        Self {
            store,
            description: description.into(),
            slot: Mutex::new(None),
        }
    }

    /// Slot description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    fn find_slot(&self) -> Result<Option<SlotId>> {
        if let Some(slot) = self.slot.lock().clone() {
            return Ok(Some(slot));
        }
        let found = self.store.find_by_description(&self.description)?;
        if let Some(slot) = &found {
            debug!("Using remote slot {}", slot);
            *self.slot.lock() = Some(slot.clone());
        }
        Ok(found)
    }

    fn slot_or_create(&self) -> Result<SlotId> {
        if let Some(slot) = self.find_slot()? {
            return Ok(slot);
        }
        let slot = self.store.create(&self.description)?;
        info!("Created remote slot {} ({})", slot, self.description);
        *self.slot.lock() = Some(slot.clone());
        Ok(slot)
    }

    /// Store `blob` under `profile`, replacing any previous content
    pub fn upload(&self, profile: &ProfileName, blob: &ArchiveBlob) -> Result<SizeReport> {
        let encoded = encode(blob);
        let report = SizeReport::for_encoded(blob.len() as u64, encoded.len() as u64);

        if !report.within_limit {
            warn!(
                "Profile {} is {} bytes encoded, above the remote limit; upload will likely fail",
                profile, report.encoded_bytes
            );
        } else if report.exceeds_web_interface_limit {
            warn!("Profile {} is too large to view in the web interface", profile);
        } else if report.is_large {
            warn!("Profile {} is large ({} bytes encoded)", profile, report.encoded_bytes);
        }

        let slot = self.slot_or_create()?;
        self.store.write_entry(&slot, &entry_name(profile), &encoded)?;
        debug!("Uploaded {} ({} bytes encoded)", profile, report.encoded_bytes);
        Ok(report)
    }

    /// Fetch the archive stored under `profile`
    pub fn download(&self, profile: &ProfileName) -> Result<ArchiveBlob> {
        let not_found = || ProfsyncError::ProfileNotFound(profile.to_string());
        let slot = self.find_slot()?.ok_or_else(not_found)?;
        let entry = self
            .store
            .read_entry(&slot, &entry_name(profile))?
            .ok_or_else(not_found)?;

        if !entry.truncated {
            return decode(&entry.content);
        }

        let locator = entry.raw_locator.ok_or_else(|| {
            ProfsyncError::transport(format!(
                "content of {} was truncated and no raw locator was provided",
                profile
            ))
        })?;
        debug!(
            "Inline content of {} truncated ({} of {} bytes); fetching raw",
            profile,
            entry.content.len(),
            entry.size_bytes
        );
        let raw = self.store.fetch_raw(&locator)?;
        let text = String::from_utf8(raw)
            .map_err(|_| ProfsyncError::extraction("raw profile content is not text"))?;
        decode(&text)
    }

    /// Whether a profile named `profile` is stored
    pub fn exists(&self, profile: &ProfileName) -> Result<bool> {
        let Some(slot) = self.find_slot()? else {
            return Ok(false);
        };
        let wanted = entry_name(profile);
        Ok(self
            .store
            .list_entry_names(&slot)?
            .iter()
            .any(|name| *name == wanted))
    }

    /// Remove the profile named `profile`
    pub fn delete(&self, profile: &ProfileName) -> Result<()> {
        let slot = self
            .find_slot()?
            .ok_or_else(|| ProfsyncError::ProfileNotFound(profile.to_string()))?;
        self.store
            .delete_entry(&slot, &entry_name(profile))
            .map_err(|e| match e {
                ProfsyncError::ProfileNotFound(_) => {
                    ProfsyncError::ProfileNotFound(profile.to_string())
                }
                other => other,
            })
    }

    /// Names of all stored profiles, sorted
    ///
    /// Entries that are not profiles, or whose names would not pass
    /// validation, are ignored.
    pub fn list(&self) -> Result<Vec<ProfileName>> {
        let Some(slot) = self.find_slot()? else {
            return Ok(Vec::new());
        };
        let mut profiles: Vec<ProfileName> = self
            .store
            .list_entry_names(&slot)?
            .iter()
            .filter_map(|name| name.strip_suffix(PROFILE_ENTRY_SUFFIX))
            .filter_map(|stem| ProfileName::new(stem).ok())
            .collect();
        profiles.sort();
        Ok(profiles)
    }
}
