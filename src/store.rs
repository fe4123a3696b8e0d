//! Remote object store abstraction
//!
//! Profiles live in a generic named-blob store: a *slot* (found by its
//! description) holds any number of named text *entries*. The
//! [`RemoteStore`] trait captures exactly the operations the transfer
//! protocol needs, so the protocol can run against a hosted gist service
//! ([`crate::gist::GistStore`]), a plain directory ([`DirectoryStore`]) or
//! memory ([`MemoryStore`]).
//!
//! ## Error contract
//!
//! Implementations report a missing slot or entry as
//! [`ProfsyncError::ProfileNotFound`], authorization problems as
//! [`ProfsyncError::PermissionDenied`] and everything else as
//! [`ProfsyncError::Transport`]. None of them retry.

use crate::error::{ProfsyncError, Result};
use crate::utils;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// Identifier of a slot in the remote store
pub type SlotId = String;

/// One entry as returned by a read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Inline content; incomplete when `truncated` is set
    pub content: String,
    /// Whether the store cut the inline content short
    pub truncated: bool,
    /// Where to fetch the complete content
    pub raw_locator: Option<String>,
    /// Full size of the entry in bytes
    pub size_bytes: u64,
}

/// A named-blob store reachable through create/list/read/update/delete
pub trait RemoteStore: Send + Sync + fmt::Debug {
    /// Create a new slot with the given description
    fn create(&self, description: &str) -> Result<SlotId>;

    /// Find the slot carrying exactly this description
    fn find_by_description(&self, description: &str) -> Result<Option<SlotId>>;

    /// Names of all entries in a slot
    fn list_entry_names(&self, slot: &str) -> Result<Vec<String>>;

    /// Read one entry, or `None` if the slot has no such entry
    fn read_entry(&self, slot: &str, name: &str) -> Result<Option<RemoteEntry>>;

    /// Fetch complete content from a raw locator
    fn fetch_raw(&self, locator: &str) -> Result<Vec<u8>>;

    /// Create or replace an entry
    fn write_entry(&self, slot: &str, name: &str, content: &str) -> Result<()>;

    /// Remove an entry
    fn delete_entry(&self, slot: &str, name: &str) -> Result<()>;
}

/// Failure injected into a [`MemoryStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// Every call fails with a transport error
    Transport,
    /// Every call fails with a permission error
    PermissionDenied,
}

#[derive(Debug, Default)]
struct MemorySlot {
    description: String,
    entries: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    slots: BTreeMap<SlotId, MemorySlot>,
    next_id: u64,
    calls: usize,
    raw_fetches: usize,
    inline_limit: Option<usize>,
    failure: Option<InjectedFailure>,
}

/// In-process store
///
/// Clones share the same state. An optional inline limit makes reads of
/// larger entries come back truncated with a raw locator, the way hosted
/// stores behave for big content.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Truncate inline content of entries longer than `limit` bytes
    pub fn with_inline_limit(limit: usize) -> Self {
        let store = Self::default();
        store.state.lock().inline_limit = Some(limit);
        store
    }

    /// Make every subsequent call fail, or clear the failure with `None`
    pub fn inject_failure(&self, failure: Option<InjectedFailure>) {
        self.state.lock().failure = failure;
    }

    /// Number of store operations performed so far
    pub fn calls(&self) -> usize {
        self.state.lock().calls
    }

    /// Number of raw fetches performed so far
    pub fn raw_fetches(&self) -> usize {
        self.state.lock().raw_fetches
    }

    /// Raw content of an entry, bypassing truncation
    pub fn entry_content(&self, slot: &str, name: &str) -> Option<String> {
        self.state
            .lock()
            .slots
            .get(slot)
            .and_then(|s| s.entries.get(name).cloned())
    }

    fn begin(&self) -> Result<parking_lot::MutexGuard<'_, MemoryState>> {
        let mut state = self.state.lock();
        state.calls += 1;
        match state.failure {
            Some(InjectedFailure::Transport) => {
                Err(ProfsyncError::transport("injected transport failure"))
            }
            Some(InjectedFailure::PermissionDenied) => Err(ProfsyncError::PermissionDenied(
                "injected permission failure".to_string(),
            )),
            None => Ok(state),
        }
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn missing_slot(slot: &str) -> ProfsyncError {
    ProfsyncError::ProfileNotFound(format!("slot {}", slot))
}

impl RemoteStore for MemoryStore {
    fn create(&self, description: &str) -> Result<SlotId> {
        let mut state = self.begin()?;
        state.next_id += 1;
        let id = format!("mem-{}", state.next_id);
        state.slots.insert(
            id.clone(),
            MemorySlot {
                description: description.to_string(),
                entries: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    fn find_by_description(&self, description: &str) -> Result<Option<SlotId>> {
        let state = self.begin()?;
        Ok(state
            .slots
            .iter()
            .find(|(_, slot)| slot.description == description)
            .map(|(id, _)| id.clone()))
    }

    fn list_entry_names(&self, slot: &str) -> Result<Vec<String>> {
        let state = self.begin()?;
        let slot = state.slots.get(slot).ok_or_else(|| missing_slot(slot))?;
        Ok(slot.entries.keys().cloned().collect())
    }

    fn read_entry(&self, slot_id: &str, name: &str) -> Result<Option<RemoteEntry>> {
        let state = self.begin()?;
        let slot = state.slots.get(slot_id).ok_or_else(|| missing_slot(slot_id))?;
        let Some(content) = slot.entries.get(name) else {
            return Ok(None);
        };

        let size_bytes = content.len() as u64;
        let entry = match state.inline_limit {
            Some(limit) if content.len() > limit => RemoteEntry {
                content: content[..floor_char_boundary(content, limit)].to_string(),
                truncated: true,
                raw_locator: Some(format!("memory://{}/{}", slot_id, name)),
                size_bytes,
            },
            _ => RemoteEntry {
                content: content.clone(),
                truncated: false,
                raw_locator: Some(format!("memory://{}/{}", slot_id, name)),
                size_bytes,
            },
        };
        Ok(Some(entry))
    }

    fn fetch_raw(&self, locator: &str) -> Result<Vec<u8>> {
        let mut state = self.begin()?;
        state.raw_fetches += 1;
        let (slot, name) = locator
            .strip_prefix("memory://")
            .and_then(|rest| rest.split_once('/'))
            .ok_or_else(|| ProfsyncError::transport(format!("bad locator {}", locator)))?;
        state
            .slots
            .get(slot)
            .and_then(|s| s.entries.get(name))
            .map(|content| content.as_bytes().to_vec())
            .ok_or_else(|| ProfsyncError::ProfileNotFound(name.to_string()))
    }

    fn write_entry(&self, slot_id: &str, name: &str, content: &str) -> Result<()> {
        let mut state = self.begin()?;
        let slot = state
            .slots
            .get_mut(slot_id)
            .ok_or_else(|| missing_slot(slot_id))?;
        slot.entries.insert(name.to_string(), content.to_string());
        Ok(())
    }

    fn delete_entry(&self, slot_id: &str, name: &str) -> Result<()> {
        let mut state = self.begin()?;
        let slot = state
            .slots
            .get_mut(slot_id)
            .ok_or_else(|| missing_slot(slot_id))?;
        slot.entries
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ProfsyncError::ProfileNotFound(name.to_string()))
    }
}

/// File holding a slot's description inside its directory
const DESCRIPTION_FILE: &str = ".description";

/// Store backed by a local directory
///
/// Each slot is a subdirectory of the root and each entry a file inside
/// it. Useful for keeping profiles on a mounted drive or a synced folder.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Use `root` as the store location; it is created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store location
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn slot_dir(&self, slot: &str) -> Result<PathBuf> {
        check_name(slot)?;
        let dir = self.root.join(slot);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(missing_slot(slot))
        }
    }
}

/// Entry and slot names must be single, non-hidden path components
fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        return Err(ProfsyncError::transport(format!("invalid entry name {:?}", name)));
    }
    Ok(())
}

fn io_transport(context: &str, path: &Path, e: std::io::Error) -> ProfsyncError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        ProfsyncError::PermissionDenied(format!("{} {}", context, path.display()))
    } else {
        ProfsyncError::transport(format!("{} {}: {}", context, path.display(), e))
    }
}

impl RemoteStore for DirectoryStore {
    fn create(&self, description: &str) -> Result<SlotId> {
        let digest = Sha256::digest(description.as_bytes());
        let id = format!("slot-{}", &hex::encode(digest)[..16]);
        let dir = self.root.join(&id);
        fs::create_dir_all(&dir).map_err(|e| io_transport("cannot create", &dir, e))?;
        utils::atomic_write(&dir.join(DESCRIPTION_FILE), description.as_bytes())?;
        debug!("Created directory slot {}", dir.display());
        Ok(id)
    }

    fn find_by_description(&self, description: &str) -> Result<Option<SlotId>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_transport("cannot list", &self.root, e)),
        };

        let mut found: Vec<SlotId> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                fs::read_to_string(entry.path().join(DESCRIPTION_FILE))
                    .map(|d| d == description)
                    .unwrap_or(false)
            })
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        found.sort();
        Ok(found.into_iter().next())
    }

    fn list_entry_names(&self, slot: &str) -> Result<Vec<String>> {
        let dir = self.slot_dir(slot)?;
        let mut names: Vec<String> = fs::read_dir(&dir)
            .map_err(|e| io_transport("cannot list", &dir, e))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| name != DESCRIPTION_FILE)
            .collect();
        names.sort();
        Ok(names)
    }

    fn read_entry(&self, slot: &str, name: &str) -> Result<Option<RemoteEntry>> {
        check_name(name)?;
        let path = self.slot_dir(slot)?.join(name);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(RemoteEntry {
                size_bytes: content.len() as u64,
                content,
                truncated: false,
                raw_locator: Some(path.to_string_lossy().into_owned()),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_transport("cannot read", &path, e)),
        }
    }

    fn fetch_raw(&self, locator: &str) -> Result<Vec<u8>> {
        let path = PathBuf::from(locator);
        let inside = path
            .strip_prefix(&self.root)
            .map(utils::is_contained)
            .unwrap_or(false);
        if !inside {
            return Err(ProfsyncError::transport(format!(
                "locator {} is outside the store",
                locator
            )));
        }
        fs::read(&path).map_err(|e| io_transport("cannot read", &path, e))
    }

    fn write_entry(&self, slot: &str, name: &str, content: &str) -> Result<()> {
        check_name(name)?;
        let path = self.slot_dir(slot)?.join(name);
        utils::atomic_write(&path, content.as_bytes())?;
        trace!("Wrote {} ({} bytes)", path.display(), content.len());
        Ok(())
    }

    fn delete_entry(&self, slot: &str, name: &str) -> Result<()> {
        check_name(name)?;
        let path = self.slot_dir(slot)?.join(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ProfsyncError::ProfileNotFound(name.to_string()))
            }
            Err(e) => Err(io_transport("cannot delete", &path, e)),
        }
    }
}
