//! Archive codec: watched sources to a single compressed blob and back
//!
//! Profiles are stored as gzip-compressed tar archives. Each watched source
//! becomes one root entry named after its fixed entry name (see
//! [`crate::types`]); directories are added recursively with their relative
//! structure preserved. Credentials from a virtual source become one more
//! file entry holding canonical JSON.
//!
//! ## Determinism
//!
//! Entries are written in sorted order, but headers carry file modification
//! times, so two builds of unchanged sources may still differ byte for byte.
//! Change detection belongs to [`crate::fingerprint`], never to archive
//! hashes.
//!
//! ## Error policy
//!
//! Per-file problems (a file vanishing mid-build, an unreadable file) are
//! logged and skipped. Whole-operation problems fail: a build where no source
//! exists returns [`ProfsyncError::NoContent`], and any malformed, truncated
//! or unsafe archive on extraction returns
//! [`ProfsyncError::ExtractionFailed`].
//!
//! ## Examples
//!
//! ```rust,no_run
//! use profsync::archive;
//! use profsync::types::SourceLayout;
//! use std::path::Path;
//!
//! # fn main() -> profsync::Result<()> {
//! let layout = SourceLayout::under(Path::new("/home/alex"));
//! let blob = archive::build(&layout.sources(), None)?;
//!
//! let restore_dir = tempfile::tempdir()?;
//! archive::extract(&blob, restore_dir.path())?;
//! # Ok(())
//! # }
//! ```

use crate::credentials::Credentials;
use crate::error::{ProfsyncError, Result};
use crate::fingerprint::scan_directory;
use crate::types::{ArchiveBlob, WatchedSource, KEYCHAIN_CREDENTIALS_ENTRY};
use crate::utils;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tar::{EntryType, Header};
use tracing::{debug, trace, warn};

/// Fixed gzip level used for every archive
pub const COMPRESSION_LEVEL: u32 = 9;

/// Counters gathered while building an archive
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildStats {
    /// Sources that existed and were added
    pub sources_added: usize,
    /// Regular file entries written
    pub files: usize,
    /// Directory entries written
    pub directories: usize,
    /// Uncompressed bytes of file content
    pub content_bytes: u64,
    /// Whether the virtual credentials entry was written
    pub credentials: bool,
}

/// One entry listed from an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Entry path inside the archive
    pub path: String,
    /// Uncompressed size in bytes
    pub size: u64,
    /// Whether the entry is a directory
    pub is_dir: bool,
}

/// Build an archive from the given sources
///
/// See [`build_with_stats`].
pub fn build(sources: &[WatchedSource], credentials: Option<&Credentials>) -> Result<ArchiveBlob> {
    build_with_stats(sources, credentials).map(|(blob, _)| blob)
}

/// Build an archive and report what went into it
///
/// # Errors
///
/// - [`ProfsyncError::NoContent`] if no source exists and no credentials are
///   given
/// - [`ProfsyncError::Io`] if the compressed stream cannot be written
pub fn build_with_stats(
    sources: &[WatchedSource],
    credentials: Option<&Credentials>,
) -> Result<(ArchiveBlob, BuildStats)> {
    let encoder = GzEncoder::new(Vec::new(), Compression::new(COMPRESSION_LEVEL));
    let mut builder = tar::Builder::new(encoder);
    let mut stats = BuildStats::default();

    for source in sources {
        let metadata = match fs::metadata(&source.path) {
            Ok(metadata) => metadata,
            Err(_) => {
                debug!("Source {} does not exist, skipping", source.path.display());
                continue;
            }
        };

        if metadata.is_dir() {
            append_directory(&mut builder, &source.entry_name, &metadata)?;
            stats.directories += 1;

            for entry in scan_directory(&source.path) {
                let name = format!("{}/{}", source.entry_name, entry.relative);
                if entry.is_dir {
                    match fs::metadata(&entry.path) {
                        Ok(meta) => {
                            append_directory(&mut builder, &name, &meta)?;
                            stats.directories += 1;
                        }
                        Err(e) => debug!("Skipping directory {}: {}", entry.path.display(), e),
                    }
                } else if entry.is_file {
                    if let Some(size) = append_file(&mut builder, &name, &entry.path)? {
                        stats.files += 1;
                        stats.content_bytes += size;
                    }
                } else {
                    trace!("Skipping special file {}", entry.path.display());
                }
            }
            stats.sources_added += 1;
        } else if metadata.is_file() {
            if let Some(size) = append_file(&mut builder, &source.entry_name, &source.path)? {
                stats.files += 1;
                stats.content_bytes += size;
                stats.sources_added += 1;
            }
        }
    }

    if let Some(credentials) = credentials {
        let json = credentials.to_canonical_json()?;
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_mode(0o600);
        header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
        header.set_size(json.len() as u64);
        builder.append_data(&mut header, KEYCHAIN_CREDENTIALS_ENTRY, json.as_slice())?;
        stats.credentials = true;
        stats.content_bytes += json.len() as u64;
    }

    if stats.sources_added == 0 && !stats.credentials {
        return Err(ProfsyncError::NoContent);
    }

    let mut encoder = builder.into_inner()?;
    encoder.flush()?;
    let bytes = encoder.finish()?;

    debug!(
        "Built archive: {} files, {} directories, {} -> {} bytes",
        stats.files,
        stats.directories,
        stats.content_bytes,
        bytes.len()
    );
    Ok((ArchiveBlob::new(bytes), stats))
}

fn mtime_of(metadata: &fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(unix)]
fn mode_of(metadata: &fs::Metadata, fallback: u32) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    let mode = metadata.permissions().mode() & 0o7777;
    if mode == 0 {
        fallback
    } else {
        mode
    }
}

#[cfg(not(unix))]
fn mode_of(_metadata: &fs::Metadata, fallback: u32) -> u32 {
    fallback
}

#[cfg(unix)]
fn set_directory_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_directory_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

fn append_directory<W: Write>(
    builder: &mut tar::Builder<W>,
    name: &str,
    metadata: &fs::Metadata,
) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Directory);
    header.set_mode(mode_of(metadata, 0o755));
    header.set_mtime(mtime_of(metadata));
    header.set_size(0);
    builder.append_data(&mut header, format!("{}/", name), std::io::empty())?;
    Ok(())
}

/// Append one regular file, returning its size, or `None` if it could not
/// be read
///
/// The content is read fully before the header is written so the declared
/// size always matches, even if the file is being rewritten concurrently.
fn append_file<W: Write>(
    builder: &mut tar::Builder<W>,
    name: &str,
    path: &Path,
) -> Result<Option<u64>> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) => {
            debug!("Skipping unreadable file {}: {}", path.display(), e);
            return Ok(None);
        }
    };
    let metadata = fs::metadata(path).ok();

    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_mode(metadata.as_ref().map(|m| mode_of(m, 0o644)).unwrap_or(0o644));
    header.set_mtime(metadata.as_ref().map(mtime_of).unwrap_or(0));
    header.set_size(content.len() as u64);
    builder.append_data(&mut header, name, content.as_slice())?;
    trace!("Archived {} ({} bytes)", name, content.len());
    Ok(Some(content.len() as u64))
}

fn corrupt(e: impl std::fmt::Display) -> ProfsyncError {
    ProfsyncError::extraction(e.to_string())
}

/// Extract every entry of an archive into `dest`
///
/// Intermediate directories are created as needed. Only regular files and
/// directories are written; other entry types are skipped with a warning.
/// Directory modes are applied after every file is in place, so a
/// read-only directory in the archive does not block its own contents.
///
/// # Errors
///
/// Returns [`ProfsyncError::ExtractionFailed`] if the blob is not a valid
/// gzip/tar stream, is truncated, or contains an entry whose path is
/// absolute or escapes `dest`.
pub fn extract(blob: &ArchiveBlob, dest: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dest)?;

    let mut archive = tar::Archive::new(GzDecoder::new(blob.as_bytes()));
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    let mut written = Vec::new();
    let mut directories = Vec::new();
    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let path = entry.path().map_err(corrupt)?.into_owned();

        if !utils::is_contained(&path) {
            return Err(ProfsyncError::extraction(format!(
                "unsafe entry path {}",
                path.display()
            )));
        }

        match entry.header().entry_type() {
            EntryType::Regular => {}
            EntryType::Directory => {
                let mode = entry.header().mode().map_err(corrupt)?;
                let target = dest.join(&path);
                fs::create_dir_all(&target)?;
                directories.push((target, mode));
                written.push(path);
                continue;
            }
            other => {
                warn!("Skipping archive entry {} of type {:?}", path.display(), other);
                continue;
            }
        }

        let unpacked = entry.unpack_in(dest).map_err(corrupt)?;
        if !unpacked {
            return Err(ProfsyncError::extraction(format!(
                "entry {} escapes the destination",
                path.display()
            )));
        }
        written.push(path);
    }

    // Reading to the end makes the decoder check the gzip trailer and CRC.
    let mut rest = archive.into_inner();
    std::io::copy(&mut rest, &mut std::io::sink()).map_err(corrupt)?;

    // Deepest first; archives list parents before children.
    for (directory, mode) in directories.iter().rev() {
        set_directory_mode(directory, *mode)?;
    }

    debug!("Extracted {} entries into {}", written.len(), dest.display());
    Ok(written)
}

/// List the entries of an archive without writing anything
///
/// # Errors
///
/// Returns [`ProfsyncError::ExtractionFailed`] for malformed archives.
pub fn list_entries(blob: &ArchiveBlob) -> Result<Vec<ArchiveEntry>> {
    let mut archive = tar::Archive::new(GzDecoder::new(blob.as_bytes()));
    let mut listed = Vec::new();

    for entry in archive.entries().map_err(corrupt)? {
        let entry = entry.map_err(corrupt)?;
        let path = entry.path().map_err(corrupt)?;
        let path = path.to_string_lossy().trim_end_matches('/').to_string();
        listed.push(ArchiveEntry {
            path,
            size: entry.header().size().map_err(corrupt)?,
            is_dir: entry.header().entry_type() == EntryType::Directory,
        });
    }
    Ok(listed)
}
