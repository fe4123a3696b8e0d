//! File system watcher feeding watch mode
//!
//! [`FsWatcher`] uses the OS notification API through `notify`. Directory
//! sources are watched recursively. File sources are watched through their
//! parent directory, non-recursively, with events filtered down to the file
//! itself. That way editors that replace a file by renaming over it are
//! still seen. Sources that do not exist yet are watched the same way, so
//! their creation is noticed.
//!
//! A directory source that appears after the watch started is registered
//! recursively once its creation is seen, so later writes inside it are
//! reported too. Registration happens off the notification thread, which
//! `notify` backends block on while adding a watch.
//!
//! Every relevant path is sent into a tokio channel. The watcher does not
//! coalesce anything; that is the scheduler's job.

use crate::error::{ProfsyncError, Result};
use crate::types::{SourceKind, WatchedSource};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, trace, warn};

/// What a notification must match to be forwarded
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    /// Anything at or below this directory
    Tree(PathBuf),
    /// Exactly this path
    Exact(PathBuf),
}

impl Target {
    fn matches(&self, path: &Path) -> bool {
        match self {
            Target::Tree(root) => path.starts_with(root),
            Target::Exact(target) => path == target,
        }
    }
}

/// State shared with the notification callback
#[derive(Default)]
struct Shared {
    watcher: Mutex<Option<RecommendedWatcher>>,
    /// Directory sources registered after they appeared
    late: Mutex<BTreeSet<PathBuf>>,
    running: AtomicBool,
}

impl Shared {
    /// Recursively watch a directory source that was just created
    fn register_late(self: Arc<Self>, root: PathBuf) {
        if !self.running.load(Ordering::Relaxed) {
            return;
        }
        let mut watcher = self.watcher.lock();
        let Some(watcher) = watcher.as_mut() else {
            return;
        };
        match watcher.watch(&root, RecursiveMode::Recursive) {
            Ok(()) => {
                debug!("Watching new directory {}", root.display());
                self.late.lock().insert(root);
            }
            Err(e) => warn!("Cannot watch new directory {}: {}", root.display(), e),
        }
    }
}

/// Watcher over a fixed set of sources
pub struct FsWatcher {
    shared: Arc<Shared>,
    /// Directories registered with the OS and how
    registrations: BTreeMap<PathBuf, RecursiveMode>,
}

impl std::fmt::Debug for FsWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsWatcher")
            .field("registrations", &self.registrations)
            .field("late", &*self.shared.late.lock())
            .field("running", &self.is_running())
            .finish()
    }
}

impl FsWatcher {
    /// Prepare a watcher that sends changed paths into `tx`
    ///
    /// # Errors
    ///
    /// Returns [`ProfsyncError::Watch`] if no source, nor the parent of any
    /// source, exists, or if the OS watcher cannot be created.
    pub fn new(sources: &[WatchedSource], tx: UnboundedSender<PathBuf>) -> Result<Self> {
        let mut targets = Vec::new();
        let mut registrations = BTreeMap::new();

        for source in sources {
            if source.kind == SourceKind::Directory && source.path.is_dir() {
                registrations.insert(source.path.clone(), RecursiveMode::Recursive);
                targets.push(Target::Tree(source.path.clone()));
                continue;
            }
            match source.path.parent().filter(|p| p.is_dir()) {
                Some(parent) => {
                    registrations
                        .entry(parent.to_path_buf())
                        .or_insert(RecursiveMode::NonRecursive);
                    targets.push(if source.kind == SourceKind::Directory {
                        Target::Tree(source.path.clone())
                    } else {
                        Target::Exact(source.path.clone())
                    });
                }
                None => debug!("Nothing to watch for {}", source.path.display()),
            }
        }

        if registrations.is_empty() {
            return Err(ProfsyncError::Watch(
                "none of the configured sources or their parent directories exist".to_string(),
            ));
        }

        let roots: Vec<PathBuf> = sources
            .iter()
            .filter(|s| s.kind == SourceKind::Directory)
            .map(|s| s.path.clone())
            .collect();
        let shared = Arc::new(Shared::default());
        let weak = Arc::downgrade(&shared);
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                Self::register_created_roots(&event, &roots, &weak);
                Self::handle_event(event, &targets, &tx);
            }
            Err(e) => error!("Watch error: {}", e),
        })?;
        *shared.watcher.lock() = Some(watcher);

        Ok(Self {
            shared,
            registrations,
        })
    }

    /// Register all watches with the OS
    pub fn watch(&self) -> Result<()> {
        if self.shared.running.swap(true, Ordering::Relaxed) {
            debug!("Watcher already running");
            return Ok(());
        }

        let mut watcher = self.shared.watcher.lock();
        let Some(watcher) = watcher.as_mut() else {
            return Err(ProfsyncError::Watch("watcher is gone".to_string()));
        };
        for (path, mode) in &self.registrations {
            trace!("Watching {} ({:?})", path.display(), mode);
            watcher.watch(path, *mode)?;
        }
        info!("Watching {} locations", self.registrations.len());
        Ok(())
    }

    /// Remove all watches; no more paths are sent afterwards
    pub fn stop(&self) -> Result<()> {
        if !self.shared.running.swap(false, Ordering::Relaxed) {
            return Ok(());
        }

        let mut watcher = self.shared.watcher.lock();
        let Some(watcher) = watcher.as_mut() else {
            return Ok(());
        };
        let late = std::mem::take(&mut *self.shared.late.lock());
        for path in self.registrations.keys().chain(late.iter()) {
            if let Err(e) = watcher.unwatch(path) {
                debug!("Unwatching {} failed: {}", path.display(), e);
            }
        }
        debug!("Stopped file system watch");
        Ok(())
    }

    /// Whether watches are registered
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Relaxed)
    }

    /// Directories registered with the OS
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: BTreeSet<PathBuf> = self.registrations.keys().cloned().collect();
        paths.extend(self.shared.late.lock().iter().cloned());
        paths.into_iter().collect()
    }

    fn register_created_roots(event: &Event, roots: &[PathBuf], shared: &Weak<Shared>) {
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Any) {
            return;
        }
        for path in &event.paths {
            if !roots.contains(path) || !path.is_dir() {
                continue;
            }
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let root = path.clone();
            std::thread::spawn(move || shared.register_late(root));
        }
    }

    fn handle_event(event: Event, targets: &[Target], tx: &UnboundedSender<PathBuf>) {
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
        ) {
            return;
        }
        for path in event.paths {
            if targets.iter().any(|t| t.matches(&path)) {
                trace!("Change at {}", path.display());
                // A closed channel means the session is over
                let _ = tx.send(path);
            }
        }
    }
}

impl Drop for FsWatcher {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
