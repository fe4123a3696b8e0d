//! Structured event reporting for watch mode
//!
//! The watch loop never prints. It emits [`WatchEvent`]s to an
//! [`EventSink`], and the caller picks how loud that sink is.

use crate::transfer::SizeReport;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Something that happened in a watch session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Watching began
    Started {
        /// Profile being kept in sync
        profile: String,
        /// Local paths under watch
        paths: Vec<PathBuf>,
    },
    /// A change notification arrived
    ChangeDetected {
        /// Path reported by the notifier
        path: PathBuf,
    },
    /// A save was deferred until the minimum interval has passed
    Throttled {
        /// Remaining wait
        wait: Duration,
    },
    /// A save started
    SaveStarted,
    /// A save uploaded a new snapshot
    Saved {
        /// Successful saves so far in this session
        save_count: u64,
        /// Size of the upload
        size: SizeReport,
    },
    /// A save found nothing new to upload
    Unchanged,
    /// A save failed; the change stays pending
    SaveFailed {
        /// Error description
        error: String,
    },
    /// Watching ended
    Stopped {
        /// Successful saves in this session
        save_count: u64,
    },
}

/// How much a [`TracingSink`] reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Failures only
    Quiet,
    /// Session start/stop, saves and failures
    #[default]
    Normal,
    /// Every event
    Verbose,
}

/// Receiver of watch events
pub trait EventSink: Send + Sync {
    /// Record one event
    fn emit(&self, event: &WatchEvent);
}

/// Sink that forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink {
    verbosity: Verbosity,
}

impl TracingSink {
    /// Create a sink with the given verbosity
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    /// Configured verbosity
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }
}

impl EventSink for TracingSink {
    fn emit(&self, event: &WatchEvent) {
        if let WatchEvent::SaveFailed { error } = event {
            warn!("Save failed, will retry on the next change: {}", error);
            return;
        }
        match self.verbosity {
            Verbosity::Quiet => {}
            Verbosity::Normal => match event {
                WatchEvent::Started { profile, paths } => {
                    info!("Watching {} paths for profile {}", paths.len(), profile)
                }
                WatchEvent::Saved { save_count, size } => {
                    info!("Saved snapshot #{} ({} bytes)", save_count, size.encoded_bytes)
                }
                WatchEvent::Stopped { save_count } => {
                    info!("Stopped after {} saves", save_count)
                }
                other => debug!("{:?}", other),
            },
            Verbosity::Verbose => match event {
                WatchEvent::Started { profile, paths } => {
                    info!("Watching profile {}", profile);
                    for path in paths {
                        info!("  {}", path.display());
                    }
                }
                WatchEvent::ChangeDetected { path } => info!("Changed: {}", path.display()),
                WatchEvent::Throttled { wait } => {
                    info!("Next save in {}", humantime::format_duration(*wait))
                }
                WatchEvent::SaveStarted => info!("Saving"),
                WatchEvent::Saved { save_count, size } => info!(
                    "Saved snapshot #{} ({} bytes raw, {} bytes encoded)",
                    save_count, size.raw_bytes, size.encoded_bytes
                ),
                WatchEvent::Unchanged => info!("No changes since last save"),
                WatchEvent::Stopped { save_count } => info!("Stopped after {} saves", save_count),
                WatchEvent::SaveFailed { .. } => {}
            },
        }
    }
}

/// Sink that keeps every event in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<WatchEvent>>,
}

impl CollectingSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything emitted so far
    pub fn events(&self) -> Vec<WatchEvent> {
        self.events.lock().clone()
    }

    /// Number of emitted events matching `pred`
    pub fn count(&self, pred: impl Fn(&WatchEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &WatchEvent) {
        self.events.lock().push(event.clone());
    }
}

impl<S: EventSink + ?Sized> EventSink for std::sync::Arc<S> {
    fn emit(&self, event: &WatchEvent) {
        (**self).emit(event)
    }
}
