//! Async driver for watch mode
//!
//! [`run_watch`] owns a [`SaveCycle`], one timer, the change channel and at
//! most one save task. It turns channel messages, timer expiry and save
//! completion into scheduler events and carries out the commands that come
//! back. Saves run on the blocking pool, so change notifications keep being
//! received and recorded while a save is in flight.
//!
//! What a save does is behind the [`Saver`] trait. [`ProfileSaver`] is the
//! real one: run the live verification gate, fingerprint, compare against
//! the last uploaded fingerprint, build and upload.

use crate::archive;
use crate::credentials::CredentialSource;
use crate::error::{ProfsyncError, Result};
use crate::fingerprint::compute_fingerprint;
use crate::scheduler::{Command, SaveCycle, SaveState, SchedulerEvent};
use crate::sink::{EventSink, WatchEvent};
use crate::transfer::{SizeReport, Transfer};
use crate::types::{Fingerprint, ProfileName, SourceLayout};
use crate::verification::{GateRequirements, ProfileVerifier};
use parking_lot::Mutex;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Result of one save attempt that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A new snapshot was uploaded
    Uploaded(SizeReport),
    /// Content matched the last upload; nothing was sent
    Unchanged,
}

/// One save: build the current state and send it somewhere
pub trait Saver: Send + Sync + 'static {
    /// Perform a save; runs on a blocking thread
    fn save(&self) -> Result<SaveOutcome>;
}

/// Saves a profile through the transfer protocol
///
/// Every save passes the same live verification gate as a manual store, so
/// a half-written or broken local state never replaces a good remote
/// profile. Remembers the fingerprint of the last successful upload and
/// skips the upload when the current state fingerprints the same. A failed
/// upload leaves the remembered fingerprint untouched.
#[derive(Debug)]
pub struct ProfileSaver {
    profile: ProfileName,
    layout: SourceLayout,
    verifier: ProfileVerifier,
    credentials: Arc<dyn CredentialSource>,
    transfer: Arc<Transfer>,
    uploaded: Mutex<Option<Fingerprint>>,
}

impl ProfileSaver {
    /// Create a saver for `profile` over the sources of `layout`
    pub fn new(
        profile: ProfileName,
        layout: SourceLayout,
        credentials: Arc<dyn CredentialSource>,
        transfer: Arc<Transfer>,
    ) -> Self {
        let verifier =
            ProfileVerifier::new(GateRequirements::for_platform(credentials.is_keychain()));
        Self {
            profile,
            layout,
            verifier,
            credentials,
            transfer,
            uploaded: Mutex::new(None),
        }
    }

    /// Fingerprint of the last successful upload
    pub fn last_uploaded(&self) -> Option<Fingerprint> {
        *self.uploaded.lock()
    }
}

impl Saver for ProfileSaver {
    fn save(&self) -> Result<SaveOutcome> {
        self.verifier
            .verify_live(&self.layout, self.credentials.as_ref())
            .into_result()?;

        let sources = self.layout.sources();
        let credentials = self.credentials.read()?;
        let fingerprint = compute_fingerprint(&sources, credentials.as_ref())?;
        if *self.uploaded.lock() == Some(fingerprint) {
            debug!("Fingerprint {} unchanged; skipping upload", fingerprint.short());
            return Ok(SaveOutcome::Unchanged);
        }

        let blob = archive::build(&sources, credentials.as_ref())?;
        let report = self.transfer.upload(&self.profile, &blob)?;
        *self.uploaded.lock() = Some(fingerprint);
        Ok(SaveOutcome::Uploaded(report))
    }
}

/// Outcome of a watch session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchSummary {
    /// Successful uploads
    pub save_count: u64,
    /// Whether changes were left unsaved
    pub pending: bool,
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn join_save(
    task: &mut Option<JoinHandle<Result<SaveOutcome>>>,
) -> std::result::Result<Result<SaveOutcome>, tokio::task::JoinError> {
    match task {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

struct Driver<S: Saver> {
    cycle: SaveCycle,
    saver: Arc<S>,
    sink: Arc<dyn EventSink>,
    timer: Option<Instant>,
    save_task: Option<JoinHandle<Result<SaveOutcome>>>,
}

impl<S: Saver> Driver<S> {
    fn apply(&mut self, event: SchedulerEvent) {
        let now = Instant::now();
        for command in self.cycle.handle(event, now.into_std()) {
            match command {
                Command::ArmTimer(deadline) => {
                    let deadline = Instant::from_std(deadline);
                    if self.cycle.state() == SaveState::WaitingForThrottle {
                        self.sink.emit(&WatchEvent::Throttled {
                            wait: deadline.saturating_duration_since(now),
                        });
                    }
                    self.timer = Some(deadline);
                }
                Command::CancelTimer => self.timer = None,
                Command::StartSave => {
                    self.sink.emit(&WatchEvent::SaveStarted);
                    let saver = Arc::clone(&self.saver);
                    self.save_task = Some(tokio::task::spawn_blocking(move || saver.save()));
                }
            }
        }
    }

    fn finish_save(
        &mut self,
        result: std::result::Result<Result<SaveOutcome>, tokio::task::JoinError>,
    ) {
        self.save_task = None;
        match result {
            Ok(Ok(SaveOutcome::Uploaded(size))) => {
                self.apply(SchedulerEvent::SaveSucceeded);
                self.sink.emit(&WatchEvent::Saved {
                    save_count: self.cycle.save_count(),
                    size,
                });
            }
            Ok(Ok(SaveOutcome::Unchanged)) => {
                self.sink.emit(&WatchEvent::Unchanged);
                self.apply(SchedulerEvent::SaveSkipped);
            }
            Ok(Err(e)) => {
                self.sink.emit(&WatchEvent::SaveFailed {
                    error: e.to_string(),
                });
                self.apply(SchedulerEvent::SaveFailed);
            }
            Err(e) => {
                warn!("Save task did not complete: {}", e);
                self.sink.emit(&WatchEvent::SaveFailed {
                    error: e.to_string(),
                });
                self.apply(SchedulerEvent::SaveFailed);
            }
        }
    }
}

/// Run the scheduler until `stop` resolves and any in-flight save ends
///
/// `changes` carries one path per change notification. If the channel
/// closes, the session stops as if `stop` had resolved. Save failures are
/// reported to `sink` and never end the session.
pub async fn run_watch<S, F>(
    cycle: SaveCycle,
    saver: Arc<S>,
    mut changes: UnboundedReceiver<PathBuf>,
    stop: F,
    sink: Arc<dyn EventSink>,
) -> Result<WatchSummary>
where
    S: Saver,
    F: Future<Output = ()>,
{
    if cycle.is_stopped() {
        return Err(ProfsyncError::internal("watch started with a stopped scheduler"));
    }

    let mut driver = Driver {
        cycle,
        saver,
        sink,
        timer: None,
        save_task: None,
    };
    let mut stop_seen = false;
    let mut changes_open = true;
    tokio::pin!(stop);

    while !driver.cycle.is_stopped() {
        tokio::select! {
            _ = &mut stop, if !stop_seen => {
                debug!("Stop requested");
                stop_seen = true;
                driver.apply(SchedulerEvent::Stop);
            }
            change = changes.recv(), if changes_open => match change {
                Some(path) => {
                    driver.sink.emit(&WatchEvent::ChangeDetected { path });
                    driver.apply(SchedulerEvent::Change);
                }
                None => {
                    debug!("Change channel closed");
                    changes_open = false;
                    driver.apply(SchedulerEvent::Stop);
                }
            },
            _ = sleep_until(driver.timer) => {
                driver.timer = None;
                driver.apply(SchedulerEvent::TimerFired);
            }
            result = join_save(&mut driver.save_task) => driver.finish_save(result),
        }
    }

    let summary = WatchSummary {
        save_count: driver.cycle.save_count(),
        pending: driver.cycle.is_pending(),
    };
    driver.sink.emit(&WatchEvent::Stopped {
        save_count: summary.save_count,
    });
    Ok(summary)
}
