//! Capture handshake.
//!
//! The host can only be told to write its world to a fixed temp file. This
//! module turns that into a durably named save:
//!
//! 1. `request_capture` asks the host to write the temp file and arms a deadline
//! 2. the watcher sees the temp file appear and we move it to its final name
//! 3. the move makes the temp file disappear, which resolves the request
//!
//! If the deadline wins, the request resolves as timed out. Only one request
//! may be outstanding; a second one is rejected with [`CaptureError::Busy`].

pub mod listeners;
pub mod watch;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::files;
use crate::host::{Host, HostError};
use crate::retention;
use crate::store::codec::{truncate_to_seconds, NameTemplate};
use crate::store::{self, SaveRecord, SharedRegistry};
use listeners::{ListenerEvent, ListenerSet};
use watch::TempEvent;

pub const TEMP_SAVE_FILENAME: &str = "autosaver_temp.brs";
pub const TEMP_LOAD_FILENAME: &str = "autosaver_temp_load.brs";
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);
const NAME_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Completed,
    TimedOut,
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("a capture is already in progress")]
    Busy,
    #[error("host refused to write the save: {0}")]
    Host(#[from] HostError),
}

#[derive(Debug, thiserror::Error)]
pub enum RelocateError {
    #[error("could not move {} to {}: {source}", .from.display(), .to.display())]
    Move {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    #[error("no free save name in {}", .dir.display())]
    NameTaken { dir: PathBuf },
}

pub struct CaptureSettings {
    pub temp_file: PathBuf,
    pub dest_dir: PathBuf,
    pub autokeep_interval: Duration,
    pub deadline: Duration,
}

pub struct CaptureProtocol {
    settings: CaptureSettings,
    template: Arc<NameTemplate>,
    host: Arc<dyn Host>,
    registry: SharedRegistry,
    listeners: Arc<ListenerSet>,
    pending: Mutex<Option<oneshot::Sender<()>>>,
}

impl CaptureProtocol {
    pub fn new(
        settings: CaptureSettings,
        template: Arc<NameTemplate>,
        host: Arc<dyn Host>,
        registry: SharedRegistry,
        listeners: Arc<ListenerSet>,
    ) -> Self {
        CaptureProtocol {
            settings,
            template,
            host,
            registry,
            listeners,
            pending: Mutex::new(None),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Ask the host for a save and wait until it has been filed away or the
    /// deadline passes.
    pub async fn request_capture(&self) -> Result<CaptureOutcome, CaptureError> {
        let done = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if pending.is_some() {
                return Err(CaptureError::Busy);
            }
            let (tx, rx) = oneshot::channel();
            *pending = Some(tx);
            rx
        };

        if let Err(e) = self.host.trigger_capture(TEMP_SAVE_FILENAME) {
            self.take_pending();
            return Err(e.into());
        }

        match tokio::time::timeout(self.settings.deadline, done).await {
            Ok(Ok(())) => Ok(CaptureOutcome::Completed),
            // sender dropped without resolving, treat like the deadline
            Ok(Err(_)) => Ok(CaptureOutcome::TimedOut),
            Err(_) => {
                self.take_pending();
                warn!(deadline = ?self.settings.deadline, "capture timed out waiting for the host");
                Ok(CaptureOutcome::TimedOut)
            }
        }
    }

    pub async fn handle_event(&self, event: TempEvent) {
        match event {
            TempEvent::Written => {
                if let Err(e) = self.relocate().await {
                    error!(error = %e, "failed to file away captured save");
                }
            }
            TempEvent::Removed => self.resolve(),
        }
    }

    /// Process watcher events one at a time until the channel closes.
    pub async fn drive(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<TempEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        debug!("temp watcher channel closed");
    }

    /// Move the temp artifact to its final name and register it.
    /// Returns `None` when there was nothing to move.
    pub async fn relocate(&self) -> Result<Option<SaveRecord>, RelocateError> {
        let temp = &self.settings.temp_file;
        if !files::exists(temp) {
            // a duplicate event for a file we already moved
            debug!(path = %temp.display(), "temp save already gone");
            return Ok(None);
        }

        let (now, keep, dest) = self.claim_name().await?;

        files::move_file(temp, &dest)
            .await
            .map_err(|source| RelocateError::Move {
                from: temp.clone(),
                to: dest.clone(),
                source,
            })?;

        let record = store::lock(&self.registry).append(now, keep, dest.clone()).clone();
        info!(name = %record.name, id = record.id, keep, "captured autosave");

        self.listeners.emit_all(&ListenerEvent::Saved { path: dest });
        Ok(Some(record))
    }

    /// Pick a capture time whose filename is free on disk and in the registry.
    /// Names have one-second resolution, so a clash waits for the next second.
    async fn claim_name(&self) -> Result<(DateTime<Utc>, bool, PathBuf), RelocateError> {
        for _ in 0..NAME_ATTEMPTS {
            let now = truncate_to_seconds(Utc::now());
            let (keep, taken) = {
                let registry = store::lock(&self.registry);
                let result = (
                    retention::should_autokeep(registry.iter(), self.settings.autokeep_interval, now),
                    registry.iter().any(|r| r.date == now),
                );
                result
            };
            let dest = self.settings.dest_dir.join(self.template.encode(now, keep));
            if !taken && !files::exists(&dest) {
                return Ok((now, keep, dest));
            }

            debug!(path = %dest.display(), "save name taken, waiting for the next second");
            tokio::time::sleep(until_next_second()).await;
        }

        Err(RelocateError::NameTaken {
            dir: self.settings.dest_dir.clone(),
        })
    }

    fn resolve(&self) {
        match self.take_pending() {
            Some(tx) => {
                if tx.send(()).is_err() {
                    debug!("capture resolved after its caller stopped waiting");
                }
            }
            None => debug!("temp save removed with no capture pending"),
        }
    }

    fn take_pending(&self) -> Option<oneshot::Sender<()>> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

fn until_next_second() -> Duration {
    let millis = Utc::now().timestamp_subsec_millis().min(999);
    Duration::from_millis(u64::from(1000 - millis))
}
