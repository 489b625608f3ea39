//! One autosaver instance bound to one host.
//!
//! Routes host events (heartbeats, server start, chat commands, plugin
//! connections) to the registry, the capture protocol, retention and the
//! scheduler.

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::capture::listeners::{HostListener, ListenerSet};
use crate::capture::watch::TempWatcher;
use crate::capture::{CaptureError, CaptureOutcome, CaptureProtocol, CaptureSettings};
use crate::commands::{self, Caller, ChatCommand, Reply, PAGE_SIZE};
use crate::config::{Config, SavePaths};
use crate::files;
use crate::host::{Heartbeat, Host, HostError};
use crate::report::{self, plural, thousands};
use crate::retention::{self, CullReport};
use crate::scheduler::{ScheduleSettings, Scheduler, TickDecision};
use crate::store::codec::{NameTemplate, TemplateError};
use crate::store::{self, KeepError, Registry, RegistryError, SaveRecord, SharedRegistry};

const ANNOUNCE_DELAY: Duration = Duration::from_millis(250);
/// Oldest save format whose header carries per-owner brick counts.
const OWNER_COUNTS_VERSION: u16 = 8;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("could not create autosave folder {}: {source}", .path.display())]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("could not resolve save root {}: {source}", .path.display())]
    Resolve { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Template(#[from] TemplateError),
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("no save with id {0}")]
    NotFound(u64),
    #[error("could not stage save for loading: {0}")]
    Copy(#[from] io::Error),
    #[error(transparent)]
    Host(#[from] HostError),
}

/// What an autosave tick did.
#[derive(Debug)]
pub struct TickReport {
    pub bricks: u64,
    pub elapsed: Duration,
    pub cull: Option<CullReport>,
}

/// Keeps the temp file watcher alive. Dropping it stops watching.
pub struct WatchGuard {
    _watcher: TempWatcher,
    driver: JoinHandle<()>,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

pub struct Autosaver {
    config: Config,
    paths: SavePaths,
    host: Arc<dyn Host>,
    registry: SharedRegistry,
    listeners: Arc<ListenerSet>,
    capture: Arc<CaptureProtocol>,
    scheduler: Mutex<Scheduler>,
}

impl Autosaver {
    pub fn new(config: Config, host: Arc<dyn Host>) -> Result<Self, ServiceError> {
        let paths = config.paths();

        debug!(path = %paths.dest_dir.display(), "creating autosave folder");
        files::ensure_dir(&paths.dest_dir).map_err(|source| ServiceError::CreateDir {
            path: paths.dest_dir.clone(),
            source,
        })?;
        let paths = paths.canonicalize().map_err(|source| ServiceError::Resolve {
            path: paths.root.clone(),
            source,
        })?;

        let template = Arc::new(NameTemplate::new(&config.filename_format)?);
        let mut registry = Registry::new(paths.dest_dir.clone(), template.clone());
        match registry.scan(host.as_ref()) {
            Ok(count) => {
                info!(count, "found autosaves");
                if let Some(latest) = registry.latest() {
                    info!(date = %latest.date, name = %latest.name, "latest autosave");
                }
            }
            Err(e) => error!(error = %e, "error scanning autosaves"),
        }
        let registry = Arc::new(Mutex::new(registry));

        let listeners = Arc::new(ListenerSet::new());
        let capture = Arc::new(CaptureProtocol::new(
            CaptureSettings {
                temp_file: paths.temp_file.clone(),
                dest_dir: paths.dest_dir.clone(),
                autokeep_interval: config.autokeep_interval,
                deadline: config.capture_timeout,
            },
            template,
            host.clone(),
            registry.clone(),
            listeners.clone(),
        ));

        let scheduler = Mutex::new(Scheduler::new(ScheduleSettings {
            save_interval: config.save_interval,
            check_brick_count: config.check_brick_count,
        }));

        Ok(Autosaver {
            config,
            paths,
            host,
            registry,
            listeners,
            capture,
            scheduler,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn paths(&self) -> &SavePaths {
        &self.paths
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn capture(&self) -> &Arc<CaptureProtocol> {
        &self.capture
    }

    pub fn listeners(&self) -> &Arc<ListenerSet> {
        &self.listeners
    }

    /// Start watching the temp file. Must be called from inside a tokio runtime.
    pub fn start_watching(&self) -> notify::Result<WatchGuard> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = TempWatcher::spawn(self.paths.temp_file.clone(), tx)?;
        let driver = tokio::spawn(self.capture.clone().drive(rx));
        Ok(WatchGuard {
            _watcher: watcher,
            driver,
        })
    }

    pub fn rescan(&self) -> Result<usize, RegistryError> {
        let count = store::lock(&self.registry).scan(self.host.as_ref())?;
        info!(count, "rescanned autosaves");
        Ok(count)
    }

    pub fn cull(&self, floor: usize) -> CullReport {
        retention::cull(&mut store::lock(&self.registry), floor)
    }

    pub fn toggle_keep(&self, id: u64) -> Result<SaveRecord, KeepError> {
        let mut registry = store::lock(&self.registry);
        let record = registry.toggle_keep(id)?.clone();
        info!(name = %record.name, keep = record.keep, "toggled keep");
        Ok(record)
    }

    /// Stage a save at the temp load path and ask the host to load it.
    pub async fn load(&self, id: u64) -> Result<SaveRecord, LoadError> {
        let save = store::lock(&self.registry)
            .get(id)
            .cloned()
            .ok_or(LoadError::NotFound(id))?;
        self.load_record(&save).await?;
        Ok(save)
    }

    async fn load_record(&self, save: &SaveRecord) -> Result<(), LoadError> {
        info!(name = %save.name, "copying save to temp load file");
        files::copy_file(&save.path, &self.paths.temp_load_file).await?;

        let relative = self
            .paths
            .temp_load_file
            .strip_prefix(&self.paths.root)
            .unwrap_or(&self.paths.temp_load_file);
        self.host.trigger_load(relative)?;
        Ok(())
    }

    pub async fn on_start(&self) {
        if !self.config.load_on_start {
            return;
        }

        let latest = store::lock(&self.registry).latest().cloned();
        match latest {
            Some(save) => {
                info!(name = %save.name, "loading latest autosave");
                if let Err(e) = self.load_record(&save).await {
                    error!(error = %e, "failed to load latest autosave");
                }
            }
            None => info!("no autosave to load"),
        }
    }

    pub async fn on_heartbeat(&self, heartbeat: Heartbeat) -> Option<TickReport> {
        if !self.config.enabled {
            return None;
        }

        let decision = {
            let latest = store::lock(&self.registry).latest().cloned();
            self.scheduler().evaluate(&heartbeat, latest.as_ref(), Utc::now())
        };
        if let TickDecision::Skip(reason) = decision {
            debug!(?reason, bricks = heartbeat.bricks, "no autosave this tick");
            return None;
        }

        if self.capture.is_pending() {
            debug!("autosave already in progress");
            return None;
        }

        let bricks = plural(heartbeat.bricks, "brick");

        if self.config.announce_save {
            self.host.broadcast(&format!("Saving {bricks}..."));
            tokio::time::sleep(ANNOUNCE_DELAY).await;
        }

        let started = Instant::now();
        match self.capture.request_capture().await {
            Ok(CaptureOutcome::Completed) => {}
            Ok(CaptureOutcome::TimedOut) => {
                error!("autosave failed, the host never produced a save");
                self.announce("Autosave failed.");
                return None;
            }
            Err(CaptureError::Busy) => {
                debug!("autosave already in progress");
                return None;
            }
            Err(e) => {
                error!(error = %e, "autosave failed");
                self.announce("Autosave failed.");
                return None;
            }
        }
        let elapsed = started.elapsed();

        self.scheduler().mark_saved();

        let cull = (self.config.num_saves > 0).then(|| self.cull(self.config.num_saves));
        let removed = cull.as_ref().map(|c| c.evicted as u64).unwrap_or(0);

        let mut summary = format!("Auto-saved {bricks} in {:.2}s.", elapsed.as_secs_f64());
        if removed > 0 {
            summary.push_str(&format!(" Removed {}.", plural(removed, "old save")));
        }
        self.announce(&summary);

        Some(TickReport {
            bricks: heartbeat.bricks,
            elapsed,
            cull,
        })
    }

    /// `connect`/`disconnect` requests from other plugins.
    pub fn plugin_event(&self, event: &str, from: &str) {
        match event {
            "connect" => {
                let listener = Arc::new(HostListener::new(from, self.host.clone()));
                self.listeners.connect(from, listener);
            }
            "disconnect" => {
                self.listeners.disconnect(from);
            }
            other => debug!(event = other, plugin = from, "ignoring plugin event"),
        }
    }

    pub fn stop(&self) {
        self.listeners.close();
    }

    pub async fn handle_command(&self, caller: &Caller, args: &[String]) -> Vec<Reply> {
        if !self.authorized(caller) {
            debug!(caller = %caller.name, "ignoring command from unauthorized player");
            return Vec::new();
        }

        match ChatCommand::parse(args) {
            ChatCommand::Help => vec![
                Reply::Whisper(format!("autosaver version {}", env!("CARGO_PKG_VERSION"))),
                Reply::Whisper(format!("Usage: /{} <command>", commands::COMMAND_NAME)),
                Reply::Whisper("Commands: save, list, scan, keep, load, count".to_string()),
            ],
            ChatCommand::Save => match self.capture.request_capture().await {
                Ok(CaptureOutcome::Completed) => vec![Reply::Broadcast("Saved.".to_string())],
                Ok(CaptureOutcome::TimedOut) => {
                    vec![Reply::Whisper("Save failed: the server never wrote the save.".to_string())]
                }
                Err(e) => vec![Reply::Whisper(format!("Save failed: {e}."))],
            },
            ChatCommand::List { page } => {
                let registry = store::lock(&self.registry);
                report::table::render_page(&registry.page(page, PAGE_SIZE), Utc::now())
                    .into_iter()
                    .map(Reply::Whisper)
                    .collect()
            }
            ChatCommand::Scan => match self.rescan() {
                Ok(count) => vec![Reply::Whisper(format!("Found {count} saves."))],
                Err(e) => {
                    error!(error = %e, "rescan failed");
                    vec![Reply::Whisper(format!("Scan failed: {e}"))]
                }
            },
            ChatCommand::Keep { id } => self.keep_command(id),
            ChatCommand::Load { id } => self.load_command(id).await,
            ChatCommand::Count { target } => self.count_command(&target).await,
            ChatCommand::Unknown(command) => vec![Reply::Whisper(format!(
                "Unknown command {command}. Run /{} for help.",
                commands::COMMAND_NAME
            ))],
        }
    }

    /// Send command replies through the host.
    pub fn deliver(&self, caller: &Caller, replies: &[Reply]) {
        for reply in replies {
            match reply {
                Reply::Whisper(text) => self.host.whisper(&caller.name, text),
                Reply::Broadcast(text) => self.host.broadcast(text),
            }
        }
    }

    fn keep_command(&self, id: Option<u64>) -> Vec<Reply> {
        let Some(id) = id else {
            return vec![invalid_id()];
        };

        match self.toggle_keep(id) {
            Ok(save) => {
                let state = if save.keep { "Enabled" } else { "Disabled" };
                vec![Reply::Whisper(format!("{state} keep on {}", save.name))]
            }
            Err(KeepError::NotFound(_)) => vec![invalid_id()],
            Err(KeepError::FileMissing(_)) => vec![Reply::Whisper(format!(
                "Save file does not exist. Run /{} scan to update saves.",
                commands::COMMAND_NAME
            ))],
            Err(e) => {
                warn!(error = %e, "error setting keep");
                vec![Reply::Whisper(format!("Error setting keep: {e}"))]
            }
        }
    }

    async fn load_command(&self, id: Option<u64>) -> Vec<Reply> {
        let Some(id) = id else {
            return vec![invalid_id()];
        };

        match self.load(id).await {
            Ok(save) => vec![Reply::Whisper(format!("Loading {}", save.name))],
            Err(LoadError::NotFound(_)) => vec![invalid_id()],
            Err(e) => {
                error!(error = %e, "error loading save");
                vec![Reply::Whisper(format!("Load failed: {e}"))]
            }
        }
    }

    async fn count_command(&self, target: &str) -> Vec<Reply> {
        let latest = store::lock(&self.registry).latest().cloned();
        let Some(save) = latest else {
            return vec![Reply::Whisper(format!(
                "No autosaves yet. Run /{} save to create one.",
                commands::COMMAND_NAME
            ))];
        };

        let relative = save.path.strip_prefix(&self.paths.root).unwrap_or(&save.path);
        let data = match self.host.read_save_data(relative).await {
            Ok(data) => data,
            Err(e) => {
                error!(path = %relative.display(), error = %e, "error reading save");
                return vec![Reply::Whisper(format!("Could not read the latest autosave: {e}"))];
            }
        };

        if target.is_empty() || data.format_version < OWNER_COUNTS_VERSION {
            return vec![Reply::Whisper(format!(
                "Latest autosave contains {} bricks from {} owners.",
                thousands(data.brick_count),
                thousands(data.owners.len() as u64)
            ))];
        }

        match commands::find_owner(&data.owners, target) {
            Some(owner) => vec![Reply::Whisper(format!(
                "Player {} placed {} bricks in the last autosave.",
                owner.name,
                thousands(owner.bricks)
            ))],
            None => vec![Reply::Whisper("Could not find any player by that name.".to_string())],
        }
    }

    fn authorized(&self, caller: &Caller) -> bool {
        !self.config.only_authorized
            || caller.is_host
            || self.config.authorized_users.iter().any(|id| *id == caller.id)
    }

    fn announce(&self, message: &str) {
        if self.config.broadcast {
            self.host.broadcast(message);
        }
    }

    fn scheduler(&self) -> MutexGuard<'_, Scheduler> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn invalid_id() -> Reply {
    Reply::Whisper(format!(
        "Invalid id. Run /{} list for a list of save ids.",
        commands::COMMAND_NAME
    ))
}
