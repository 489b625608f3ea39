use std::path::{Path, PathBuf};

use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

/// What happened to the temp artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempEvent {
    /// created or rewritten by the host
    Written,
    /// gone, whether the host or our own move took it
    Removed,
}

/// Watches the directory holding the temp artifact and forwards events that
/// concern the artifact itself.
pub struct TempWatcher {
    _watcher: RecommendedWatcher,
}

impl TempWatcher {
    pub fn spawn(temp_file: PathBuf, tx: UnboundedSender<TempEvent>) -> notify::Result<Self> {
        // the file itself usually doesn't exist yet, so watch its parent
        let dir = temp_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if let Some(kind) = classify(&event, &temp_file) {
                        let _ = tx.send(kind);
                    }
                }
                Err(e) => warn!(error = %e, "temp file watcher error"),
            },
            notify::Config::default(),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        Ok(TempWatcher { _watcher: watcher })
    }
}

pub fn classify(event: &Event, temp_file: &Path) -> Option<TempEvent> {
    let is_temp = |p: &PathBuf| p == temp_file;

    match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // paths are [from, to]
            match event.paths.as_slice() {
                [from, _] if is_temp(from) => Some(TempEvent::Removed),
                [_, to] if is_temp(to) => Some(TempEvent::Written),
                _ => None,
            }
        }
        _ if !event.paths.iter().any(is_temp) => None,
        EventKind::Create(_) => Some(TempEvent::Written),
        EventKind::Remove(_) => Some(TempEvent::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(TempEvent::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(TempEvent::Written),
        EventKind::Modify(ModifyKind::Name(_)) => {
            if temp_file.exists() {
                Some(TempEvent::Written)
            } else {
                Some(TempEvent::Removed)
            }
        }
        EventKind::Modify(_) => Some(TempEvent::Written),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => Some(TempEvent::Written),
        _ => None,
    }
}
