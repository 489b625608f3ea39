use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use autosaver::capture::listeners::{Listener, ListenerEvent};
use autosaver::capture::watch::TempEvent;
use autosaver::capture::{CaptureOutcome, TEMP_SAVE_FILENAME};
use autosaver::commands::Caller;
use autosaver::config::Config;
use autosaver::files;
use autosaver::host::{Heartbeat, Host, HostError, SaveSummary};
use autosaver::service::Autosaver;
use autosaver::store;

/// Stands in for the game server: writes the temp save when asked to.
struct FakeServer {
    root: PathBuf,
    writes: bool,
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl Host for FakeServer {
    fn trigger_capture(&self, temp_name: &str) -> Result<(), HostError> {
        if self.writes {
            std::fs::write(self.root.join(temp_name), b"bricks")?;
        }
        Ok(())
    }
    fn trigger_load(&self, _: &Path) -> Result<(), HostError> {
        Ok(())
    }
    fn list_existing_saves(&self) -> Result<Vec<PathBuf>, HostError> {
        Ok(files::list_saves(&self.root)?)
    }
    async fn read_save_data(&self, _: &Path) -> Result<SaveSummary, HostError> {
        Err(HostError::Unsupported("reading save data"))
    }
    fn broadcast(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
    fn whisper(&self, _: &str, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
    fn emit_plugin(&self, _: &str, _: &str, _: serde_json::Value) -> Result<(), HostError> {
        Ok(())
    }
}

fn start(dir: &TempDir, writes: bool, tweak: impl FnOnce(&mut Config)) -> (Arc<FakeServer>, Arc<Autosaver>) {
    start_at(dir.path(), writes, tweak)
}

fn start_at(root: &Path, writes: bool, tweak: impl FnOnce(&mut Config)) -> (Arc<FakeServer>, Arc<Autosaver>) {
    let mut config = Config {
        save_root: root.to_path_buf(),
        ..Config::default()
    };
    tweak(&mut config);

    let server = Arc::new(FakeServer {
        root: root.to_path_buf(),
        writes,
        messages: Mutex::new(Vec::new()),
    });
    let autosaver = Arc::new(Autosaver::new(config, server.clone()).unwrap());
    (server, autosaver)
}

/// Feed the capture the events a filesystem watcher would produce.
async fn play_watcher(autosaver: Arc<Autosaver>) {
    let capture = autosaver.capture().clone();
    while !capture.is_pending() {
        tokio::task::yield_now().await;
    }
    capture.handle_event(TempEvent::Written).await;
    if !autosaver.paths().temp_file.exists() {
        capture.handle_event(TempEvent::Removed).await;
    }
}

fn beat(bricks: u64) -> Heartbeat {
    Heartbeat {
        elapsed_secs: 24 * 3600,
        bricks,
        components: 0,
    }
}

#[tokio::test]
async fn capture_register_and_cull_cycle() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("autosave");
    std::fs::create_dir_all(&dest).unwrap();
    for name in [
        "autosave_20230101000000.brs",
        "autosave_20230102000000_keep.brs",
        "autosave_20230103000000.brs",
        "autosave_20230104000000.brs",
    ] {
        std::fs::write(dest.join(name), b"old").unwrap();
    }

    let (server, autosaver) = start(&dir, true, |c| c.num_saves = 2);
    assert_eq!(store::lock(autosaver.registry()).len(), 4);

    let watcher = tokio::spawn(play_watcher(autosaver.clone()));
    let report = autosaver.on_heartbeat(beat(2_000)).await.unwrap();
    watcher.await.unwrap();

    // three non-keep saves plus the new one, floor of two
    assert_eq!(report.cull.as_ref().unwrap().evicted, 2);
    assert!(!dest.join("autosave_20230101000000.brs").exists());
    assert!(!dest.join("autosave_20230103000000.brs").exists());
    assert!(dest.join("autosave_20230102000000_keep.brs").exists());
    assert!(dest.join("autosave_20230104000000.brs").exists());
    assert!(!dir.path().join(TEMP_SAVE_FILENAME).exists());

    {
        let registry = store::lock(autosaver.registry());
        assert_eq!(registry.len(), 3);
        let ids: Vec<u64> = registry.iter().map(|r| r.id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(registry.latest().unwrap().id, 5);
    }

    let messages = server.messages.lock().unwrap().clone();
    assert!(messages[0].starts_with("Auto-saved 2,000 bricks"));
    assert!(messages[0].ends_with("Removed 2 old saves."));

    // same brick count and a fresh save, nothing to do
    assert!(autosaver.on_heartbeat(beat(2_000)).await.is_none());
}

#[tokio::test]
async fn rescan_agrees_with_live_registry() {
    let dir = TempDir::new().unwrap();
    let (_server, autosaver) = start(&dir, true, |_| {});

    let watcher = tokio::spawn(play_watcher(autosaver.clone()));
    assert_eq!(
        autosaver.capture().request_capture().await.unwrap(),
        CaptureOutcome::Completed
    );
    watcher.await.unwrap();

    let live: Vec<String> = store::lock(autosaver.registry()).iter().map(|r| r.name.clone()).collect();
    autosaver.rescan().unwrap();
    let scanned: Vec<String> = store::lock(autosaver.registry()).iter().map(|r| r.name.clone()).collect();

    assert_eq!(live, scanned);
}

#[tokio::test]
async fn silent_server_times_out_and_is_announced() {
    let dir = TempDir::new().unwrap();
    let (server, autosaver) = start(&dir, false, |c| c.capture_timeout = Duration::from_millis(50));

    assert!(autosaver.on_heartbeat(beat(10)).await.is_none());

    assert_eq!(*server.messages.lock().unwrap(), vec!["Autosave failed.".to_string()]);
    assert!(store::lock(autosaver.registry()).is_empty());
    assert!(!autosaver.capture().is_pending());
}

#[tokio::test]
async fn keep_protects_from_cull() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("autosave");
    std::fs::create_dir_all(&dest).unwrap();
    for name in ["autosave_20230101000000.brs", "autosave_20230102000000.brs"] {
        std::fs::write(dest.join(name), b"old").unwrap();
    }
    let (_server, autosaver) = start(&dir, false, |_| {});

    let caller = Caller::console();
    autosaver.handle_command(&caller, &["keep".to_string(), "1".to_string()]).await;
    let report = autosaver.cull(1);

    assert_eq!(report.evicted, 0);
    assert!(dest.join("autosave_20230101000000_keep.brs").exists());
    assert!(dest.join("autosave_20230102000000.brs").exists());

    let report = autosaver.cull(0);
    assert_eq!(report.evicted, 1);
    assert!(dest.join("autosave_20230101000000_keep.brs").exists());
}

/// Remembers what a connected plugin was told.
struct Backup(Mutex<Vec<ListenerEvent>>);

impl Listener for Backup {
    fn deliver(&self, event: &ListenerEvent) -> Result<(), HostError> {
        self.0.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// One capture with the real filesystem watcher doing the work.
async fn capture_through_watcher(root: &Path) {
    let (_server, autosaver) = start_at(root, true, |c| c.capture_timeout = Duration::from_secs(5));
    let backup = Arc::new(Backup(Mutex::new(Vec::new())));
    autosaver.listeners().connect("backup", backup.clone());

    let _watching = autosaver.start_watching().unwrap();
    let outcome = autosaver.capture().request_capture().await.unwrap();

    assert_eq!(outcome, CaptureOutcome::Completed);
    assert!(!root.join(TEMP_SAVE_FILENAME).exists());

    let saved = {
        let registry = store::lock(autosaver.registry());
        assert_eq!(registry.len(), 1);
        registry.latest().unwrap().path.clone()
    };
    assert!(saved.is_absolute());
    assert!(saved.exists());
    assert_eq!(
        *backup.0.lock().unwrap(),
        vec![ListenerEvent::Connected, ListenerEvent::Saved { path: saved }]
    );
}

#[tokio::test]
async fn watcher_completes_capture_under_absolute_root() {
    let dir = TempDir::new().unwrap();
    capture_through_watcher(dir.path()).await;
}

#[tokio::test]
async fn watcher_completes_capture_under_relative_root() {
    let dir = tempfile::Builder::new()
        .prefix(".autosaver-relative")
        .tempdir_in(".")
        .unwrap();
    assert!(dir.path().is_relative());

    capture_through_watcher(dir.path()).await;
}
