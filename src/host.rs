//! The host game server, seen from the autosaver.
//!
//! Everything the autosaver needs from the outside world goes through the
//! [`Host`] trait: asking the engine to write or load a save, listing the save
//! folder, reading save headers, and talking to players and other plugins.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::files;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("{0} is not supported by this host")]
    Unsupported(&'static str),
    #[error("host i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("host rejected request: {0}")]
    Rpc(String),
    #[error("host did not answer within {0:?}")]
    Timeout(std::time::Duration),
    #[error("host connection closed")]
    Closed,
    #[error("could not decode host payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Periodic status pushed by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// seconds since the server started
    pub elapsed_secs: u64,
    pub bricks: u64,
    pub components: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrickOwner {
    pub id: String,
    pub name: String,
    pub bricks: u64,
}

/// Header information of a save file, as decoded by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveSummary {
    pub format_version: u16,
    pub brick_count: u64,
    #[serde(default)]
    pub owners: Vec<BrickOwner>,
}

#[async_trait]
pub trait Host: Send + Sync {
    /// Ask the engine to write its world to `temp_name` inside the save root.
    fn trigger_capture(&self, temp_name: &str) -> Result<(), HostError>;

    /// Ask the engine to load a save, path relative to the save root.
    fn trigger_load(&self, relative: &Path) -> Result<(), HostError>;

    /// Absolute paths of every save the host knows about.
    fn list_existing_saves(&self) -> Result<Vec<PathBuf>, HostError>;

    async fn read_save_data(&self, relative: &Path) -> Result<SaveSummary, HostError>;

    fn broadcast(&self, message: &str);

    fn whisper(&self, target: &str, message: &str);

    fn emit_plugin(
        &self,
        plugin: &str,
        event: &str,
        args: serde_json::Value,
    ) -> Result<(), HostError>;
}

/// Offline host backed by nothing but the save directory.
///
/// Used by the maintenance subcommands: listing, rescanning, keep toggles and
/// culling work, anything that needs a running engine does not.
pub struct DirectoryHost {
    root: PathBuf,
}

impl DirectoryHost {
    pub fn new(root: PathBuf) -> Self {
        DirectoryHost { root }
    }
}

#[async_trait]
impl Host for DirectoryHost {
    fn trigger_capture(&self, _temp_name: &str) -> Result<(), HostError> {
        Err(HostError::Unsupported("capturing a save"))
    }

    fn trigger_load(&self, _relative: &Path) -> Result<(), HostError> {
        Err(HostError::Unsupported("loading a save"))
    }

    fn list_existing_saves(&self) -> Result<Vec<PathBuf>, HostError> {
        Ok(files::list_saves(&self.root)?)
    }

    async fn read_save_data(&self, _relative: &Path) -> Result<SaveSummary, HostError> {
        Err(HostError::Unsupported("reading save data"))
    }

    fn broadcast(&self, message: &str) {
        println!("{message}");
    }

    fn whisper(&self, _target: &str, message: &str) {
        println!("{message}");
    }

    fn emit_plugin(
        &self,
        _plugin: &str,
        _event: &str,
        _args: serde_json::Value,
    ) -> Result<(), HostError> {
        Err(HostError::Unsupported("plugin events"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_deserializes_from_host_json() {
        let hb: Heartbeat =
            serde_json::from_str(r#"{"elapsed_secs":1200,"bricks":5000,"components":12}"#).unwrap();
        assert_eq!(hb.bricks, 5000);
        assert_eq!(hb.elapsed_secs, 1200);
    }

    #[test]
    fn save_summary_defaults_missing_owners() {
        let summary: SaveSummary =
            serde_json::from_str(r#"{"format_version":7,"brick_count":10}"#).unwrap();
        assert!(summary.owners.is_empty());
    }

    #[tokio::test]
    async fn directory_host_refuses_engine_operations() {
        let host = DirectoryHost::new(PathBuf::from("/nonexistent"));
        assert!(matches!(host.trigger_capture("x.brs"), Err(HostError::Unsupported(_))));
        assert!(matches!(
            host.read_save_data(Path::new("x.brs")).await,
            Err(HostError::Unsupported(_))
        ));
        assert!(host.list_existing_saves().is_err());
    }
}
