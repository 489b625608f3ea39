//! Filesystem primitives used by capture, keep and retention.
//!
//! Moves try a plain rename first and fall back to copy + delete when the
//! temp artifact and the destination live on different devices.

use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

pub const SAVE_EXTENSION: &str = "brs";

/// Create a directory and all of its parents. Succeeds if it already exists.
pub fn ensure_dir(path: &Path) -> io::Result<()> {
    std::fs::create_dir_all(path)
}

pub fn exists(path: &Path) -> bool {
    path.exists()
}

/// Remove a file, treating "already gone" as success.
/// Returns whether a file was actually removed.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

pub async fn copy_file(from: &Path, to: &Path) -> io::Result<()> {
    tokio::fs::copy(from, to).await.map(|_| ())
}

pub async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            copy_file(from, to).await?;
            tokio::fs::remove_file(from).await
        }
        Err(e) => Err(e),
    }
}

/// Blocking rename with the same cross-device fallback as [`move_file`].
pub fn rename(from: &Path, to: &Path) -> io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
        Err(e) => Err(e),
    }
}

/// Every save file under `root`, the same set the host itself would report.
pub fn list_saves(root: &Path) -> io::Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("save root {} is not a directory", root.display()),
        ));
    }

    let saves = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(SAVE_EXTENSION))
        })
        .map(|e| e.into_path())
        .collect();

    Ok(saves)
}
