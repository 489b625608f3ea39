//! In-memory save registry.
//!
//! The registry is always derived from the filesystem:
//! - rebuilt wholesale by a directory scan (startup, `scan` command)
//! - extended one record at a time by successful captures
//! - shrunk by retention culling
//!
//! Records stay sorted oldest first. Ids are handed out in that order and are
//! only meaningful until the next scan.

pub mod codec;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::files;
use crate::host::{Host, HostError};
use codec::NameTemplate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveRecord {
    pub id: u64,
    pub date: DateTime<Utc>,
    pub keep: bool,
    pub path: PathBuf,
    pub name: String,
}

impl SaveRecord {
    pub fn unix_millis(&self) -> i64 {
        self.date.timestamp_millis()
    }

    fn set_path(&mut self, path: PathBuf) {
        self.name = base_name(&path);
        self.path = path;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("could not list saves: {0}")]
    Listing(#[from] HostError),
}

#[derive(Debug, thiserror::Error)]
pub enum KeepError {
    #[error("no save with id {0}")]
    NotFound(u64),
    #[error("save file {} no longer exists", .0.display())]
    FileMissing(PathBuf),
    #[error("{} does not look like a save file", .0.display())]
    NotASave(PathBuf),
    #[error("could not rename {}: {source}", .path.display())]
    Rename { path: PathBuf, source: io::Error },
}

/// One page of a newest-first listing.
#[derive(Debug, Serialize)]
pub struct Page<'a> {
    /// 1-based
    pub number: usize,
    pub total_pages: usize,
    pub total_saves: usize,
    pub saves: Vec<&'a SaveRecord>,
}

pub struct Registry {
    dest_dir: PathBuf,
    template: Arc<NameTemplate>,
    records: Vec<SaveRecord>,
    last_id: u64,
}

pub type SharedRegistry = Arc<Mutex<Registry>>;

/// Lock a shared registry. A panic while holding the lock can't leave the
/// record list half-written, so a poisoned lock is still usable.
pub fn lock(registry: &SharedRegistry) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Registry {
    pub fn new(dest_dir: PathBuf, template: Arc<NameTemplate>) -> Self {
        Registry {
            dest_dir,
            template,
            records: Vec::new(),
            last_id: 0,
        }
    }

    /// Rebuild from the host's save listing. If the listing fails the current
    /// records are left alone.
    pub fn scan(&mut self, host: &dyn Host) -> Result<usize, RegistryError> {
        let listing = host
            .list_existing_saves()?
            .into_iter()
            .map(|path| std::path::absolute(&path).unwrap_or(path));
        self.records = decode_all(&self.dest_dir, &self.template, listing);
        self.last_id = self.records.len() as u64;
        Ok(self.records.len())
    }

    pub fn latest(&self) -> Option<&SaveRecord> {
        self.records.iter().max_by_key(|r| r.unix_millis())
    }

    /// Register a freshly written save, keeping date order. Equal timestamps go
    /// after existing ones so ids keep increasing along the list.
    pub fn append(&mut self, date: DateTime<Utc>, keep: bool, path: PathBuf) -> &SaveRecord {
        self.last_id += 1;
        let record = SaveRecord {
            id: self.last_id,
            date,
            keep,
            name: base_name(&path),
            path,
        };

        let millis = record.unix_millis();
        let index = self.records.partition_point(|r| r.unix_millis() <= millis);
        self.records.insert(index, record);
        &self.records[index]
    }

    pub fn get(&self, id: u64) -> Option<&SaveRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn remove(&mut self, id: u64) -> Option<SaveRecord> {
        let index = self.records.iter().position(|r| r.id == id)?;
        Some(self.records.remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SaveRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn page(&self, requested: usize, page_size: usize) -> Page<'_> {
        let page_size = page_size.max(1);
        let total_pages = self.records.len().div_ceil(page_size);
        let number = requested.clamp(1, total_pages.max(1));
        let saves = self
            .records
            .iter()
            .rev()
            .skip((number - 1) * page_size)
            .take(page_size)
            .collect();

        Page {
            number,
            total_pages,
            total_saves: self.records.len(),
            saves,
        }
    }

    /// Flip a save's keep flag by renaming its file.
    pub fn toggle_keep(&mut self, id: u64) -> Result<&SaveRecord, KeepError> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(KeepError::NotFound(id))?;

        if !files::exists(&record.path) {
            return Err(KeepError::FileMissing(record.path.clone()));
        }

        let new_name = codec::toggled_name(&record.name, record.keep)
            .ok_or_else(|| KeepError::NotASave(record.path.clone()))?;
        let new_path = record.path.with_file_name(new_name);

        files::rename(&record.path, &new_path).map_err(|source| KeepError::Rename {
            path: record.path.clone(),
            source,
        })?;

        record.keep = !record.keep;
        record.set_path(new_path);
        Ok(record)
    }
}

/// Turn a raw listing into sorted records with ids 1..N. Paths outside
/// `dest_dir` and names the template doesn't recognise are skipped.
pub fn decode_all(
    dest_dir: &Path,
    template: &NameTemplate,
    paths: impl IntoIterator<Item = PathBuf>,
) -> Vec<SaveRecord> {
    let mut records: Vec<SaveRecord> = paths
        .into_iter()
        .filter(|p| p.starts_with(dest_dir) && p != dest_dir)
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?.to_string();
            let decoded = template.decode(&name)?;
            Some(SaveRecord {
                id: 0,
                date: decoded.date,
                keep: decoded.keep,
                path,
                name,
            })
        })
        .collect();

    records.sort_by_key(|r| r.unix_millis());
    for (i, record) in records.iter_mut().enumerate() {
        record.id = i as u64 + 1;
    }
    records
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
