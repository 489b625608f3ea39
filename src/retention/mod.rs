//! Retention engine.
//!
//! Culls the oldest non-keep saves until only `floor` of them remain:
//! - keep saves are never inspected and never count toward the floor
//! - a record leaves the registry before its file is deleted
//! - a failed delete is logged and reported, the record stays evicted
//!
//! Also decides when a fresh capture should be protected automatically.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::files;
use crate::store::{Registry, SaveRecord};

#[derive(Debug, Default)]
pub struct CullReport {
    /// records dropped from the registry
    pub evicted: usize,
    /// files actually removed from disk
    pub deleted: usize,
    pub failures: Vec<(PathBuf, String)>,
}

pub fn cull(registry: &mut Registry, floor: usize) -> CullReport {
    let mut report = CullReport::default();

    let doomed = select_for_removal(registry.iter(), floor);
    if doomed.is_empty() {
        return report;
    }

    for id in doomed {
        let Some(save) = registry.remove(id) else { continue };
        report.evicted += 1;

        debug!(name = %save.name, path = %save.path.display(), "culling autosave");
        match files::remove_if_exists(&save.path) {
            Ok(_) => report.deleted += 1,
            Err(e) => {
                warn!(path = %save.path.display(), error = %e, "failed to cull autosave");
                report.failures.push((save.path, e.to_string()));
            }
        }
    }

    info!(
        evicted = report.evicted,
        deleted = report.deleted,
        floor,
        "culled old autosaves"
    );
    report
}

/// Ids of the saves a cull would remove, oldest first.
pub fn select_for_removal<'a>(
    saves: impl Iterator<Item = &'a SaveRecord>,
    floor: usize,
) -> Vec<u64> {
    let candidates: Vec<&SaveRecord> = saves.filter(|s| !s.keep).collect();
    let excess = candidates.len().saturating_sub(floor);
    candidates.iter().take(excess).map(|s| s.id).collect()
}

/// A capture is kept automatically when autokeep is on and the newest keep
/// save is already older than the interval.
pub fn should_autokeep<'a>(
    mut saves: impl Iterator<Item = &'a SaveRecord>,
    interval: Duration,
    now: DateTime<Utc>,
) -> bool {
    if interval.is_zero() {
        return false;
    }

    let interval_ms = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX);
    let now_ms = now.timestamp_millis();
    !saves.any(|s| s.keep && s.unix_millis().saturating_add(interval_ms) > now_ms)
}
