//! Decides, on each host heartbeat, whether it's time for an autosave.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::host::Heartbeat;
use crate::store::SaveRecord;

#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub save_interval: Duration,
    pub check_brick_count: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoBricks,
    RecentSave,
    ServerTooYoung,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    Capture,
    Skip(SkipReason),
}

pub struct Scheduler {
    settings: ScheduleSettings,
    last_bricks: Option<u64>,
    last_components: Option<u64>,
    count_changed: bool,
}

impl Scheduler {
    pub fn new(settings: ScheduleSettings) -> Self {
        Scheduler {
            settings,
            last_bricks: None,
            last_components: None,
            // nothing has been saved by this process yet
            count_changed: true,
        }
    }

    pub fn count_changed(&self) -> bool {
        self.count_changed
    }

    pub fn evaluate(
        &mut self,
        heartbeat: &Heartbeat,
        latest: Option<&SaveRecord>,
        now: DateTime<Utc>,
    ) -> TickDecision {
        if self.last_bricks != Some(heartbeat.bricks)
            || self.last_components != Some(heartbeat.components)
        {
            self.count_changed = true;
            self.last_bricks = Some(heartbeat.bricks);
            self.last_components = Some(heartbeat.components);
        }

        if heartbeat.bricks == 0 {
            return TickDecision::Skip(SkipReason::NoBricks);
        }

        let interval_ms = i64::try_from(self.settings.save_interval.as_millis()).unwrap_or(i64::MAX);
        let save_old_enough = latest
            .map(|s| s.unix_millis().saturating_add(interval_ms) < now.timestamp_millis())
            .unwrap_or(true);
        if !save_old_enough {
            return TickDecision::Skip(SkipReason::RecentSave);
        }

        let server_old_enough = Duration::from_secs(heartbeat.elapsed_secs) > self.settings.save_interval;
        if !server_old_enough {
            return TickDecision::Skip(SkipReason::ServerTooYoung);
        }

        if self.settings.check_brick_count && !self.count_changed {
            return TickDecision::Skip(SkipReason::Unchanged);
        }

        TickDecision::Capture
    }

    /// Call after a successful capture. Failed captures leave the flag set so
    /// the next tick tries again.
    pub fn mark_saved(&mut self) {
        self.count_changed = false;
    }
}
