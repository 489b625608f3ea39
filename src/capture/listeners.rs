//! Other plugins that want to hear about new autosaves.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::json;
use tracing::{info, warn};

use crate::host::{Host, HostError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    Connected,
    Saved { path: PathBuf },
    Disconnected,
}

impl ListenerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ListenerEvent::Connected => "connected",
            ListenerEvent::Saved { .. } => "save",
            ListenerEvent::Disconnected => "disconnected",
        }
    }

    pub fn args(&self) -> serde_json::Value {
        match self {
            ListenerEvent::Connected => json!([1]),
            ListenerEvent::Saved { path } => json!([path.to_string_lossy()]),
            ListenerEvent::Disconnected => json!([]),
        }
    }
}

pub trait Listener: Send + Sync {
    fn deliver(&self, event: &ListenerEvent) -> Result<(), HostError>;
}

/// A plugin reached through the host's plugin messaging.
pub struct HostListener {
    plugin: String,
    host: Arc<dyn Host>,
}

impl HostListener {
    pub fn new(plugin: impl Into<String>, host: Arc<dyn Host>) -> Self {
        HostListener {
            plugin: plugin.into(),
            host,
        }
    }
}

impl Listener for HostListener {
    fn deliver(&self, event: &ListenerEvent) -> Result<(), HostError> {
        self.host.emit_plugin(&self.plugin, event.name(), event.args())
    }
}

/// Connected listeners in registration order.
#[derive(Default)]
pub struct ListenerSet {
    entries: Mutex<Vec<(String, Arc<dyn Listener>)>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` under `name`. Reconnecting replaces the old handle
    /// but keeps its place in the delivery order.
    pub fn connect(&self, name: &str, listener: Arc<dyn Listener>) {
        {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            match entries.iter_mut().find(|(n, _)| n == name) {
                Some(entry) => entry.1 = listener.clone(),
                None => entries.push((name.to_string(), listener.clone())),
            }
        }

        info!(plugin = name, "listener connected");
        deliver_one(name, listener.as_ref(), &ListenerEvent::Connected);
    }

    pub fn disconnect(&self, name: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(index) = entries.iter().position(|(n, _)| n == name) else {
            return false;
        };
        entries.remove(index);
        info!(plugin = name, "listener disconnected");
        true
    }

    pub fn names(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Best-effort delivery to everyone. A failing listener is logged and
    /// skipped; the return value is how many deliveries succeeded.
    pub fn emit_all(&self, event: &ListenerEvent) -> usize {
        // snapshot so a listener can't deadlock us by reconnecting mid-delivery
        let snapshot: Vec<(String, Arc<dyn Listener>)> = {
            let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.clone()
        };

        snapshot
            .iter()
            .filter(|(name, listener)| deliver_one(name, listener.as_ref(), event))
            .count()
    }

    /// Tell everyone we're going away and forget them.
    pub fn close(&self) {
        self.emit_all(&ListenerEvent::Disconnected);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn deliver_one(name: &str, listener: &dyn Listener, event: &ListenerEvent) -> bool {
    match listener.deliver(event) {
        Ok(()) => true,
        Err(e) => {
            warn!(plugin = name, event = event.name(), error = %e, "listener delivery failed");
            false
        }
    }
}
