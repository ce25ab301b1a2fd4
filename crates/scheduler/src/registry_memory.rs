//! In-memory daemon registry and component container.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::resolver::{Component, ComponentContainer, Daemon, DaemonRegistry};

/// Daemon registry backed by a `HashMap`. Entries can be swapped at runtime;
/// the next fire picks up the replacement.
#[derive(Default)]
pub struct InMemoryDaemonRegistry {
    daemons: Mutex<HashMap<String, Arc<dyn Daemon>>>,
}

impl InMemoryDaemonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry_id: impl Into<String>, daemon: Arc<dyn Daemon>) {
        let mut daemons = self.daemons.lock().unwrap_or_else(|e| e.into_inner());
        daemons.insert(entry_id.into(), daemon);
    }

    pub fn remove(&self, entry_id: &str) -> Option<Arc<dyn Daemon>> {
        let mut daemons = self.daemons.lock().unwrap_or_else(|e| e.into_inner());
        daemons.remove(entry_id)
    }

    pub fn entry_ids(&self) -> Vec<String> {
        let daemons = self.daemons.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<_> = daemons.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl DaemonRegistry for InMemoryDaemonRegistry {
    fn daemon(&self, entry_id: &str) -> Option<Arc<dyn Daemon>> {
        let daemons = self.daemons.lock().unwrap_or_else(|e| e.into_inner());
        daemons.get(entry_id).cloned()
    }
}

/// Component container backed by a `HashMap` of shared instances.
#[derive(Default)]
pub struct InMemoryContainer {
    components: Mutex<HashMap<String, Component>>,
}

impl InMemoryContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, type_name: impl Into<String>, component: Component) {
        let mut components = self.components.lock().unwrap_or_else(|e| e.into_inner());
        components.insert(type_name.into(), component);
    }
}

impl ComponentContainer for InMemoryContainer {
    fn lookup(&self, type_name: &str) -> Option<Component> {
        let components = self.components.lock().unwrap_or_else(|e| e.into_inner());
        components.get(type_name).cloned()
    }
}
