//! Host device registry
//!
//! Each dashboard device appears in the host as a registry device keyed by
//! its `device_id` identifier, with the adapter entities attached to it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryDevice {
    pub identifier: String,
    pub name: String,
    pub entities: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Migration {
    /// Identifier and name moved to the new id
    Migrated,
    /// A populated device already holds the new id; only the name changed
    NameOnly,
    /// Nothing registered under the old id
    Skipped,
}

pub trait DeviceRegistry: Send + Sync {
    fn get(&self, identifier: &str) -> Option<RegistryDevice>;

    /// Add a device if missing. Returns true if added.
    fn register(&self, identifier: &str, name: &str) -> bool;

    fn attach_entity(&self, identifier: &str, entity_id: &str) -> bool;

    /// Move `old` to `new`. An empty device already using `new` is removed
    /// first; a populated one blocks the move.
    fn migrate_identifier(&self, old: &str, new: &str) -> Migration;

    /// Remove the device and its entities
    fn remove(&self, identifier: &str) -> Option<RegistryDevice>;

    fn identifiers(&self) -> Vec<String>;
}

pub type SharedRegistry = Arc<dyn DeviceRegistry>;

#[derive(Clone, Default)]
pub struct InMemoryRegistry {
    devices: Arc<Mutex<BTreeMap<String, RegistryDevice>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, RegistryDevice>> {
        match self.devices.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl DeviceRegistry for InMemoryRegistry {
    fn get(&self, identifier: &str) -> Option<RegistryDevice> {
        self.lock().get(identifier).cloned()
    }

    fn register(&self, identifier: &str, name: &str) -> bool {
        let mut devices = self.lock();
        if devices.contains_key(identifier) {
            return false;
        }
        devices.insert(
            identifier.to_string(),
            RegistryDevice {
                identifier: identifier.to_string(),
                name: name.to_string(),
                entities: Vec::new(),
            },
        );
        true
    }

    fn attach_entity(&self, identifier: &str, entity_id: &str) -> bool {
        match self.lock().get_mut(identifier) {
            Some(dev) if !dev.entities.iter().any(|e| e == entity_id) => {
                dev.entities.push(entity_id.to_string());
                true
            }
            _ => false,
        }
    }

    fn migrate_identifier(&self, old: &str, new: &str) -> Migration {
        if old.is_empty() || new.is_empty() || old == new {
            return Migration::Skipped;
        }
        let mut devices = self.lock();
        if !devices.contains_key(old) {
            return Migration::Skipped;
        }
        if let Some(dup) = devices.get(new) {
            if !dup.entities.is_empty() {
                if let Some(target) = devices.get_mut(old) {
                    target.name = new.to_string();
                }
                debug!("registry: {} already populated; renamed {} only", new, old);
                return Migration::NameOnly;
            }
            devices.remove(new);
        }
        // contains_key(old) checked above
        let Some(mut target) = devices.remove(old) else {
            return Migration::Skipped;
        };
        target.identifier = new.to_string();
        target.name = new.to_string();
        devices.insert(new.to_string(), target);
        debug!("registry: migrated {} -> {}", old, new);
        Migration::Migrated
    }

    fn remove(&self, identifier: &str) -> Option<RegistryDevice> {
        self.lock().remove(identifier)
    }

    fn identifiers(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}
