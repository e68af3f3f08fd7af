//! Host configuration record (data + options pair)
//!
//! The record holds the device roster and a display-only mirror of the
//! profiles. Every write is tagged with its [`Origin`] and broadcast, so the
//! bridge can react to operator edits while ignoring its own mirror writes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};
use crate::store::Profiles;

const ENTRY_FILE: &str = "mqttdash.entry.json";

/// A known dashboard device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Human-facing, mutable label
    pub device_id: String,
    /// Stable device-issued identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    /// Assigned profile name (empty = unassigned)
    #[serde(default)]
    pub profile: String,
    /// Last screen metadata reported in hello
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen: Option<Value>,
}

impl DeviceRecord {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Default::default()
        }
    }

    /// GUID if present and non-empty
    pub fn guid(&self) -> Option<&str> {
        self.guid.as_deref().filter(|g| !g.is_empty())
    }

    pub fn has_profile(&self) -> bool {
        !self.profile.trim().is_empty()
    }
}

/// Record data: written once at onboarding
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryData {
    #[serde(default)]
    pub profiles: Profiles,
}

/// Record options: edited by operators and by the bridge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryOptions {
    #[serde(default)]
    pub devices: Vec<DeviceRecord>,
    /// Display-only copy; the persistent store is canonical
    #[serde(default)]
    pub profiles: Profiles,
    #[serde(default)]
    pub mirror_entities: Vec<String>,
    #[serde(default)]
    pub placeholder_on_remove: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    #[serde(default)]
    pub data: EntryData,
    #[serde(default)]
    pub options: EntryOptions,
}

/// Who wrote an options update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The bridge itself (roster saves, profile mirror)
    Internal,
    /// An operator or editor outside the bridge
    External,
}

/// Change notification for the record
#[derive(Debug, Clone)]
pub struct EntryUpdate {
    pub origin: Origin,
    pub options: EntryOptions,
}

/// File-backed configuration record shared between the bridge and editors
#[derive(Clone)]
pub struct EntryStore {
    entry: Arc<RwLock<ConfigEntry>>,
    path: PathBuf,
    updates: broadcast::Sender<EntryUpdate>,
}

impl EntryStore {
    /// Open the record, loading it from disk if present
    pub fn open(data_dir: &Path) -> Self {
        let path = data_dir.join(ENTRY_FILE);
        let entry = Self::load_from_disk(&path);
        let (updates, _) = broadcast::channel(64);
        Self {
            entry: Arc::new(RwLock::new(entry)),
            path,
            updates,
        }
    }

    /// Create a record with the given initial contents (not yet saved)
    pub fn with_entry(data_dir: &Path, entry: ConfigEntry) -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            entry: Arc::new(RwLock::new(entry)),
            path: data_dir.join(ENTRY_FILE),
            updates,
        }
    }

    fn load_from_disk(path: &Path) -> ConfigEntry {
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Config entry {} unreadable, starting empty: {}", path.display(), e);
                    ConfigEntry::default()
                }
            },
            Err(_) => ConfigEntry::default(),
        }
    }

    fn save_to_disk(&self, entry: &ConfigEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| BridgeError::store_io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(entry)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| BridgeError::store_io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| BridgeError::store_io(&self.path, e))?;
        Ok(())
    }

    pub async fn snapshot(&self) -> ConfigEntry {
        self.entry.read().await.clone()
    }

    pub async fn options(&self) -> EntryOptions {
        self.entry.read().await.options.clone()
    }

    /// Replace the options half of the record and notify subscribers.
    ///
    /// The in-memory record is updated even if the save fails.
    pub async fn replace_options(&self, options: EntryOptions, origin: Origin) -> Result<()> {
        let entry = {
            let mut entry = self.entry.write().await;
            entry.options = options.clone();
            entry.clone()
        };
        let saved = self.save_to_disk(&entry);
        debug!(
            "entry: options replaced ({:?}, devices={} profiles={})",
            origin,
            options.devices.len(),
            options.profiles.len()
        );
        if self.updates.send(EntryUpdate { origin, options }).is_err() {
            debug!("entry: no update subscribers");
        }
        saved
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EntryUpdate> {
        self.updates.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replace_options_persists_and_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let store = EntryStore::open(dir.path());
        let mut rx = store.subscribe();

        let options = EntryOptions {
            devices: vec![DeviceRecord::new("d1")],
            ..Default::default()
        };
        store
            .replace_options(options.clone(), Origin::External)
            .await
            .unwrap();

        let update = rx.recv().await.unwrap();
        assert_eq!(update.origin, Origin::External);
        assert_eq!(update.options, options);

        let reopened = EntryStore::open(dir.path());
        assert_eq!(reopened.options().await, options);
    }

    #[test]
    fn test_device_record_guid_ignores_empty() {
        let mut rec = DeviceRecord::new("d1");
        assert_eq!(rec.guid(), None);
        rec.guid = Some(String::new());
        assert_eq!(rec.guid(), None);
        rec.guid = Some("g1".into());
        assert_eq!(rec.guid(), Some("g1"));
    }
}
