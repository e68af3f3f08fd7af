//! Persistent store - the single versioned document behind the bridge
//!
//! Holds:
//! - Profiles (canonical copy; the host options only mirror them)
//! - Per-device settings (brightness, keep-awake, orientation)
//! - Purge markers by device id and GUID
//! - Profile metadata (content hash + timestamp, observability only)

pub mod settings;

pub use settings::{DeviceSettings, Orientation};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

use crate::entry::DeviceRecord;
use crate::error::{BridgeError, Result};

pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_KEY: &str = "mqttdash.store";
const STORE_FILE: &str = "mqttdash.store.json";

/// Profile name -> opaque UI document
pub type Profiles = BTreeMap<String, Value>;

/// Content hash and update time for the profiles map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilesMeta {
    pub hash: String,
    pub updated_at: i64,
}

/// The persisted document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default)]
    pub profiles: Profiles,
    #[serde(default)]
    pub device_settings: BTreeMap<String, DeviceSettings>,
    #[serde(default)]
    pub purged_devices: BTreeSet<String>,
    #[serde(default)]
    pub purged_guids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles_meta: Option<ProfilesMeta>,
}

impl StoreDocument {
    /// Decode the `data` section, falling back to defaults per key so one
    /// malformed section does not discard the rest.
    fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };

        let profiles = obj
            .get("profiles")
            .and_then(|v| v.as_object())
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        let device_settings = obj
            .get("device_settings")
            .and_then(|v| v.as_object())
            .map(|m| {
                m.iter()
                    .map(|(k, v)| (k.clone(), DeviceSettings::from_value(v)))
                    .collect()
            })
            .unwrap_or_default();

        let string_set = |key: &str| -> BTreeSet<String> {
            obj.get(key)
                .and_then(|v| v.as_array())
                .map(|a| {
                    a.iter()
                        .filter_map(|v| v.as_str())
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default()
        };

        Self {
            profiles,
            device_settings,
            purged_devices: string_set("purged_devices"),
            purged_guids: string_set("purged_guids"),
            profiles_meta: obj
                .get("profiles_meta")
                .and_then(|v| serde_json::from_value(v.clone()).ok()),
        }
    }
}

/// On-disk wrapper around the document
#[derive(Serialize)]
struct Envelope<'a> {
    version: u32,
    key: &'a str,
    data: &'a StoreDocument,
}

/// Compute SHA256 over the compact, key-sorted profiles JSON
pub fn compute_profiles_hash(profiles: &Profiles) -> String {
    let canonical = serde_json::to_string(profiles).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Profile keys not referenced by any device's `profile` or `device_id`.
/// `"default"` is never reported.
pub fn unused_profile_keys(profiles: &Profiles, devices: &[DeviceRecord]) -> Vec<String> {
    let mut used: BTreeSet<&str> = BTreeSet::new();
    for d in devices {
        let profile = d.profile.trim();
        let device_id = d.device_id.trim();
        if !profile.is_empty() {
            used.insert(profile);
        }
        if !device_id.is_empty() {
            used.insert(device_id);
        }
    }
    profiles
        .keys()
        .filter(|k| k.as_str() != "default" && !used.contains(k.as_str()))
        .cloned()
        .collect()
}

/// Persistent store, owned by the bridge task
pub struct Store {
    path: PathBuf,
    doc: StoreDocument,
    loaded: bool,
    /// Memory is ahead of disk; reloads must not read the stale file
    save_failed: bool,
}

impl Store {
    /// Create an empty store bound to `data_dir` without touching disk
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(STORE_FILE),
            doc: StoreDocument::default(),
            loaded: false,
            save_failed: false,
        }
    }

    /// Create and load from disk
    pub fn open(data_dir: &Path) -> Self {
        let mut store = Self::new(data_dir);
        store.load();
        store
    }

    pub fn document(&self) -> &StoreDocument {
        &self.doc
    }

    pub fn profiles(&self) -> &Profiles {
        &self.doc.profiles
    }

    /// (Re)load the document from disk, refresh metadata, and save.
    ///
    /// On first load a missing or unreadable file leaves an empty document.
    /// On a reload the in-memory copy wins whenever disk cannot be trusted:
    /// after a failed save it is written out again instead of re-read, and a
    /// read error keeps it untouched without saving.
    pub fn load(&mut self) {
        if self.loaded && self.save_failed {
            debug!("store: last save failed, retrying save instead of reload");
            self.commit("retry");
            return;
        }
        match Self::read_document(&self.path) {
            Ok(Some(doc)) => self.doc = doc,
            Ok(None) if !self.loaded => self.doc = StoreDocument::default(),
            Ok(None) => debug!("store: file missing on reload, keeping memory"),
            Err(e) if !self.loaded => {
                error!("store load failed: {}", e);
                self.doc = StoreDocument::default();
            }
            Err(e) => {
                error!("store reload failed, keeping in-memory document: {}", e);
                return;
            }
        }
        self.loaded = true;
        self.refresh_meta();
        if self.commit("init") {
            debug!("store: confirmed profiles on init ({})", self.doc.profiles.len());
        }
    }

    fn read_document(path: &Path) -> Result<Option<StoreDocument>> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BridgeError::store_io(path, e)),
        };
        let envelope: Value = serde_json::from_str(&content)?;
        let data = envelope.get("data").unwrap_or(&envelope);
        Ok(Some(StoreDocument::from_value(data)))
    }

    /// Durable save (temp file + rename)
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| BridgeError::store_io(parent, e))?;
        }
        let envelope = Envelope {
            version: STORAGE_VERSION,
            key: STORAGE_KEY,
            data: &self.doc,
        };
        let json = serde_json::to_string_pretty(&envelope)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| BridgeError::store_io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| BridgeError::store_io(&self.path, e))?;
        Ok(())
    }

    /// Save and log on failure. In-memory state stays the working copy.
    fn commit(&mut self, what: &str) -> bool {
        match self.save() {
            Ok(()) => {
                self.save_failed = false;
                true
            }
            Err(e) => {
                error!("store save failed ({}): {}", what, e);
                self.save_failed = true;
                false
            }
        }
    }

    fn refresh_meta(&mut self) {
        self.doc.profiles_meta = Some(ProfilesMeta {
            hash: compute_profiles_hash(&self.doc.profiles),
            updated_at: Utc::now().timestamp(),
        });
    }

    /// Replace the profiles document. Returns the saved copy.
    pub fn persist_profiles(&mut self, profiles: Profiles) -> Profiles {
        self.doc.profiles = profiles;
        self.refresh_meta();
        if self.commit("profiles") {
            debug!("store: saved profiles ({})", self.doc.profiles.len());
        }
        self.doc.profiles.clone()
    }

    /// Drop profiles no device references (except `"default"`). Returns the remainder.
    pub fn prune_unused_profiles(&mut self, profiles: Profiles, devices: &[DeviceRecord]) -> Profiles {
        let mut profiles = profiles;
        if profiles.is_empty() {
            return profiles;
        }
        let remove = unused_profile_keys(&profiles, devices);
        for key in &remove {
            profiles.remove(key);
        }
        self.doc.profiles = profiles;
        self.refresh_meta();
        self.commit("prune");
        debug!(
            "pruned unused profiles: removed={:?} remaining={}",
            remove,
            self.doc.profiles.len()
        );
        self.doc.profiles.clone()
    }

    pub fn get_device_settings(&self, device_id: &str) -> DeviceSettings {
        self.doc
            .device_settings
            .get(device_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Merge `patch` into the stored settings. Returns the merged result.
    pub fn update_device_settings(&mut self, device_id: &str, patch: &DeviceSettings) -> DeviceSettings {
        let cur = self
            .doc
            .device_settings
            .entry(device_id.to_string())
            .or_default();
        cur.merge(patch);
        let merged = cur.clone();
        self.commit("device_settings");
        merged
    }

    pub fn remove_device_settings(&mut self, device_id: &str) -> bool {
        if self.doc.device_settings.remove(device_id).is_some() {
            self.commit("device_settings remove");
            true
        } else {
            false
        }
    }

    pub fn is_purged_device(&self, device_id: Option<&str>, guid: Option<&str>) -> bool {
        let by_id = device_id
            .filter(|id| !id.is_empty())
            .is_some_and(|id| self.doc.purged_devices.contains(id));
        let by_guid = guid
            .filter(|g| !g.is_empty())
            .is_some_and(|g| self.doc.purged_guids.contains(g));
        by_id || by_guid
    }

    pub fn add_purged(&mut self, device_id: Option<&str>, guid: Option<&str>) {
        let mut changed = false;
        if let Some(id) = device_id.filter(|id| !id.is_empty()) {
            changed |= self.doc.purged_devices.insert(id.to_string());
        }
        if let Some(g) = guid.filter(|g| !g.is_empty()) {
            changed |= self.doc.purged_guids.insert(g.to_string());
        }
        if changed {
            self.commit("purged add");
        }
    }

    pub fn remove_purged(&mut self, device_id: Option<&str>, guid: Option<&str>) {
        let mut changed = false;
        if let Some(id) = device_id {
            changed |= self.doc.purged_devices.remove(id);
        }
        if let Some(g) = guid {
            changed |= self.doc.purged_guids.remove(g);
        }
        if changed {
            self.commit("purged remove");
        }
    }
}
