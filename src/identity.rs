//! Identity resolution for device hello announcements
//!
//! A device is matched, in order, by:
//! 1. purge marker (reject)
//! 2. stable GUID (rename if the label changed)
//! 3. previous-id hint (rename, capture GUID)
//! 4. unseen label (register)
//!
//! Whatever the path, the roster never holds two records with the same
//! non-empty `device_id`.

use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

use crate::entry::DeviceRecord;
use crate::error::{BridgeError, Result};
use crate::store::{Profiles, Store};

/// Purge-marker lookup used by the resolver
pub trait PurgeList {
    fn is_purged(&self, device_id: Option<&str>, guid: Option<&str>) -> bool;
}

impl PurgeList for Store {
    fn is_purged(&self, device_id: Option<&str>, guid: Option<&str>) -> bool {
        self.is_purged_device(device_id, guid)
    }
}

#[derive(Debug, Deserialize)]
struct HelloPayload {
    #[serde(default)]
    guid: Option<String>,
    #[serde(default)]
    prev_id: Option<String>,
    #[serde(default)]
    screen: Option<Value>,
}

/// Parsed hello announcement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hello {
    pub device_id: String,
    pub guid: Option<String>,
    pub prev_id: Option<String>,
    pub screen: Option<Value>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl Hello {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Default::default()
        }
    }

    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        self.guid = Some(guid.into());
        self
    }

    pub fn with_prev_id(mut self, prev_id: impl Into<String>) -> Self {
        self.prev_id = Some(prev_id.into());
        self
    }

    /// Parse a hello payload for `device_id` (taken from the topic).
    ///
    /// An empty payload is a retained-message clear and yields `Ok(None)`.
    pub fn parse(topic: &str, device_id: &str, payload: &str) -> Result<Option<Self>> {
        if payload.trim().is_empty() {
            return Ok(None);
        }
        let parsed: HelloPayload = serde_json::from_str(payload)
            .map_err(|e| BridgeError::malformed(topic, e.to_string()))?;
        Ok(Some(Self {
            device_id: device_id.to_string(),
            guid: non_empty(parsed.guid),
            prev_id: non_empty(parsed.prev_id),
            screen: parsed.screen.filter(Value::is_object),
        }))
    }
}

/// What the resolver decided
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelloAction {
    Reject,
    Renamed { old_id: String },
    Registered,
    Known,
}

/// Resolver result plus the follow-up work it implies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloOutcome {
    pub action: HelloAction,
    /// Roster records were mutated and must be saved
    pub roster_changed: bool,
    /// Stored screen metadata changed (config must be republished)
    pub screen_changed: bool,
}

impl HelloOutcome {
    fn new(action: HelloAction, roster_changed: bool) -> Self {
        Self {
            action,
            roster_changed,
            screen_changed: false,
        }
    }
}

fn record_score(d: &DeviceRecord) -> u8 {
    u8::from(d.guid().is_some()) + u8::from(d.has_profile())
}

/// Unique by `device_id`, keeping the first position. A later duplicate
/// replaces the earlier one when it scores at least as well (GUID first,
/// then a non-empty profile). Records with a blank id are dropped.
pub fn dedupe_devices(devices: Vec<DeviceRecord>) -> Vec<DeviceRecord> {
    let mut out: Vec<DeviceRecord> = Vec::with_capacity(devices.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for d in devices {
        let id = d.device_id.trim().to_string();
        if id.is_empty() {
            continue;
        }
        match index.get(&id) {
            Some(&i) => {
                if record_score(&d) >= record_score(&out[i]) {
                    out[i] = d;
                }
            }
            None => {
                index.insert(id, out.len());
                out.push(d);
            }
        }
    }
    out
}

/// Point an unassigned record at a profile keyed by its own id, if one exists.
pub fn relink_profiles(devices: &mut [DeviceRecord], profiles: &Profiles) {
    for rec in devices.iter_mut() {
        let id = rec.device_id.trim();
        if !id.is_empty() && !rec.has_profile() && profiles.contains_key(id) {
            debug!("save_devices: preserving existing profile for {}", id);
            rec.profile = id.to_string();
        }
    }
}

/// In-memory device roster
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    devices: Vec<DeviceRecord>,
}

impl Roster {
    pub fn new(devices: Vec<DeviceRecord>) -> Self {
        Self {
            devices: dedupe_devices(devices),
        }
    }

    pub fn devices(&self) -> &[DeviceRecord] {
        &self.devices
    }

    pub fn into_devices(self) -> Vec<DeviceRecord> {
        self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceRecord> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }

    pub fn ids(&self) -> BTreeSet<String> {
        self.devices.iter().map(|d| d.device_id.clone()).collect()
    }

    fn position_by_id(&self, device_id: &str) -> Option<usize> {
        self.devices.iter().position(|d| d.device_id == device_id)
    }

    fn position_by_guid(&self, guid: &str) -> Option<usize> {
        self.devices.iter().position(|d| d.guid() == Some(guid))
    }

    /// Move record `idx` to `new_id`, dropping any other record already
    /// holding that id. Returns the record's new index.
    fn retarget(&mut self, idx: usize, new_id: &str) -> usize {
        self.devices[idx].device_id = new_id.to_string();
        let mut kept = 0usize;
        let mut new_idx = idx;
        let mut i = 0usize;
        self.devices.retain(|d| {
            let keep = i == idx || d.device_id != new_id;
            if i == idx {
                new_idx = kept;
            }
            if keep {
                kept += 1;
            } else {
                debug!("dropping colliding record for {}", new_id);
            }
            i += 1;
            keep
        });
        new_idx
    }

    fn update_screen(&mut self, idx: usize, screen: &Option<Value>) -> bool {
        match screen {
            Some(s) if self.devices[idx].screen.as_ref() != Some(s) => {
                self.devices[idx].screen = Some(s.clone());
                true
            }
            _ => false,
        }
    }

    /// Resolve a hello against the roster, mutating it in place.
    pub fn resolve_hello(&mut self, hello: &Hello, purged: &impl PurgeList) -> HelloOutcome {
        let device_id = hello.device_id.as_str();
        let guid = hello.guid.as_deref().filter(|g| !g.is_empty());
        let prev_id = hello.prev_id.as_deref().filter(|p| !p.is_empty());

        if purged.is_purged(Some(device_id), guid) {
            info!(
                "device_hello: ignoring purged device hello (device_id={} guid={})",
                device_id,
                guid.unwrap_or("")
            );
            return HelloOutcome::new(HelloAction::Reject, false);
        }

        // GUID is authoritative
        if let Some(idx) = guid.and_then(|g| self.position_by_guid(g)) {
            let old_id = self.devices[idx].device_id.clone();
            if old_id != device_id {
                let idx = self.retarget(idx, device_id);
                self.update_screen(idx, &hello.screen);
                info!("device_hello: GUID rename {} -> {}", old_id, device_id);
                return HelloOutcome::new(HelloAction::Renamed { old_id }, true);
            }
            let screen_changed = self.update_screen(idx, &hello.screen);
            return HelloOutcome {
                action: HelloAction::Known,
                roster_changed: screen_changed,
                screen_changed,
            };
        }

        // Previous-id hint
        if let Some(prev) = prev_id.filter(|p| *p != device_id) {
            if let Some(idx) = self.position_by_id(prev) {
                let idx = self.retarget(idx, device_id);
                if let Some(g) = guid {
                    if self.devices[idx].guid().is_none() {
                        self.devices[idx].guid = Some(g.to_string());
                    }
                }
                self.update_screen(idx, &hello.screen);
                info!("device_hello: prev_id rename {} -> {}", prev, device_id);
                return HelloOutcome::new(
                    HelloAction::Renamed {
                        old_id: prev.to_string(),
                    },
                    true,
                );
            }
        }

        match self.position_by_id(device_id) {
            None => {
                self.devices.push(DeviceRecord {
                    device_id: device_id.to_string(),
                    guid: guid.map(String::from),
                    profile: String::new(),
                    screen: hello.screen.clone(),
                });
                info!("device_hello: registered new device {}", device_id);
                HelloOutcome::new(HelloAction::Registered, true)
            }
            Some(idx) => {
                let mut changed = false;
                if let Some(g) = guid {
                    match self.devices[idx].guid() {
                        None => {
                            self.devices[idx].guid = Some(g.to_string());
                            changed = true;
                        }
                        Some(existing) if existing != g => {
                            warn!(
                                "device_hello: {} claimed by guid {} but recorded with {}; keeping record",
                                device_id, g, existing
                            );
                        }
                        Some(_) => {}
                    }
                }
                let screen_changed = self.update_screen(idx, &hello.screen);
                HelloOutcome {
                    action: HelloAction::Known,
                    roster_changed: changed || screen_changed,
                    screen_changed,
                }
            }
        }
    }

    /// Operator rename. A device-keyed profile follows the id.
    /// Returns false if `old_id` was unknown (a blank record is created).
    pub fn rename(&mut self, old_id: &str, new_id: &str) -> bool {
        match self.position_by_id(old_id) {
            Some(idx) => {
                let idx = self.retarget(idx, new_id);
                if self.devices[idx].profile == old_id {
                    self.devices[idx].profile = new_id.to_string();
                }
                true
            }
            None => {
                self.devices.retain(|d| d.device_id != new_id);
                self.devices.push(DeviceRecord::new(new_id));
                false
            }
        }
    }

    pub fn remove(&mut self, device_id: &str) -> Option<DeviceRecord> {
        let idx = self.position_by_id(device_id)?;
        Some(self.devices.remove(idx))
    }

    /// Add a blank record if `device_id` is unknown. Returns true if added.
    pub fn ensure(&mut self, device_id: &str, guid: Option<&str>) -> bool {
        if device_id.is_empty() || self.position_by_id(device_id).is_some() {
            return false;
        }
        self.devices.push(DeviceRecord {
            device_id: device_id.to_string(),
            guid: guid.filter(|g| !g.is_empty()).map(String::from),
            ..Default::default()
        });
        true
    }

    /// Drop records with neither a profile nor a GUID. Returns their ids.
    pub fn prune_unassigned(&mut self) -> Vec<String> {
        let mut removed = Vec::new();
        self.devices.retain(|d| {
            let keep = d.has_profile() || d.guid().is_some();
            if !keep {
                removed.push(d.device_id.clone());
            }
            keep
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    #[derive(Default)]
    struct Markers {
        ids: BTreeSet<String>,
        guids: BTreeSet<String>,
    }

    impl PurgeList for Markers {
        fn is_purged(&self, device_id: Option<&str>, guid: Option<&str>) -> bool {
            device_id.is_some_and(|d| self.ids.contains(d))
                || guid.is_some_and(|g| self.guids.contains(g))
        }
    }

    fn assert_unique_ids(roster: &Roster) {
        let ids: Vec<&str> = roster.devices().iter().map(|d| d.device_id.as_str()).collect();
        let unique: BTreeSet<&str> = ids.iter().copied().collect();
        assert_eq!(ids.len(), unique.len(), "duplicate ids in {:?}", ids);
    }

    #[test]
    fn test_register_new_device() {
        let mut roster = Roster::default();
        let out = roster.resolve_hello(&Hello::new("d1").with_guid("g1"), &Markers::default());
        assert_eq!(out.action, HelloAction::Registered);
        assert!(out.roster_changed);
        let rec = roster.get("d1").unwrap();
        assert_eq!(rec.guid(), Some("g1"));
        assert_eq!(rec.profile, "");
    }

    #[test]
    fn test_guid_rename_moves_record() {
        let mut roster = Roster::default();
        let purged = Markers::default();
        roster.resolve_hello(&Hello::new("d1").with_guid("g1"), &purged);
        let out = roster.resolve_hello(&Hello::new("d2").with_guid("g1"), &purged);
        assert_eq!(
            out.action,
            HelloAction::Renamed {
                old_id: "d1".into()
            }
        );
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.get("d2").unwrap().guid(), Some("g1"));
        assert!(roster.get("d1").is_none());
    }

    #[test]
    fn test_guid_rename_drops_collision() {
        let mut roster = Roster::new(vec![
            DeviceRecord {
                device_id: "old".into(),
                guid: Some("g1".into()),
                profile: "p".into(),
                screen: None,
            },
            DeviceRecord::new("taken"),
        ]);
        let out = roster.resolve_hello(&Hello::new("taken").with_guid("g1"), &Markers::default());
        assert!(matches!(out.action, HelloAction::Renamed { .. }));
        assert_eq!(roster.len(), 1);
        let rec = roster.get("taken").unwrap();
        assert_eq!(rec.guid(), Some("g1"));
        assert_eq!(rec.profile, "p");
    }

    #[test]
    fn test_prev_id_rename_captures_guid() {
        let mut roster = Roster::new(vec![DeviceRecord::new("legacy")]);
        let out = roster.resolve_hello(
            &Hello::new("kitchen").with_prev_id("legacy").with_guid("g9"),
            &Markers::default(),
        );
        assert_eq!(
            out.action,
            HelloAction::Renamed {
                old_id: "legacy".into()
            }
        );
        assert_eq!(roster.get("kitchen").unwrap().guid(), Some("g9"));
    }

    #[test]
    fn test_prev_id_equal_to_id_is_known() {
        let mut roster = Roster::new(vec![DeviceRecord::new("d1")]);
        let out = roster.resolve_hello(&Hello::new("d1").with_prev_id("d1"), &Markers::default());
        assert_eq!(out.action, HelloAction::Known);
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_guid_beats_prev_id() {
        let mut roster = Roster::new(vec![
            DeviceRecord {
                device_id: "a".into(),
                guid: Some("g1".into()),
                ..Default::default()
            },
            DeviceRecord::new("b"),
        ]);
        let out = roster.resolve_hello(
            &Hello::new("c").with_guid("g1").with_prev_id("b"),
            &Markers::default(),
        );
        assert_eq!(out.action, HelloAction::Renamed { old_id: "a".into() });
        assert!(roster.get("b").is_some());
        assert_eq!(roster.get("c").unwrap().guid(), Some("g1"));
    }

    #[test]
    fn test_purged_hello_rejected_without_mutation() {
        let mut roster = Roster::default();
        let mut purged = Markers::default();
        purged.guids.insert("g1".into());
        let out = roster.resolve_hello(&Hello::new("d1").with_guid("g1"), &purged);
        assert_eq!(out.action, HelloAction::Reject);
        assert!(!out.roster_changed);
        assert!(roster.is_empty());
    }

    #[test]
    fn test_known_captures_missing_guid_and_screen() {
        let mut roster = Roster::new(vec![DeviceRecord::new("d1")]);
        let mut hello = Hello::new("d1").with_guid("g1");
        hello.screen = Some(json!({"w": 800, "h": 480}));
        let out = roster.resolve_hello(&hello, &Markers::default());
        assert_eq!(out.action, HelloAction::Known);
        assert!(out.roster_changed);
        assert!(out.screen_changed);
        let rec = roster.get("d1").unwrap();
        assert_eq!(rec.guid(), Some("g1"));
        assert_eq!(rec.screen, Some(json!({"w": 800, "h": 480})));

        let again = roster.resolve_hello(&hello, &Markers::default());
        assert!(!again.roster_changed);
    }

    #[test]
    fn test_hello_sequences_keep_ids_unique() {
        let mut roster = Roster::default();
        let purged = Markers::default();
        let sequence = [
            Hello::new("a").with_guid("g1"),
            Hello::new("b").with_guid("g2"),
            Hello::new("b").with_guid("g1"),
            Hello::new("c").with_prev_id("b"),
            Hello::new("a").with_guid("g2"),
            Hello::new("a").with_prev_id("c"),
            Hello::new("d"),
            Hello::new("d").with_guid("g1"),
        ];
        for hello in &sequence {
            roster.resolve_hello(hello, &purged);
            assert_unique_ids(&roster);
        }
    }

    #[test]
    fn test_parse_hello_payloads() {
        let topic = "mqttdash/dev/d1/hello";
        assert_eq!(Hello::parse(topic, "d1", "").unwrap(), None);

        let hello = Hello::parse(topic, "d1", r#"{"guid":" g1 ","prev_id":"","screen":[1]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(hello.guid.as_deref(), Some("g1"));
        assert_eq!(hello.prev_id, None);
        assert_eq!(hello.screen, None);

        assert!(Hello::parse(topic, "d1", "not json").is_err());
        assert!(Hello::parse(topic, "d1", r#"{"guid": 5}"#).is_err());
    }

    #[test]
    fn test_dedupe_prefers_guid_then_profile() {
        let devices = vec![
            DeviceRecord {
                device_id: "d1".into(),
                profile: "p".into(),
                ..Default::default()
            },
            DeviceRecord::new("d2"),
            DeviceRecord {
                device_id: "d1".into(),
                guid: Some("g".into()),
                ..Default::default()
            },
            DeviceRecord::new("d1"),
        ];
        let out = dedupe_devices(devices);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].device_id, "d1");
        assert_eq!(out[0].guid(), Some("g"));
        assert_eq!(out[1].device_id, "d2");
    }

    #[test]
    fn test_relink_profiles() {
        let mut devices = vec![DeviceRecord::new("d1"), DeviceRecord::new("d2")];
        let mut profiles = Profiles::new();
        profiles.insert("d1".into(), json!({}));
        relink_profiles(&mut devices, &profiles);
        assert_eq!(devices[0].profile, "d1");
        assert_eq!(devices[1].profile, "");
    }

    #[test]
    fn test_admin_rename_profile_follows_device_key() {
        let mut roster = Roster::new(vec![
            DeviceRecord {
                device_id: "old".into(),
                profile: "old".into(),
                ..Default::default()
            },
            DeviceRecord::new("new"),
        ]);
        assert!(roster.rename("old", "new"));
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.get("new").unwrap().profile, "new");
    }

    #[test]
    fn test_prune_unassigned() {
        let mut roster = Roster::new(vec![
            DeviceRecord::new("bare"),
            DeviceRecord {
                device_id: "with_guid".into(),
                guid: Some("g".into()),
                ..Default::default()
            },
            DeviceRecord {
                device_id: "with_profile".into(),
                profile: "p".into(),
                ..Default::default()
            },
        ]);
        assert_eq!(roster.prune_unassigned(), vec!["bare".to_string()]);
        assert_eq!(roster.len(), 2);
    }
}
