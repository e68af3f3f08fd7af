//! State mirror
//!
//! Republishes tracked hub entities under `<streambase>/<domain>/<object>/...`
//! as retained messages. Only changed values are sent; attribute keys that
//! disappear are tombstoned with an empty retained payload.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::hub::{EntityState, STATE_UNAVAILABLE, STATE_UNKNOWN};
use crate::topics;

/// A retained publish produced by the mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorPublish {
    pub topic: String,
    pub payload: String,
}

impl MirrorPublish {
    fn new(topic: String, payload: impl Into<String>) -> Self {
        Self {
            topic,
            payload: payload.into(),
        }
    }
}

/// Unknown/unavailable collapse to empty
pub fn normalize_state(state: &str) -> &str {
    if state == STATE_UNKNOWN || state == STATE_UNAVAILABLE {
        ""
    } else {
        state
    }
}

/// Strings verbatim, everything else as compact JSON
pub fn stringify_attribute(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn stringify_attributes(state: &EntityState) -> BTreeMap<String, String> {
    state
        .attributes
        .iter()
        .map(|(k, v)| (k.clone(), stringify_attribute(v)))
        .collect()
}

#[derive(Debug, Default)]
pub struct StateMirror {
    tracked: BTreeSet<String>,
    last_state: HashMap<String, String>,
    last_attrs: HashMap<String, BTreeMap<String, String>>,
}

impl StateMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracked(&self) -> &BTreeSet<String> {
        &self.tracked
    }

    pub fn is_tracked(&self, entity_id: &str) -> bool {
        self.tracked.contains(&entity_id.to_ascii_lowercase())
    }

    /// Replace the tracked set. Entities dropped from it get their state and
    /// every attribute published so far cleared.
    pub fn set_tracked<I, S>(&mut self, entities: I) -> Vec<MirrorPublish>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let wanted: BTreeSet<String> = entities
            .into_iter()
            .map(|e| e.as_ref().trim().to_ascii_lowercase())
            .filter(|e| topics::split_entity_id(e).is_some())
            .collect();
        let removed: Vec<String> = self.tracked.difference(&wanted).cloned().collect();
        self.tracked = wanted;

        let mut out = Vec::new();
        for entity_id in removed {
            out.extend(self.tombstone(&entity_id));
        }
        debug!("mirror tracking {} entities", self.tracked.len());
        out
    }

    fn tombstone(&mut self, entity_id: &str) -> Vec<MirrorPublish> {
        let Some((domain, object_id)) = topics::split_entity_id(entity_id) else {
            return Vec::new();
        };
        let mut out = vec![MirrorPublish::new(topics::entity_state(domain, object_id), "")];
        self.last_state.remove(entity_id);
        for key in self.last_attrs.remove(entity_id).unwrap_or_default().into_keys() {
            out.push(MirrorPublish::new(
                topics::entity_attribute(domain, object_id, &key),
                "",
            ));
        }
        out
    }

    /// Publishes for a state change of a tracked entity
    pub fn on_state_changed(&mut self, state: &EntityState) -> Vec<MirrorPublish> {
        let entity_id = state.entity_id.to_ascii_lowercase();
        if !self.tracked.contains(&entity_id) {
            return Vec::new();
        }
        let Some((domain, object_id)) = topics::split_entity_id(&entity_id) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        let value = normalize_state(&state.state);
        if self.last_state.get(&entity_id).map(String::as_str) != Some(value) {
            out.push(MirrorPublish::new(topics::entity_state(domain, object_id), value));
            self.last_state.insert(entity_id.clone(), value.to_string());
        }

        let current = stringify_attributes(state);
        let previous = self.last_attrs.remove(&entity_id).unwrap_or_default();
        for (key, value) in &current {
            if previous.get(key) != Some(value) {
                out.push(MirrorPublish::new(
                    topics::entity_attribute(domain, object_id, key),
                    value.clone(),
                ));
            }
        }
        for key in previous.keys().filter(|k| !current.contains_key(*k)) {
            out.push(MirrorPublish::new(
                topics::entity_attribute(domain, object_id, key),
                "",
            ));
        }
        self.last_attrs.insert(entity_id, current);
        out
    }

    /// Unconditionally publish every tracked entity found in `states` and
    /// reset the dedupe cache to what was published.
    pub fn snapshot(&mut self, states: &BTreeMap<String, EntityState>) -> Vec<MirrorPublish> {
        let mut out = Vec::new();
        for entity_id in &self.tracked {
            let Some(state) = states.get(entity_id) else {
                continue;
            };
            let Some((domain, object_id)) = topics::split_entity_id(entity_id) else {
                continue;
            };
            let value = normalize_state(&state.state);
            out.push(MirrorPublish::new(topics::entity_state(domain, object_id), value));
            self.last_state.insert(entity_id.clone(), value.to_string());

            let attrs = stringify_attributes(state);
            for (key, value) in &attrs {
                out.push(MirrorPublish::new(
                    topics::entity_attribute(domain, object_id, key),
                    value.clone(),
                ));
            }
            self.last_attrs.insert(entity_id.clone(), attrs);
        }
        out
    }
}
