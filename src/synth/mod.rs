//! Config synthesis
//!
//! [`build_config`] turns a device record plus the profile roster into the
//! document published on `<cfgbase>/<device_id>/config`. It does no I/O and
//! the same inputs always serialize to the same bytes.

pub mod layout;
pub mod validate;
pub mod widget;

pub use validate::{find_overlaps, validate_layout};
pub use widget::{normalize_widgets, Placement, RenderedWidget, WidgetKind, WidgetSpec};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::entry::DeviceRecord;
use crate::error::Result;
use crate::store::Profiles;
use crate::topics;

pub const CONFIG_VERSION: u32 = 1;

/// Keys that mark an object as a profile body
const BODY_KEYS: &[&str] = &["ui", "widgets", "dashboard", "grid"];
/// Layout keys accepted at the top level and moved under `ui`
const HOISTED_KEYS: &[&str] = &["grid", "rowHeight", "gutter", "padding", "cols", "rows"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiSection {
    /// Layout keys carried through from the profile (`grid`, `gutter`, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    pub widgets: Vec<RenderedWidget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
}

/// Device-facing configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub version: u32,
    pub device_id: String,
    #[serde(default)]
    pub device: Map<String, Value>,
    pub ui: UiSection,
    pub topics: Map<String, Value>,
}

impl ConfigDocument {
    pub fn to_payload(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn is_placeholder(&self) -> bool {
        self.ui.widgets.is_empty() && self.ui.banner.is_some()
    }
}

fn default_topics(device_id: &str) -> Map<String, Value> {
    let mut topics = Map::new();
    fill_default_topics(&mut topics, device_id);
    topics
}

fn fill_default_topics(map: &mut Map<String, Value>, device_id: &str) {
    for (key, topic) in [
        ("settings", topics::settings(device_id)),
        ("hello", topics::hello(device_id)),
        ("status", topics::status(device_id)),
    ] {
        map.entry(key).or_insert(Value::String(topic));
    }
}

/// "Unassigned" document: no widgets, a banner, default topics
pub fn placeholder_config(device_id: &str) -> ConfigDocument {
    ConfigDocument {
        version: CONFIG_VERSION,
        device_id: device_id.to_string(),
        device: Map::new(),
        ui: UiSection {
            extra: Map::new(),
            widgets: Vec::new(),
            banner: Some(format!("unassigned: set profile in HA for {}", device_id)),
        },
        topics: default_topics(device_id),
    }
}

/// Unwrap `{"name": {...body...}}` to the body
pub(crate) fn unwrap_profile(profile: &Value) -> &Value {
    if let Some(obj) = profile.as_object() {
        if obj.len() == 1 {
            if let Some((key, inner)) = obj.iter().next() {
                let looks_like_body = inner
                    .as_object()
                    .is_some_and(|i| BODY_KEYS.iter().any(|k| i.contains_key(*k)));
                if looks_like_body {
                    debug!("build_config: unwrapping single-key profile '{}'", key);
                    return inner;
                }
            }
        }
    }
    profile
}

fn usable(profile: Option<&Value>) -> Option<&Value> {
    profile.filter(|p| p.as_object().is_some_and(|o| !o.is_empty()))
}

/// Pick the profile for a device: own id, assigned name, the lone profile,
/// then `"default"`.
pub fn select_profile<'a>(device: &DeviceRecord, profiles: &'a Profiles) -> Option<&'a Value> {
    usable(profiles.get(&device.device_id))
        .or_else(|| {
            device
                .has_profile()
                .then(|| usable(profiles.get(&device.profile)))
                .flatten()
        })
        .or_else(|| {
            (profiles.len() == 1)
                .then(|| usable(profiles.values().next()))
                .flatten()
        })
        .or_else(|| usable(profiles.get("default")))
}

fn device_bucket(device: &DeviceRecord) -> Map<String, Value> {
    let mut bucket = Map::new();
    if let Some(screen) = device.screen.as_ref().filter(|s| s.is_object()) {
        bucket.insert("screen".to_string(), screen.clone());
    }
    bucket
}

/// Build the configuration document for one device
pub fn build_config(device: &DeviceRecord, profiles: &Profiles) -> ConfigDocument {
    let device_id = device.device_id.as_str();
    let Some(profile) = select_profile(device, profiles) else {
        debug!("build_config: no profile -> unassigned placeholder for {}", device_id);
        let mut doc = placeholder_config(device_id);
        doc.device = device_bucket(device);
        return doc;
    };

    let empty = Map::new();
    let body = unwrap_profile(profile).as_object().unwrap_or(&empty);

    let mut ui: Map<String, Value> = body
        .get("ui")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    for key in HOISTED_KEYS {
        if let Some(v) = body.get(*key) {
            ui.entry(*key).or_insert_with(|| v.clone());
        }
    }

    let mut raw_widgets: Vec<Value> = body
        .get("widgets")
        .and_then(Value::as_array)
        .or_else(|| ui.get("widgets").and_then(Value::as_array))
        .cloned()
        .unwrap_or_default();
    ui.remove("widgets");
    let banner = ui.remove("banner").and_then(|b| b.as_str().map(String::from));

    let dash = body
        .get("dashboard")
        .and_then(Value::as_object)
        .unwrap_or(body);
    if let Some(expanded) = layout::expand(dash, &ui) {
        ui.insert("grid".to_string(), expanded.grid);
        raw_widgets.extend(expanded.widgets);
    }

    let widgets = normalize_widgets(&raw_widgets);
    debug!(
        "build_config: device={} raw_widgets={} normalized_widgets={}",
        device_id,
        raw_widgets.len(),
        widgets.len()
    );

    let mut topics = body
        .get("topics")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    fill_default_topics(&mut topics, device_id);

    ConfigDocument {
        version: CONFIG_VERSION,
        device_id: device_id.to_string(),
        device: device_bucket(device),
        ui: UiSection {
            extra: ui,
            widgets,
            banner,
        },
        topics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profiles(entries: &[(&str, Value)]) -> Profiles {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_light_widget_topics() {
        let device = DeviceRecord {
            device_id: "d1".into(),
            profile: "d1".into(),
            ..Default::default()
        };
        let roster = profiles(&[(
            "d1",
            json!({"widgets": [{"entity_id": "light.kitchen", "x": 0, "y": 0, "w": 2, "h": 1}]}),
        )]);
        let doc = build_config(&device, &roster);
        assert_eq!(doc.ui.widgets.len(), 1);
        let w = &doc.ui.widgets[0];
        assert_eq!(w.kind, "light");
        assert_eq!(w.command_topic.as_deref(), Some("mqttdash/cmd/light.kitchen"));
        assert_eq!(w.state_topic, "mqttdash/statestream/light/kitchen/state");
        assert_eq!(
            w.attr_topic.as_deref(),
            Some("mqttdash/statestream/light/kitchen/attributes/brightness")
        );
        assert_eq!((w.x, w.y, w.w, w.h), (0, 0, 2, 1));
        assert_eq!(doc.topics["status"], json!("mqttdash/dev/d1/status"));
    }

    #[test]
    fn test_placeholder_when_no_profile() {
        let doc = build_config(&DeviceRecord::new("d1"), &Profiles::new());
        assert!(doc.is_placeholder());
        assert!(doc.ui.widgets.is_empty());
        assert_eq!(
            doc.ui.banner.as_deref(),
            Some("unassigned: set profile in HA for d1")
        );
        let payload: Value = serde_json::from_str(&doc.to_payload().unwrap()).unwrap();
        assert_eq!(payload["ui"]["widgets"], json!([]));
        assert_eq!(payload["version"], json!(1));
    }

    #[test]
    fn test_profile_selection_order() {
        let own = json!({"widgets": [{"entity_id": "sensor.own"}]});
        let named = json!({"widgets": [{"entity_id": "sensor.named"}]});
        let fallback = json!({"widgets": [{"entity_id": "sensor.default"}]});
        let mut device = DeviceRecord {
            device_id: "d1".into(),
            profile: "named".into(),
            ..Default::default()
        };
        let first_entity = |doc: ConfigDocument| doc.ui.widgets[0].entity_id.clone();

        let all = profiles(&[("d1", own), ("named", named.clone()), ("default", fallback.clone())]);
        assert_eq!(first_entity(build_config(&device, &all)), "sensor.own");

        let no_own = profiles(&[("named", named), ("default", fallback.clone())]);
        assert_eq!(first_entity(build_config(&device, &no_own)), "sensor.named");

        device.profile = String::new();
        let lone = profiles(&[("other", json!({"widgets": [{"entity_id": "sensor.lone"}]}))]);
        assert_eq!(first_entity(build_config(&device, &lone)), "sensor.lone");

        let with_default = profiles(&[("x", json!({"a": 1})), ("default", fallback)]);
        assert_eq!(first_entity(build_config(&device, &with_default)), "sensor.default");

        let empty_own = profiles(&[("d1", json!({})), ("x", json!({"a": 1}))]);
        assert!(build_config(&device, &empty_own).is_placeholder());
    }

    #[test]
    fn test_unwrap_and_hoist() {
        let device = DeviceRecord::new("d1");
        let roster = profiles(&[(
            "d1",
            json!({"main_panel": {
                "gutter": 4,
                "ui": {"padding": 2},
                "widgets": [{"entity_id": "switch.fan"}]
            }}),
        )]);
        let doc = build_config(&device, &roster);
        assert_eq!(doc.ui.extra["gutter"], json!(4));
        assert_eq!(doc.ui.extra["padding"], json!(2));
        assert_eq!(doc.ui.widgets[0].kind, "switch");
    }

    #[test]
    fn test_layout_widgets_follow_explicit() {
        let device = DeviceRecord::new("d1");
        let roster = profiles(&[(
            "d1",
            json!({
                "widgets": [{"type": "label", "text": "Kitchen", "x": 0, "y": 0}],
                "dashboard": {"columns": 3, "layout": ["spacer, light.kitchen, unknown"]}
            }),
        )]);
        let doc = build_config(&device, &roster);
        let ids: Vec<&str> = doc.ui.widgets.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["p:0:", "g:1,0:light.kitchen"]);
        assert_eq!(doc.ui.extra["grid"]["columns"], json!(3));
    }

    #[test]
    fn test_topic_overrides_keep_defaults() {
        let device = DeviceRecord::new("d1");
        let roster = profiles(&[(
            "d1",
            json!({"widgets": [], "topics": {"status": "custom/status"}}),
        )]);
        let doc = build_config(&device, &roster);
        assert_eq!(doc.topics["status"], json!("custom/status"));
        assert_eq!(doc.topics["hello"], json!("mqttdash/dev/d1/hello"));
        assert_eq!(doc.topics["settings"], json!("mqttdash/dev/d1/settings"));
    }

    #[test]
    fn test_screen_copied_to_device() {
        let device = DeviceRecord {
            device_id: "d1".into(),
            screen: Some(json!({"w": 1024, "h": 600})),
            ..Default::default()
        };
        let doc = build_config(&device, &Profiles::new());
        assert_eq!(doc.device["screen"], json!({"w": 1024, "h": 600}));
    }

    #[test]
    fn test_build_is_deterministic() {
        let device = DeviceRecord {
            device_id: "d1".into(),
            profile: "p".into(),
            screen: Some(json!({"w": 1})),
            ..Default::default()
        };
        let roster = profiles(&[(
            "p",
            json!({
                "grid": {"cols": 4},
                "widgets": [{"entity_id": "light.a", "format": {"align": "left", "bgColor": "#000"}}],
                "dashboard": {"columns": 2, "layout": ["sensor.b(2x1)", "clock"]}
            }),
        )]);
        let a = build_config(&device, &roster).to_payload().unwrap();
        let b = build_config(&device, &roster.clone()).to_payload().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let raw = vec![
            json!({"entity": "light.a", "col": 1, "row": 2, "colspan": 3, "lbl": "A"}),
            json!({"type": "clock", "time_pattern": "HH:mm"}),
            json!({"type": "label", "text": "hi"}),
            json!({"type": "weather", "entity_id": "weather.home", "attrs": ["temperature"]}),
            json!({"type": "gauge", "entity_id": "sensor.p", "unit": "W", "protected": true}),
            json!({"entity_id": "scene.movie", "format": {"textSize": 12, "nope": 1}}),
            json!("not a widget"),
        ];
        let once = normalize_widgets(&raw);
        let as_values: Vec<Value> = once
            .iter()
            .map(|w| serde_json::to_value(w).unwrap())
            .collect();
        let twice = normalize_widgets(&as_values);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 6);
    }

    #[test]
    fn test_document_round_trips_through_serde() {
        let device = DeviceRecord::new("d1");
        let roster = profiles(&[("d1", json!({"ui": {"gutter": 1, "widgets": [{"entity_id": "light.a"}]}}))]);
        let doc = build_config(&device, &roster);
        let parsed: ConfigDocument = serde_json::from_str(&doc.to_payload().unwrap()).unwrap();
        assert_eq!(parsed, doc);
    }
}
