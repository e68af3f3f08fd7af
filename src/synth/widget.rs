//! Widget model
//!
//! Profiles carry loosely-typed widget objects with several key aliases.
//! [`WidgetSpec::parse`] is the one place those aliases are resolved; past
//! that point everything works with the typed [`WidgetKind`] union, and
//! [`WidgetSpec::render`] generates the transport addresses.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::topics;

/// Keys allowed through in a widget's `format` object
pub const FORMAT_KEYS: &[&str] = &[
    "align",
    "vAlign",
    "textSize",
    "textColor",
    "bgColor",
    "onTextColor",
    "offTextColor",
    "onBgColor",
    "offBgColor",
    "wrap",
    "maxLines",
];

/// Largest coordinate or span a widget can carry; larger values are clamped
pub const MAX_CELLS: i64 = 1 << 16;

/// Grid rectangle in cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
}

impl Placement {
    /// Clamp position into `±MAX_CELLS` and spans into `1..=MAX_CELLS`
    pub fn bounded(x: i64, y: i64, w: i64, h: i64) -> Self {
        Self {
            x: x.clamp(-MAX_CELLS, MAX_CELLS),
            y: y.clamp(-MAX_CELLS, MAX_CELLS),
            w: w.clamp(1, MAX_CELLS),
            h: h.clamp(1, MAX_CELLS),
        }
    }

    pub fn overlaps(&self, other: &Placement) -> bool {
        !(self.x.saturating_add(self.w) <= other.x
            || other.x.saturating_add(other.w) <= self.x
            || self.y.saturating_add(self.h) <= other.y
            || other.y.saturating_add(other.h) <= self.y)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WidgetKind {
    Light,
    Switch,
    Scene,
    Button,
    Person,
    Sensor,
    /// Static text; needs no entity
    Label { text: Option<String> },
    /// Local time render; needs no entity
    Clock { time_pattern: Option<String> },
    Weather {
        attrs: Vec<String>,
        attr_units: BTreeMap<String, String>,
    },
    /// Explicit type the bridge has no special handling for
    Custom(String),
}

impl WidgetKind {
    /// Type for an entity widget without an explicit `type`
    pub fn infer(domain: Option<&str>) -> Self {
        match domain {
            Some("light") => Self::Light,
            Some("switch") | Some("input_boolean") => Self::Switch,
            Some("scene") => Self::Scene,
            Some("script") | Some("button") => Self::Button,
            Some("person") => Self::Person,
            _ => Self::Sensor,
        }
    }

    fn from_explicit(name: &str, obj: &Map<String, Value>) -> Self {
        match name {
            "light" => Self::Light,
            "switch" => Self::Switch,
            "scene" => Self::Scene,
            "button" => Self::Button,
            "person" => Self::Person,
            "sensor" => Self::Sensor,
            "label" => Self::Label {
                text: obj.get("text").and_then(Value::as_str).map(String::from),
            },
            "clock" => Self::Clock {
                time_pattern: trimmed_str(obj.get("time_pattern")),
            },
            "weather" => Self::Weather {
                attrs: obj
                    .get("attrs")
                    .and_then(Value::as_array)
                    .map(|a| a.iter().filter_map(Value::as_str).map(String::from).collect())
                    .unwrap_or_default(),
                attr_units: obj
                    .get("attr_units")
                    .and_then(Value::as_object)
                    .map(|m| {
                        m.iter()
                            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            other => Self::Custom(other.to_string()),
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Self::Light => "light",
            Self::Switch => "switch",
            Self::Scene => "scene",
            Self::Button => "button",
            Self::Person => "person",
            Self::Sensor => "sensor",
            Self::Label { .. } => "label",
            Self::Clock { .. } => "clock",
            Self::Weather { .. } => "weather",
            Self::Custom(name) => name,
        }
    }

    fn accepts_commands(&self) -> bool {
        matches!(self, Self::Light | Self::Switch | Self::Scene | Self::Button)
    }

    fn needs_entity(&self) -> bool {
        !matches!(self, Self::Label { .. } | Self::Clock { .. })
    }
}

/// A widget parsed from a profile, before topic generation
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetSpec {
    pub id: String,
    pub kind: WidgetKind,
    pub entity_id: String,
    pub label: String,
    pub placement: Placement,
    pub protected: Option<bool>,
    pub unit: Option<String>,
    pub format: Option<Map<String, Value>>,
}

fn trimmed_str(v: Option<&Value>) -> Option<String> {
    v.and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn first_str<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
}

/// Value for `key`, falling back to `alias` only when `key` is absent
fn aliased<'a>(obj: &'a Map<String, Value>, key: &str, alias: &str) -> Option<&'a Value> {
    obj.get(key).or_else(|| obj.get(alias))
}

fn coerce_int(v: Option<&Value>, default: i64) -> i64 {
    match v {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

fn protected_flag(v: Option<&Value>) -> Option<bool> {
    match v {
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Some(n.as_f64() != Some(0.0)),
        _ => None,
    }
}

fn sanitize_format(v: Option<&Value>) -> Option<Map<String, Value>> {
    let fmt = v?.as_object()?;
    let kept: Map<String, Value> = fmt
        .iter()
        .filter(|(k, v)| FORMAT_KEYS.contains(&k.as_str()) && (v.is_string() || v.is_number()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    (!kept.is_empty()).then_some(kept)
}

impl WidgetSpec {
    /// Parse one raw widget object. `index` is its position in the combined
    /// widget list and seeds the generated id.
    ///
    /// Returns None for non-objects, spacers, and entries with neither an
    /// entity nor an entity-less type.
    pub fn parse(index: usize, raw: &Value) -> Option<Self> {
        let obj = raw.as_object()?;
        let entity_id = first_str(obj, &["entity_id", "entity", "eid"])
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        let explicit = obj
            .get("type")
            .and_then(Value::as_str)
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty());

        if explicit.as_deref() == Some("spacer") {
            return None;
        }
        let domain = topics::split_entity_id(&entity_id).map(|(d, _)| d);
        let kind = match explicit.as_deref() {
            Some(name) => WidgetKind::from_explicit(name, obj),
            None => WidgetKind::infer(domain),
        };
        if entity_id.is_empty() && kind.needs_entity() {
            return None;
        }

        let placement = Placement::bounded(
            coerce_int(aliased(obj, "x", "col"), 0),
            coerce_int(aliased(obj, "y", "row"), 0),
            coerce_int(aliased(obj, "w", "colspan"), 1),
            coerce_int(aliased(obj, "h", "rowspan"), 1),
        );

        let id = first_str(obj, &["id"])
            .map(String::from)
            .unwrap_or_else(|| format!("p:{}:{}", index, entity_id));
        let label = first_str(obj, &["label", "lbl"])
            .map(String::from)
            .unwrap_or_else(|| entity_id.clone());

        Some(Self {
            id,
            kind,
            entity_id,
            label,
            placement,
            protected: protected_flag(obj.get("protected")),
            unit: trimmed_str(obj.get("unit")),
            format: sanitize_format(obj.get("format")),
        })
    }

    /// Produce the device-facing widget with generated topics
    pub fn render(&self) -> RenderedWidget {
        let parts = topics::split_entity_id(&self.entity_id);
        let mut out = RenderedWidget {
            id: self.id.clone(),
            kind: self.kind.type_name().to_string(),
            entity_id: self.entity_id.clone(),
            label: self.label.clone(),
            x: self.placement.x,
            y: self.placement.y,
            w: self.placement.w,
            h: self.placement.h,
            state_topic: parts
                .map(|(d, o)| topics::entity_state(d, o))
                .unwrap_or_default(),
            protected: self.protected,
            command_topic: None,
            unit: self.unit.clone(),
            format: self.format.clone(),
            attr_topic: None,
            text: None,
            time_pattern: None,
            attr_base: None,
            attrs: None,
            attr_units: None,
        };

        if let Some((domain, object_id)) = parts {
            if self.kind.accepts_commands() {
                out.command_topic = Some(topics::command(&self.entity_id));
            }
            if domain == "light" {
                out.attr_topic = Some(topics::entity_attribute(domain, object_id, "brightness"));
            }
        }

        match &self.kind {
            WidgetKind::Label { text } if self.entity_id.is_empty() => {
                out.text = text.clone();
                out.state_topic = String::new();
            }
            WidgetKind::Clock { time_pattern } => {
                out.time_pattern = time_pattern.clone();
                out.state_topic = String::new();
            }
            WidgetKind::Weather { attrs, attr_units } => {
                if let Some(("weather", object_id)) = parts {
                    out.attr_base = Some(topics::entity_attributes("weather", object_id));
                    out.attrs = (!attrs.is_empty()).then(|| attrs.clone());
                    out.attr_units = (!attr_units.is_empty()).then(|| attr_units.clone());
                }
            }
            _ => {}
        }
        out
    }
}

/// Widget as it appears in the published configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedWidget {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub entity_id: String,
    pub label: String,
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
    pub state_topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr_units: Option<BTreeMap<String, String>>,
}

/// Parse and render a raw widget list, dropping entries that don't parse
pub fn normalize_widgets(raw: &[Value]) -> Vec<RenderedWidget> {
    raw.iter()
        .enumerate()
        .filter_map(|(idx, w)| WidgetSpec::parse(idx, w))
        .map(|spec| spec.render())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_position_aliases() {
        let spec = WidgetSpec::parse(
            0,
            &json!({"entity": "sensor.temp", "col": 2, "row": "3", "colspan": 0, "rowspan": 2}),
        )
        .unwrap();
        assert_eq!(
            spec.placement,
            Placement {
                x: 2,
                y: 3,
                w: 1,
                h: 2
            }
        );
        assert_eq!(spec.kind, WidgetKind::Sensor);
        assert_eq!(spec.id, "p:0:sensor.temp");
    }

    #[test]
    fn test_extreme_coordinates_clamped() {
        let spec = WidgetSpec::parse(
            0,
            &json!({"entity_id": "light.a", "x": i64::MAX, "y": i64::MIN, "w": 2, "h": 1e300}),
        )
        .unwrap();
        assert_eq!(
            spec.placement,
            Placement {
                x: MAX_CELLS,
                y: -MAX_CELLS,
                w: 2,
                h: MAX_CELLS
            }
        );
        let edge = Placement {
            x: i64::MAX,
            y: 0,
            w: 2,
            h: 1,
        };
        assert!(edge.overlaps(&edge));
    }

    #[test]
    fn test_primary_key_shadows_alias() {
        let spec = WidgetSpec::parse(0, &json!({"eid": "switch.fan", "x": null, "col": 4})).unwrap();
        assert_eq!(spec.placement.x, 0);
        assert_eq!(spec.kind, WidgetKind::Switch);
    }

    #[test]
    fn test_type_inference_by_domain() {
        for (entity, ty) in [
            ("light.a", "light"),
            ("input_boolean.a", "switch"),
            ("scene.a", "scene"),
            ("script.a", "button"),
            ("button.a", "button"),
            ("person.a", "person"),
            ("binary_sensor.a", "sensor"),
        ] {
            let w = WidgetSpec::parse(0, &json!({ "entity_id": entity })).unwrap().render();
            assert_eq!(w.kind, ty, "{}", entity);
        }
    }

    #[test]
    fn test_entityless_widgets() {
        assert!(WidgetSpec::parse(0, &json!({"x": 1})).is_none());
        assert!(WidgetSpec::parse(0, &json!({"type": "spacer", "entity_id": "light.a"})).is_none());

        let label = WidgetSpec::parse(1, &json!({"type": "Label", "text": "Hi"}))
            .unwrap()
            .render();
        assert_eq!(label.kind, "label");
        assert_eq!(label.text.as_deref(), Some("Hi"));
        assert_eq!(label.state_topic, "");
        assert_eq!(label.id, "p:1:");

        let clock = WidgetSpec::parse(0, &json!({"type": "clock", "time_pattern": " HH:mm "}))
            .unwrap()
            .render();
        assert_eq!(clock.time_pattern.as_deref(), Some("HH:mm"));
        assert_eq!(clock.state_topic, "");
        assert_eq!(clock.command_topic, None);
    }

    #[test]
    fn test_weather_attributes() {
        let w = WidgetSpec::parse(
            0,
            &json!({
                "type": "weather",
                "entity_id": "weather.home",
                "attrs": ["temperature", 3, "humidity"],
                "attr_units": {"temperature": "°C", "bad": 1}
            }),
        )
        .unwrap()
        .render();
        assert_eq!(
            w.attr_base.as_deref(),
            Some("mqttdash/statestream/weather/home/attributes")
        );
        assert_eq!(
            w.attrs,
            Some(vec!["temperature".to_string(), "humidity".to_string()])
        );
        assert_eq!(w.attr_units.unwrap().len(), 1);

        let off = WidgetSpec::parse(0, &json!({"type": "weather", "entity_id": "sensor.x"}))
            .unwrap()
            .render();
        assert_eq!(off.attr_base, None);
    }

    #[test]
    fn test_format_allowlist_and_extras() {
        let w = WidgetSpec::parse(
            0,
            &json!({
                "entity_id": "sensor.t",
                "unit": " °C ",
                "protected": 1,
                "format": {"align": "center", "textSize": 14, "evil": "x", "wrap": true}
            }),
        )
        .unwrap()
        .render();
        assert_eq!(w.unit.as_deref(), Some("°C"));
        assert_eq!(w.protected, Some(true));
        let fmt = w.format.unwrap();
        assert_eq!(fmt.len(), 2);
        assert_eq!(fmt["align"], json!("center"));
        assert_eq!(fmt["textSize"], json!(14));
    }

    #[test]
    fn test_stored_topics_are_ignored() {
        let w = WidgetSpec::parse(
            0,
            &json!({"entity_id": "switch.fan", "state_topic": "evil/topic", "command_topic": "evil/cmd"}),
        )
        .unwrap()
        .render();
        assert_eq!(w.state_topic, "mqttdash/statestream/switch/fan/state");
        assert_eq!(w.command_topic.as_deref(), Some("mqttdash/cmd/switch.fan"));
    }

    #[test]
    fn test_overlap() {
        let a = Placement { x: 0, y: 0, w: 2, h: 1 };
        let b = Placement { x: 1, y: 0, w: 1, h: 1 };
        let c = Placement { x: 2, y: 0, w: 1, h: 1 };
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }
}
