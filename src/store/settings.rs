//! Per-device display settings (synced to the device as retained state)

use serde::{Deserialize, Serialize};

pub const MIN_BRIGHTNESS: f64 = 0.05;
pub const MAX_BRIGHTNESS: f64 = 1.0;

/// Screen orientation lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Auto,
    Portrait,
    Landscape,
}

impl Orientation {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "portrait" => Some(Self::Portrait),
            "landscape" => Some(Self::Landscape),
            _ => None,
        }
    }
}

/// Device settings. Every field is independently settable, so the same type
/// doubles as a partial patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_awake: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<Orientation>,
}

impl DeviceSettings {
    pub fn is_empty(&self) -> bool {
        self.brightness.is_none() && self.keep_awake.is_none() && self.orientation.is_none()
    }

    /// Merge-by-key: fields present in `patch` win, absent fields are kept.
    pub fn merge(&mut self, patch: &DeviceSettings) {
        if let Some(b) = patch.brightness {
            self.brightness = Some(b);
        }
        if let Some(k) = patch.keep_awake {
            self.keep_awake = Some(k);
        }
        if let Some(o) = patch.orientation {
            self.orientation = Some(o);
        }
    }

    /// Clamp brightness into [0.05, 1.0]. NaN is dropped.
    pub fn clamped(mut self) -> Self {
        self.brightness = self
            .brightness
            .filter(|b| !b.is_nan())
            .map(|b| b.clamp(MIN_BRIGHTNESS, MAX_BRIGHTNESS));
        self
    }

    /// Lenient decode: unknown or mistyped fields are skipped instead of
    /// failing the whole record.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };
        Self {
            brightness: obj.get("brightness").and_then(|v| v.as_f64()),
            keep_awake: obj.get("keep_awake").and_then(|v| v.as_bool()),
            orientation: obj
                .get("orientation")
                .and_then(|v| v.as_str())
                .and_then(Orientation::parse),
        }
        .clamped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_keeps_absent_fields() {
        let mut cur = DeviceSettings {
            brightness: Some(0.4),
            keep_awake: Some(true),
            orientation: None,
        };
        cur.merge(&DeviceSettings {
            orientation: Some(Orientation::Landscape),
            ..Default::default()
        });
        assert_eq!(cur.brightness, Some(0.4));
        assert_eq!(cur.keep_awake, Some(true));
        assert_eq!(cur.orientation, Some(Orientation::Landscape));
    }

    #[test]
    fn test_clamp_brightness() {
        let s = DeviceSettings {
            brightness: Some(0.0),
            ..Default::default()
        }
        .clamped();
        assert_eq!(s.brightness, Some(MIN_BRIGHTNESS));

        let s = DeviceSettings {
            brightness: Some(3.0),
            ..Default::default()
        }
        .clamped();
        assert_eq!(s.brightness, Some(MAX_BRIGHTNESS));
    }

    #[test]
    fn test_serialize_skips_unset() {
        let s = DeviceSettings {
            keep_awake: Some(false),
            ..Default::default()
        };
        assert_eq!(serde_json::to_string(&s).unwrap(), r#"{"keep_awake":false}"#);
    }

    #[test]
    fn test_lenient_decode() {
        let s = DeviceSettings::from_value(&json!({
            "brightness": 0.5,
            "keep_awake": "yes",
            "orientation": "Portrait"
        }));
        assert_eq!(s.brightness, Some(0.5));
        assert_eq!(s.keep_awake, None);
        assert_eq!(s.orientation, Some(Orientation::Portrait));
    }
}
