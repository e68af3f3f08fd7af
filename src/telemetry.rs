//! Per-device telemetry reported on `<devbase>/<id>/telemetry/<key>`
//!
//! The roster is owned by the bridge and handed to readers as a cloneable
//! handle.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceTelemetry {
    pub battery: Option<i64>,
    pub charging: Option<bool>,
    pub orientation: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A single parsed telemetry value
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryValue {
    Battery(i64),
    Charging(bool),
    Orientation(String),
}

impl TelemetryValue {
    /// None for unknown keys or unparseable values
    pub fn parse(key: &str, payload: &str) -> Option<Self> {
        let raw = payload.trim();
        match key {
            "battery" => raw
                .parse::<i64>()
                .ok()
                .or_else(|| raw.parse::<f64>().ok().map(|f| f.round() as i64))
                .map(Self::Battery),
            "charging" => Some(Self::Charging(matches!(
                raw.to_ascii_lowercase().as_str(),
                "on" | "true" | "1"
            ))),
            "orientation" if !raw.is_empty() => Some(Self::Orientation(raw.to_ascii_lowercase())),
            _ => None,
        }
    }
}

#[derive(Clone, Default)]
pub struct TelemetryRoster {
    inner: Arc<RwLock<HashMap<String, DeviceTelemetry>>>,
}

impl TelemetryRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a raw telemetry message. Returns false if it was ignored.
    pub async fn record(&self, device_id: &str, key: &str, payload: &str) -> bool {
        let Some(value) = TelemetryValue::parse(key, payload) else {
            return false;
        };
        let mut inner = self.inner.write().await;
        let entry = inner.entry(device_id.to_string()).or_default();
        match value {
            TelemetryValue::Battery(v) => entry.battery = Some(v),
            TelemetryValue::Charging(v) => entry.charging = Some(v),
            TelemetryValue::Orientation(v) => entry.orientation = Some(v),
        }
        entry.updated_at = Some(Utc::now());
        true
    }

    pub async fn get(&self, device_id: &str) -> Option<DeviceTelemetry> {
        self.inner.read().await.get(device_id).cloned()
    }

    pub async fn rename(&self, old_id: &str, new_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(t) = inner.remove(old_id) {
            inner.insert(new_id.to_string(), t);
        }
    }

    pub async fn remove(&self, device_id: &str) {
        self.inner.write().await.remove(device_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rules() {
        assert_eq!(TelemetryValue::parse("battery", "87"), Some(TelemetryValue::Battery(87)));
        assert_eq!(TelemetryValue::parse("battery", "86.6"), Some(TelemetryValue::Battery(87)));
        assert_eq!(TelemetryValue::parse("battery", "full"), None);
        assert_eq!(TelemetryValue::parse("charging", "ON"), Some(TelemetryValue::Charging(true)));
        assert_eq!(TelemetryValue::parse("charging", "1"), Some(TelemetryValue::Charging(true)));
        assert_eq!(TelemetryValue::parse("charging", "off"), Some(TelemetryValue::Charging(false)));
        assert_eq!(
            TelemetryValue::parse("orientation", " Landscape "),
            Some(TelemetryValue::Orientation("landscape".into()))
        );
        assert_eq!(TelemetryValue::parse("orientation", ""), None);
        assert_eq!(TelemetryValue::parse("wifi", "-40"), None);
    }

    #[tokio::test]
    async fn test_record_and_rename() {
        let roster = TelemetryRoster::new();
        assert!(roster.record("d1", "battery", "50").await);
        assert!(roster.record("d1", "charging", "true").await);
        assert!(!roster.record("d1", "battery", "x").await);

        let t = roster.get("d1").await.unwrap();
        assert_eq!(t.battery, Some(50));
        assert_eq!(t.charging, Some(true));
        assert!(t.updated_at.is_some());

        roster.rename("d1", "d2").await;
        assert!(roster.get("d1").await.is_none());
        assert_eq!(roster.get("d2").await.unwrap().battery, Some(50));
        roster.remove("d2").await;
        assert!(roster.get("d2").await.is_none());
    }
}
