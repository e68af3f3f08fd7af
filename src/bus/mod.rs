//! Event bus for the adapters that sit on top of the bridge
//!
//! Uses tokio::sync::broadcast for pub/sub pattern.
//! Settings observers, telemetry readers and entity adapters subscribe here
//! instead of polling the bridge.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::store::DeviceSettings;

/// Event types that can be published on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BusEvent {
    // Roster events
    DeviceRegistered { device_id: String },
    DeviceRenamed { old_id: String, new_id: String },
    DevicePurged { device_id: String },

    /// Stored settings changed (merged result)
    DeviceSettingsUpdated {
        device_id: String,
        settings: DeviceSettings,
    },

    /// A telemetry value arrived for a device
    TelemetryUpdated { device_id: String, key: String },

    /// The device member set changed; adapters should rebuild per-device entities
    EntryReloaded { device_ids: Vec<String> },

    /// A republish cycle finished
    ConfigsPublished { count: usize },
}

/// Event bus handle for publishing and subscribing
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
}

impl Default for EventBus {
    /// Default capacity (256 events)
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    /// Create a new event bus with specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: BusEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }
}

/// Shared event bus wrapped in Arc for thread-safe sharing
pub type SharedBus = Arc<EventBus>;

/// Create a new shared event bus
pub fn create_bus() -> SharedBus {
    Arc::new(EventBus::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pubsub() {
        let bus = create_bus();
        let mut rx = bus.subscribe();

        bus.publish(BusEvent::DeviceRenamed {
            old_id: "d1".to_string(),
            new_id: "d2".to_string(),
        });

        let event = rx.recv().await.unwrap();
        match event {
            BusEvent::DeviceRenamed { new_id, .. } => {
                assert_eq!(new_id, "d2");
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = create_bus();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(BusEvent::ConfigsPublished { count: 2 });

        assert!(matches!(
            rx1.recv().await.unwrap(),
            BusEvent::ConfigsPublished { count: 2 }
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            BusEvent::ConfigsPublished { count: 2 }
        ));
    }

    #[test]
    fn test_events_serialize_tagged() {
        let event = BusEvent::DevicePurged {
            device_id: "d1".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "DevicePurged");
        assert_eq!(json["payload"]["device_id"], "d1");
    }
}
