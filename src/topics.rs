//! Fixed mqttdash topic namespace.
//!
//! Every address a device can see is derived here; profiles never carry
//! topic strings of their own.

pub const CONFIG_BASE: &str = "mqttdash/config";
pub const DEVICE_BASE: &str = "mqttdash/dev";
pub const COMMAND_BASE: &str = "mqttdash/cmd";
pub const STATESTREAM_BASE: &str = "mqttdash/statestream";

/// Topics the device can have retained state on, cleared on purge.
pub fn retained_device_topics(device_id: &str) -> Vec<String> {
    vec![
        config(device_id),
        settings(device_id),
        status(device_id),
        hello(device_id),
        heartbeat(device_id),
    ]
}

pub fn config(device_id: &str) -> String {
    format!("{}/{}/config", CONFIG_BASE, device_id)
}

pub fn settings(device_id: &str) -> String {
    format!("{}/{}/settings", DEVICE_BASE, device_id)
}

pub fn status(device_id: &str) -> String {
    format!("{}/{}/status", DEVICE_BASE, device_id)
}

pub fn hello(device_id: &str) -> String {
    format!("{}/{}/hello", DEVICE_BASE, device_id)
}

pub fn heartbeat(device_id: &str) -> String {
    format!("{}/{}/heartbeat", DEVICE_BASE, device_id)
}

pub fn request(device_id: &str) -> String {
    format!("{}/{}/request", DEVICE_BASE, device_id)
}

pub fn notify(device_id: &str) -> String {
    format!("{}/{}/notify", DEVICE_BASE, device_id)
}

pub fn command(entity_id: &str) -> String {
    format!("{}/{}", COMMAND_BASE, entity_id)
}

pub fn entity_state(domain: &str, object_id: &str) -> String {
    format!("{}/{}/{}/state", STATESTREAM_BASE, domain, object_id)
}

pub fn entity_attributes(domain: &str, object_id: &str) -> String {
    format!("{}/{}/{}/attributes", STATESTREAM_BASE, domain, object_id)
}

pub fn entity_attribute(domain: &str, object_id: &str, key: &str) -> String {
    format!("{}/{}", entity_attributes(domain, object_id), key)
}

/// Subscription patterns owned by the bridge.
pub fn subscriptions() -> Vec<String> {
    vec![
        format!("{}/#", COMMAND_BASE),
        format!("{}/+/request", DEVICE_BASE),
        format!("{}/+/hello", DEVICE_BASE),
        format!("{}/+/telemetry/#", DEVICE_BASE),
    ]
}

/// Split `domain.object_id`. Returns None for ids without a dot or with an empty half.
pub fn split_entity_id(entity_id: &str) -> Option<(&str, &str)> {
    let (domain, object_id) = entity_id.split_once('.')?;
    if domain.is_empty() || object_id.is_empty() {
        return None;
    }
    Some((domain, object_id))
}

/// Inbound topic classified by the channel it arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundTopic {
    Hello { device_id: String },
    Request { device_id: String },
    Telemetry { device_id: String, key: String },
    EntityCommand { entity_id: String },
    AdminCommand,
}

impl InboundTopic {
    pub fn parse(topic: &str) -> Option<Self> {
        if topic == COMMAND_BASE {
            return Some(Self::AdminCommand);
        }
        if let Some(entity_id) = topic
            .strip_prefix(COMMAND_BASE)
            .and_then(|rest| rest.strip_prefix('/'))
        {
            if entity_id.is_empty() {
                return Some(Self::AdminCommand);
            }
            return Some(Self::EntityCommand {
                entity_id: entity_id.to_string(),
            });
        }

        let rest = topic
            .strip_prefix(DEVICE_BASE)
            .and_then(|rest| rest.strip_prefix('/'))?;
        let parts: Vec<&str> = rest.split('/').collect();
        match parts.as_slice() {
            [device_id, "hello"] if !device_id.is_empty() => Some(Self::Hello {
                device_id: device_id.to_string(),
            }),
            [device_id, "request"] if !device_id.is_empty() => Some(Self::Request {
                device_id: device_id.to_string(),
            }),
            [device_id, "telemetry", .., key] if !device_id.is_empty() => Some(Self::Telemetry {
                device_id: device_id.to_string(),
                key: key.to_string(),
            }),
            _ => None,
        }
    }
}
