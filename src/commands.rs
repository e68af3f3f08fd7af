//! Device command payloads
//!
//! `<cmdbase>/<entity_id>` carries `{action, ...}` that is mapped to a hub
//! service call; the bare `<cmdbase>` carries operator actions.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{BridgeError, Result};
use crate::hub::ServiceCall;
use crate::topics;

const TOGGLE_DOMAINS: &[&str] = &["light", "switch", "input_boolean", "scene", "script"];

#[derive(Debug, Default, Deserialize)]
struct CommandPayload {
    #[serde(default)]
    action: String,
    #[serde(flatten)]
    params: Map<String, Value>,
}

fn parse_payload(topic: &str, payload: &str) -> Result<CommandPayload> {
    if payload.trim().is_empty() {
        return Ok(CommandPayload::default());
    }
    serde_json::from_str(payload).map_err(|e| BridgeError::malformed(topic, e.to_string()))
}

/// Map an entity command to a service call. `Ok(None)` when the action has
/// no mapping for the entity's domain.
pub fn map_entity_command(entity_id: &str, payload: &str) -> Result<Option<ServiceCall>> {
    let topic = topics::command(entity_id);
    let Some((domain, _)) = topics::split_entity_id(entity_id) else {
        return Err(BridgeError::malformed(topic, "entity id without domain"));
    };
    let cmd = parse_payload(&topic, payload)?;
    let action = cmd.action.to_ascii_lowercase();

    let service = match action.as_str() {
        "turn_on" | "turn_off" | "toggle" => action.clone(),
        "run" if domain == "script" => "turn_on".to_string(),
        "press" if domain == "button" => {
            return Ok(Some(ServiceCall::new("button", "press", entity_id)));
        }
        "set_level" if domain == "number" || domain == "input_number" => {
            let level = cmd.params.get("level").cloned().unwrap_or(Value::Null);
            return Ok(Some(
                ServiceCall::new(domain, "set_value", entity_id).with("value", level),
            ));
        }
        _ => return Ok(None),
    };

    if TOGGLE_DOMAINS.contains(&domain) {
        let mut call = ServiceCall::new(domain, service, entity_id);
        if let Some(b) = cmd.params.get("brightness") {
            call = call.with("brightness", b.clone());
        }
        if let Some(ct) = cmd.params.get("color_temp_mired") {
            call = call.with("color_temp", ct.clone());
        }
        return Ok(Some(call));
    }
    Ok(Some(ServiceCall::new("homeassistant", service, entity_id)))
}

/// Operator action on the bare command topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Rename { old_id: String, new_id: String },
    PurgeDevice { device_id: String },
    PublishConfig,
    Snapshot,
}

impl AdminCommand {
    /// `Ok(None)` for unknown actions or incomplete parameters
    pub fn parse(payload: &str) -> Result<Option<Self>> {
        let cmd = parse_payload(topics::COMMAND_BASE, payload)?;
        let param = |key: &str| {
            cmd.params
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or("")
                .to_string()
        };
        Ok(match cmd.action.to_ascii_lowercase().as_str() {
            "rename" => {
                let (old_id, new_id) = (param("old"), param("new"));
                (!old_id.is_empty() && !new_id.is_empty() && old_id != new_id)
                    .then_some(Self::Rename { old_id, new_id })
            }
            "purge_device" => {
                let device_id = param("device_id");
                (!device_id.is_empty()).then_some(Self::PurgeDevice { device_id })
            }
            "publish_config" => Some(Self::PublishConfig),
            "snapshot" => Some(Self::Snapshot),
            _ => None,
        })
    }
}

/// Device-originated request on `<devbase>/<id>/request`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRequest {
    Snapshot,
    Onboard { guid: Option<String> },
}

impl DeviceRequest {
    /// Our own `reload`/`rename`/`offboard` pushes echo back on the same
    /// topic and parse to `Ok(None)`.
    pub fn parse(topic: &str, payload: &str) -> Result<Option<Self>> {
        let cmd = parse_payload(topic, payload)?;
        Ok(match cmd.action.to_ascii_lowercase().as_str() {
            "snapshot" => Some(Self::Snapshot),
            "onboard" => Some(Self::Onboard {
                guid: cmd
                    .params
                    .get("guid")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|g| !g.is_empty())
                    .map(String::from),
            }),
            _ => None,
        })
    }
}
