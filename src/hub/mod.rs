//! Home-automation hub collaborator
//!
//! The bridge reads entity state for the mirror and forwards device commands
//! as service calls. State changes are pushed over a broadcast channel.

mod memory;
mod rest;

pub use memory::StaticHub;
pub use rest::RestHub;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Hub states that mean "no value"
pub const STATE_UNKNOWN: &str = "unknown";
pub const STATE_UNAVAILABLE: &str = "unavailable";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl EntityState {
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// Entity state change notification
#[derive(Debug, Clone, PartialEq)]
pub struct StateChanged {
    pub entity_id: String,
    /// None when the entity disappeared
    pub new_state: Option<EntityState>,
}

/// `domain.service` call with its data (including `entity_id`)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub data: Map<String, Value>,
}

impl ServiceCall {
    pub fn new(domain: impl Into<String>, service: impl Into<String>, entity_id: &str) -> Self {
        let mut data = Map::new();
        data.insert("entity_id".to_string(), Value::String(entity_id.to_string()));
        Self {
            domain: domain.into(),
            service: service.into(),
            data,
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

impl std::fmt::Display for ServiceCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.domain, self.service)
    }
}

#[async_trait]
pub trait Hub: Send + Sync {
    /// Current state, None if the hub has no such entity
    async fn get_state(&self, entity_id: &str) -> Result<Option<EntityState>>;

    async fn call_service(&self, call: &ServiceCall) -> Result<()>;

    /// Replace the set of entities whose changes are reported
    async fn watch(&self, entity_ids: Vec<String>);

    fn subscribe(&self) -> broadcast::Receiver<StateChanged>;
}

pub type SharedHub = Arc<dyn Hub>;
