//! mqttdash bridge
//!
//! Connects MQTT dashboard-display devices to a home-automation hub.
//!
//! This library provides:
//! - Device identity resolution (GUID, previous-id hint, purge markers)
//! - Per-device config synthesis from stored profiles
//! - Debounced republish of retained configs
//! - Mirroring of hub entity state into the MQTT namespace
//! - Retained, bidirectional device settings

pub mod bridge;
pub mod bus;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod entry;
pub mod error;
pub mod hub;
pub mod identity;
pub mod mirror;
pub mod registry;
pub mod store;
pub mod synth;
pub mod telemetry;
pub mod topics;
pub mod transport;

pub use bridge::{BridgeDeps, BridgeHandle, BridgeSettings};
pub use error::{BridgeError, Result};
pub use synth::build_config;
