//! Configuration management

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const APP_DIR_NAME: &str = "mqttdash-bridge";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Home-automation hub; without it the bridge runs against a static hub
    #[serde(default)]
    pub hub: Option<HubConfig>,

    #[serde(default = "default_debounce_ms")]
    pub republish_debounce_ms: u64,

    #[serde(default = "default_debounce_ms")]
    pub entry_reload_debounce_ms: u64,
}

impl Config {
    pub fn republish_debounce(&self) -> Duration {
        Duration::from_millis(self.republish_debounce_ms)
    }

    pub fn entry_reload_debounce(&self) -> Duration {
        Duration::from_millis(self.entry_reload_debounce_ms)
    }
}

fn default_debounce_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive(),
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "mqttdash-bridge".to_string()
}

fn default_keep_alive() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    pub url: String,
    pub token: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval() -> u64 {
    1000
}

/// Get config directory (XDG_CONFIG_HOME or platform default)
pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MQTTDASH_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library/Application Support")
                .join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join(APP_DIR_NAME);
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".config").join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join(APP_DIR_NAME);
        }
    }

    // Fallback to current directory
    PathBuf::from(".")
}

/// Get data directory (XDG_DATA_HOME or platform default)
///
/// Holds `mqttdash.store.json` and `mqttdash.entry.json`.
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MQTTDASH_DATA_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library/Application Support")
                .join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join(APP_DIR_NAME);
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/share").join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("LOCALAPPDATA") {
            return PathBuf::from(appdata).join(APP_DIR_NAME);
        }
    }

    // Fallback to ./data
    PathBuf::from("./data")
}

pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();

    let mut builder = ::config::Config::builder()
        .set_default("mqtt.host", default_mqtt_host())?
        .set_default("mqtt.port", default_mqtt_port() as i64)?
        // Load from config file if it exists
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        // Override with environment variables (MQTTDASH_MQTT__HOST, MQTTDASH_HUB__URL, etc.)
        .add_source(
            ::config::Environment::with_prefix("MQTTDASH")
                .separator("__")
                .try_parsing(true),
        );

    // Broker env vars shared with other MQTT tooling on the host
    if let Ok(host) = std::env::var("MQTT_HOST") {
        builder = builder.set_override("mqtt.host", host)?;
    }
    if let Ok(port) = std::env::var("MQTT_PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("mqtt.port", port_num as i64)?;
        }
    }
    if let Ok(url) = std::env::var("HUB_URL") {
        builder = builder.set_override("hub.url", url)?;
    }
    if let Ok(token) = std::env::var("HUB_TOKEN") {
        builder = builder.set_override("hub.token", token)?;
    }

    let config = builder.build()?;

    Ok(config.try_deserialize()?)
}
