//! Bridge facade
//!
//! A single task owns the store, the roster, the mirror and the debounce
//! timers. Everything else talks to it through [`BridgeHandle`], so no roster
//! or store mutation ever runs concurrently with another.

mod actor;

use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::bus::{BusEvent, SharedBus};
use crate::config::Config;
use crate::coordinator::TimerKind;
use crate::entry::{DeviceRecord, EntryStore};
use crate::error::{BridgeError, Result};
use crate::hub::SharedHub;
use crate::identity::{Hello, HelloOutcome};
use crate::registry::SharedRegistry;
use crate::store::{DeviceSettings, Profiles};
use crate::synth::ConfigDocument;
use crate::telemetry::{DeviceTelemetry, TelemetryRoster};
use crate::transport::{InboundMessage, SharedTransport};

const COMMAND_CAPACITY: usize = 64;

/// Collaborators the bridge calls into
pub struct BridgeDeps {
    pub transport: SharedTransport,
    pub hub: SharedHub,
    pub registry: SharedRegistry,
    pub entry: EntryStore,
    pub bus: SharedBus,
}

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub data_dir: PathBuf,
    pub republish_debounce: Duration,
    pub entry_reload_debounce: Duration,
}

impl BridgeSettings {
    pub fn from_config(config: &Config, data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            republish_debounce: config.republish_debounce(),
            entry_reload_debounce: config.entry_reload_debounce(),
        }
    }
}

pub(crate) enum Command {
    ResolveHello {
        hello: Hello,
        reply: oneshot::Sender<HelloOutcome>,
    },
    Schedule {
        kind: TimerKind,
        reason: String,
    },
    GetDeviceSettings {
        device_id: String,
        reply: oneshot::Sender<DeviceSettings>,
    },
    UpdateDeviceSettings {
        device_id: String,
        patch: DeviceSettings,
        reply: oneshot::Sender<DeviceSettings>,
    },
    PublishDeviceSettings {
        device_id: String,
        patch: DeviceSettings,
        reply: oneshot::Sender<Option<DeviceSettings>>,
    },
    PublishDeviceAction {
        device_id: String,
        action: String,
        reply: oneshot::Sender<()>,
    },
    PublishAllConfigs {
        reply: oneshot::Sender<usize>,
    },
    PublishDeviceConfig {
        device_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    DumpDeviceConfig {
        device_id: String,
        reply: oneshot::Sender<Result<ConfigDocument>>,
    },
    PurgeDevice {
        device_id: String,
        reply: oneshot::Sender<bool>,
    },
    RenameDevice {
        old_id: String,
        new_id: String,
        reply: oneshot::Sender<()>,
    },
    PruneUnassigned {
        reply: oneshot::Sender<Vec<String>>,
    },
    SetDeviceProfile {
        device_id: String,
        profile: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    SendNotification {
        device_id: String,
        message: String,
        title: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    PublishSnapshot {
        reply: oneshot::Sender<usize>,
    },
    Devices {
        reply: oneshot::Sender<Vec<DeviceRecord>>,
    },
    Profiles {
        reply: oneshot::Sender<Profiles>,
    },
}

/// Cloneable handle to the bridge task
#[derive(Clone)]
pub struct BridgeHandle {
    tx: mpsc::Sender<Command>,
    bus: SharedBus,
    telemetry: TelemetryRoster,
}

/// Start the bridge task. `inbound` is fed by the transport's event loop.
pub fn spawn(
    deps: BridgeDeps,
    settings: BridgeSettings,
    inbound: mpsc::Receiver<InboundMessage>,
    shutdown: CancellationToken,
) -> BridgeHandle {
    let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
    let telemetry = TelemetryRoster::new();
    let bus = deps.bus.clone();
    actor::start(deps, settings, telemetry.clone(), rx, inbound, shutdown);
    BridgeHandle { tx, bus, telemetry }
}

impl BridgeHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| BridgeError::ChannelClosed)?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)
    }

    async fn notify(&self, cmd: Command) -> Result<()> {
        self.tx.send(cmd).await.map_err(|_| BridgeError::ChannelClosed)
    }

    pub async fn resolve_hello(&self, hello: Hello) -> Result<HelloOutcome> {
        self.request(|reply| Command::ResolveHello { hello, reply }).await
    }

    pub async fn schedule_republish_reload(&self, reason: &str) -> Result<()> {
        self.notify(Command::Schedule {
            kind: TimerKind::RepublishReload,
            reason: reason.to_string(),
        })
        .await
    }

    pub async fn schedule_entry_reload(&self, reason: &str) -> Result<()> {
        self.notify(Command::Schedule {
            kind: TimerKind::EntryReload,
            reason: reason.to_string(),
        })
        .await
    }

    pub async fn get_device_settings(&self, device_id: &str) -> Result<DeviceSettings> {
        let device_id = device_id.to_string();
        self.request(|reply| Command::GetDeviceSettings { device_id, reply })
            .await
    }

    /// Merge `patch` into stored settings without pushing it to the device
    pub async fn update_device_settings(
        &self,
        device_id: &str,
        patch: DeviceSettings,
    ) -> Result<DeviceSettings> {
        let device_id = device_id.to_string();
        self.request(|reply| Command::UpdateDeviceSettings {
            device_id,
            patch,
            reply,
        })
        .await
    }

    /// Push settings to the device (retained) and store them. None if the
    /// patch was empty after clamping.
    pub async fn publish_device_settings(
        &self,
        device_id: &str,
        patch: DeviceSettings,
    ) -> Result<Option<DeviceSettings>> {
        let device_id = device_id.to_string();
        self.request(|reply| Command::PublishDeviceSettings {
            device_id,
            patch,
            reply,
        })
        .await
    }

    pub async fn publish_device_action(&self, device_id: &str, action: &str) -> Result<()> {
        let device_id = device_id.to_string();
        let action = action.to_string();
        self.request(|reply| Command::PublishDeviceAction {
            device_id,
            action,
            reply,
        })
        .await
    }

    /// Returns the number of configs published
    pub async fn publish_all_configs(&self) -> Result<usize> {
        self.request(|reply| Command::PublishAllConfigs { reply }).await
    }

    pub async fn publish_device_config(&self, device_id: &str) -> Result<()> {
        let device_id = device_id.to_string();
        self.request(|reply| Command::PublishDeviceConfig { device_id, reply })
            .await?
    }

    pub async fn dump_device_config(&self, device_id: &str) -> Result<ConfigDocument> {
        let device_id = device_id.to_string();
        self.request(|reply| Command::DumpDeviceConfig { device_id, reply })
            .await?
    }

    /// Operator delete. Returns false if the device was not in the roster
    /// (purge markers are recorded either way).
    pub async fn purge_device(&self, device_id: &str) -> Result<bool> {
        let device_id = device_id.to_string();
        self.request(|reply| Command::PurgeDevice { device_id, reply })
            .await
    }

    pub async fn rename_device(&self, old_id: &str, new_id: &str) -> Result<()> {
        let old_id = old_id.to_string();
        let new_id = new_id.to_string();
        self.request(|reply| Command::RenameDevice {
            old_id,
            new_id,
            reply,
        })
        .await
    }

    /// Returns the removed device ids
    pub async fn prune_unassigned(&self) -> Result<Vec<String>> {
        self.request(|reply| Command::PruneUnassigned { reply }).await
    }

    pub async fn set_device_profile(&self, device_id: &str, profile: Value) -> Result<()> {
        let device_id = device_id.to_string();
        self.request(|reply| Command::SetDeviceProfile {
            device_id,
            profile,
            reply,
        })
        .await?
    }

    pub async fn send_notification(
        &self,
        device_id: &str,
        message: &str,
        title: Option<&str>,
    ) -> Result<()> {
        let device_id = device_id.to_string();
        let message = message.to_string();
        let title = title.map(String::from);
        self.request(|reply| Command::SendNotification {
            device_id,
            message,
            title,
            reply,
        })
        .await?
    }

    /// Returns the number of mirror publishes
    pub async fn publish_snapshot(&self) -> Result<usize> {
        self.request(|reply| Command::PublishSnapshot { reply }).await
    }

    pub async fn devices(&self) -> Result<Vec<DeviceRecord>> {
        self.request(|reply| Command::Devices { reply }).await
    }

    pub async fn profiles(&self) -> Result<Profiles> {
        self.request(|reply| Command::Profiles { reply }).await
    }

    pub async fn telemetry(&self, device_id: &str) -> Option<DeviceTelemetry> {
        self.telemetry.get(device_id).await
    }

    pub fn telemetry_roster(&self) -> TelemetryRoster {
        self.telemetry.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.bus.subscribe()
    }
}
