//! The bridge task

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{BridgeDeps, BridgeSettings, Command};
use crate::bus::{BusEvent, SharedBus};
use crate::commands::{map_entity_command, AdminCommand, DeviceRequest};
use crate::coordinator::{RepublishCoordinator, TimerKind};
use crate::entry::{EntryStore, EntryUpdate, Origin};
use crate::error::{BridgeError, Result};
use crate::hub::{SharedHub, StateChanged};
use crate::identity::{dedupe_devices, relink_profiles, Hello, HelloAction, HelloOutcome, Roster};
use crate::mirror::{MirrorPublish, StateMirror};
use crate::registry::{Migration, SharedRegistry};
use crate::store::{DeviceSettings, Store};
use crate::synth::{self, ConfigDocument};
use crate::telemetry::TelemetryRoster;
use crate::topics::{self, InboundTopic};
use crate::transport::{publish_logged, InboundMessage, SharedTransport};

const FIRED_CAPACITY: usize = 8;

fn respond<T>(reply: oneshot::Sender<T>, value: T) {
    if reply.send(value).is_err() {
        debug!("bridge: caller dropped before reply");
    }
}

struct Bridge {
    transport: SharedTransport,
    hub: SharedHub,
    registry: SharedRegistry,
    entry: EntryStore,
    bus: SharedBus,
    telemetry: TelemetryRoster,
    store: Store,
    roster: Roster,
    mirror: StateMirror,
    coordinator: RepublishCoordinator,
    /// Member set as of the last roster write, for diffing external edits
    last_device_ids: BTreeSet<String>,
}

pub(super) fn start(
    deps: BridgeDeps,
    settings: BridgeSettings,
    telemetry: TelemetryRoster,
    commands: mpsc::Receiver<Command>,
    inbound: mpsc::Receiver<InboundMessage>,
    shutdown: CancellationToken,
) {
    let (fired_tx, fired_rx) = mpsc::channel(FIRED_CAPACITY);
    let coordinator = RepublishCoordinator::new(
        settings.republish_debounce,
        settings.entry_reload_debounce,
        fired_tx,
        shutdown.child_token(),
    );
    let bridge = Bridge {
        transport: deps.transport,
        hub: deps.hub,
        registry: deps.registry,
        entry: deps.entry,
        bus: deps.bus,
        telemetry,
        store: Store::new(&settings.data_dir),
        roster: Roster::default(),
        mirror: StateMirror::new(),
        coordinator,
        last_device_ids: BTreeSet::new(),
    };
    tokio::spawn(bridge.run(commands, inbound, fired_rx, shutdown));
}

impl Bridge {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut inbound: mpsc::Receiver<InboundMessage>,
        mut fired: mpsc::Receiver<TimerKind>,
        shutdown: CancellationToken,
    ) {
        // Subscribe before startup so nothing emitted during it is missed
        let mut hub_changes = self.hub.subscribe();
        let mut entry_updates = self.entry.subscribe();
        let mut hub_open = true;
        let mut entry_open = true;

        self.startup().await;
        info!("Bridge started ({} devices)", self.roster.len());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Bridge shutting down");
                    break;
                }
                Some(cmd) = commands.recv() => self.handle_command(cmd).await,
                Some(msg) = inbound.recv() => self.handle_inbound(msg).await,
                Some(kind) = fired.recv() => self.on_timer(kind).await,
                change = hub_changes.recv(), if hub_open => match change {
                    Ok(change) => self.on_state_changed(change).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("mirror lagged {} state changes, resyncing", n);
                        self.publish_snapshot().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => hub_open = false,
                },
                update = entry_updates.recv(), if entry_open => match update {
                    Ok(update) => self.on_entry_update(update).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("missed {} entry updates", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => entry_open = false,
                },
            }
        }
        self.coordinator.cancel_all();
    }

    async fn startup(&mut self) {
        self.store.load();
        let entry = self.entry.snapshot().await;
        if self.store.profiles().is_empty() {
            let initial = if entry.data.profiles.is_empty() {
                entry.options.profiles.clone()
            } else {
                entry.data.profiles.clone()
            };
            if !initial.is_empty() {
                info!("seeding store with {} profiles from entry", initial.len());
                self.store.persist_profiles(initial);
            }
        }

        self.roster = Roster::new(entry.options.devices.clone());
        self.last_device_ids = self.roster.ids();
        for id in &self.last_device_ids {
            self.registry.register(id, id);
        }
        if entry.options.profiles != *self.store.profiles() {
            self.mirror_profiles().await;
        }

        self.publish_all_configs().await;
        self.retrack_mirror(&entry.options.mirror_entities).await;
        self.publish_snapshot().await;
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::ResolveHello { hello, reply } => {
                let outcome = self.resolve_hello(hello).await;
                respond(reply, outcome);
            }
            Command::Schedule { kind, reason } => {
                self.coordinator.schedule(kind, &reason);
            }
            Command::GetDeviceSettings { device_id, reply } => {
                respond(reply, self.store.get_device_settings(&device_id));
            }
            Command::UpdateDeviceSettings {
                device_id,
                patch,
                reply,
            } => {
                let merged = self.update_device_settings(&device_id, &patch.clamped());
                respond(reply, merged);
            }
            Command::PublishDeviceSettings {
                device_id,
                patch,
                reply,
            } => {
                let merged = self.publish_device_settings(&device_id, patch).await;
                respond(reply, merged);
            }
            Command::PublishDeviceAction {
                device_id,
                action,
                reply,
            } => {
                self.publish_device_action(&device_id, &action).await;
                respond(reply, ());
            }
            Command::PublishAllConfigs { reply } => {
                let count = self.publish_all_configs().await;
                respond(reply, count);
            }
            Command::PublishDeviceConfig { device_id, reply } => {
                let result = self.publish_device_config(&device_id).await;
                respond(reply, result);
            }
            Command::DumpDeviceConfig { device_id, reply } => {
                respond(reply, self.dump_device_config(&device_id));
            }
            Command::PurgeDevice { device_id, reply } => {
                let known = self.purge_device(&device_id).await;
                respond(reply, known);
            }
            Command::RenameDevice {
                old_id,
                new_id,
                reply,
            } => {
                self.rename_device(&old_id, &new_id).await;
                respond(reply, ());
            }
            Command::PruneUnassigned { reply } => {
                let removed = self.prune_unassigned().await;
                respond(reply, removed);
            }
            Command::SetDeviceProfile {
                device_id,
                profile,
                reply,
            } => {
                let result = self.set_device_profile(&device_id, profile).await;
                respond(reply, result);
            }
            Command::SendNotification {
                device_id,
                message,
                title,
                reply,
            } => {
                let result = self
                    .send_notification(&device_id, &message, title.as_deref())
                    .await;
                respond(reply, result);
            }
            Command::PublishSnapshot { reply } => {
                let count = self.publish_snapshot().await;
                respond(reply, count);
            }
            Command::Devices { reply } => respond(reply, self.roster.devices().to_vec()),
            Command::Profiles { reply } => respond(reply, self.store.profiles().clone()),
        }
    }

    // ---------- inbound ----------

    async fn handle_inbound(&mut self, msg: InboundMessage) {
        let Some(kind) = InboundTopic::parse(&msg.topic) else {
            debug!("ignoring message on {}", msg.topic);
            return;
        };
        match kind {
            InboundTopic::Hello { device_id } => {
                match Hello::parse(&msg.topic, &device_id, &msg.payload) {
                    Ok(Some(hello)) => {
                        self.resolve_hello(hello).await;
                    }
                    Ok(None) => debug!("device_hello: cleared hello for {}", device_id),
                    Err(e) => warn!("{}", e),
                }
            }
            InboundTopic::Request { device_id } => {
                match DeviceRequest::parse(&msg.topic, &msg.payload) {
                    Ok(Some(DeviceRequest::Snapshot)) => {
                        debug!("device_request: snapshot requested by {}", device_id);
                        self.publish_snapshot().await;
                    }
                    Ok(Some(DeviceRequest::Onboard { guid })) => {
                        self.onboard(&device_id, guid.as_deref()).await;
                    }
                    Ok(None) => {}
                    Err(e) => warn!("{}", e),
                }
            }
            InboundTopic::Telemetry { device_id, key } => {
                if self.telemetry.record(&device_id, &key, &msg.payload).await {
                    self.bus.publish(BusEvent::TelemetryUpdated { device_id, key });
                } else {
                    debug!("device_telemetry: ignored {} = {:?}", msg.topic, msg.payload);
                }
            }
            InboundTopic::EntityCommand { entity_id } => {
                self.handle_entity_command(&entity_id, &msg.payload).await;
            }
            InboundTopic::AdminCommand => match AdminCommand::parse(&msg.payload) {
                Ok(Some(AdminCommand::Rename { old_id, new_id })) => {
                    self.rename_device(&old_id, &new_id).await;
                }
                Ok(Some(AdminCommand::PurgeDevice { device_id })) => {
                    self.purge_device(&device_id).await;
                }
                Ok(Some(AdminCommand::PublishConfig)) => {
                    self.publish_all_configs().await;
                }
                Ok(Some(AdminCommand::Snapshot)) => {
                    self.publish_snapshot().await;
                }
                Ok(None) => debug!("admin command ignored: {}", msg.payload),
                Err(e) => warn!("{}", e),
            },
        }
    }

    async fn handle_entity_command(&self, entity_id: &str, payload: &str) {
        let call = match map_entity_command(entity_id, payload) {
            Ok(Some(call)) => call,
            Ok(None) => {
                debug!("command for {} has no service mapping: {}", entity_id, payload);
                return;
            }
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };
        match self.hub.get_state(entity_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!("Command for unknown entity {}: {}", entity_id, payload);
                return;
            }
            Err(e) => {
                warn!("Command for {} dropped, state lookup failed: {}", entity_id, e);
                return;
            }
        }
        debug!("Calling service {} with {:?}", call, call.data);
        if let Err(e) = self.hub.call_service(&call).await {
            warn!("Service call {} for {} failed: {}", call, entity_id, e);
        }
    }

    async fn onboard(&mut self, device_id: &str, guid: Option<&str>) {
        info!("device_request: onboard {} (guid={})", device_id, guid.unwrap_or(""));
        self.store.remove_purged(Some(device_id), guid);
        if self.roster.ensure(device_id, guid) {
            self.save_devices().await;
            self.registry.register(device_id, device_id);
            self.coordinator.schedule_entry_reload("onboard_new_device");
            self.bus.publish(BusEvent::DeviceRegistered {
                device_id: device_id.to_string(),
            });
        }
        self.publish_all_configs().await;
        self.publish_online(device_id).await;
        self.republish_settings(device_id).await;
    }

    // ---------- identity ----------

    async fn resolve_hello(&mut self, hello: Hello) -> HelloOutcome {
        let outcome = self.roster.resolve_hello(&hello, &self.store);
        let device_id = hello.device_id.as_str();
        match &outcome.action {
            HelloAction::Reject => return outcome,
            HelloAction::Renamed { old_id } => {
                let placeholder = self.entry.options().await.placeholder_on_remove;
                // old id must be gone before the new one is configured
                self.purge_retained(old_id, placeholder).await;
                self.save_devices().await;
                self.publish_all_configs().await;
                self.coordinator.schedule_republish_reload("hello_rename");
                self.coordinator.schedule_entry_reload("hello_rename");
                self.migrate_registry(old_id, device_id);
                self.telemetry.rename(old_id, device_id).await;
                self.bus.publish(BusEvent::DeviceRenamed {
                    old_id: old_id.clone(),
                    new_id: device_id.to_string(),
                });
            }
            HelloAction::Registered => {
                self.save_devices().await;
                self.publish_all_configs().await;
                self.registry.register(device_id, device_id);
                self.coordinator.schedule_entry_reload("hello_new_device");
                self.bus.publish(BusEvent::DeviceRegistered {
                    device_id: device_id.to_string(),
                });
            }
            HelloAction::Known => {
                if outcome.roster_changed {
                    self.save_devices().await;
                }
                if outcome.screen_changed {
                    self.coordinator
                        .schedule_republish_reload("hello_screen_changed");
                }
            }
        }
        self.publish_online(device_id).await;
        self.republish_settings(device_id).await;
        outcome
    }

    fn migrate_registry(&self, old_id: &str, new_id: &str) {
        match self.registry.migrate_identifier(old_id, new_id) {
            Migration::Migrated => debug!("registry: {} now {}", old_id, new_id),
            Migration::NameOnly => {
                info!("registry: {} already has entities; renamed {} only", new_id, old_id)
            }
            Migration::Skipped => debug!("registry: nothing registered for {}", old_id),
        }
    }

    /// Persist the roster to the entry record (internal origin)
    async fn save_devices(&mut self) {
        let mut devices = dedupe_devices(self.roster.devices().to_vec());
        relink_profiles(&mut devices, self.store.profiles());
        let before = self.roster.len();
        self.roster = Roster::new(devices.clone());
        self.last_device_ids = self.roster.ids();

        let mut options = self.entry.options().await;
        options.devices = devices;
        debug!("save_devices: {} -> {} records", before, options.devices.len());
        if let Err(e) = self.entry.replace_options(options, Origin::Internal).await {
            error!("save_devices: {}", e);
        }
    }

    /// Copy the canonical profiles into the entry record for display
    async fn mirror_profiles(&self) {
        let mut options = self.entry.options().await;
        options.profiles = self.store.profiles().clone();
        if let Err(e) = self.entry.replace_options(options, Origin::Internal).await {
            error!("mirror to options failed: {}", e);
        }
    }

    // ---------- retained config ----------

    async fn publish_config(&self, doc: &ConfigDocument) -> bool {
        let payload = match doc.to_payload() {
            Ok(p) => p,
            Err(e) => {
                warn!("config JSON encode failed for {}: {}", doc.device_id, e);
                return false;
            }
        };
        let topic = topics::config(&doc.device_id);
        let hash = hex::encode(Sha256::digest(payload.as_bytes()));
        debug!(
            "publish_config: {} bytes={} hash={}",
            topic,
            payload.len(),
            &hash[..12]
        );
        publish_logged(&*self.transport, &topic, &payload, true).await;
        true
    }

    async fn publish_all_configs(&self) -> usize {
        let mut count = 0;
        for device in self.roster.devices() {
            if device.device_id.trim().is_empty() {
                continue;
            }
            let doc = synth::build_config(device, self.store.profiles());
            if self.publish_config(&doc).await {
                count += 1;
            }
        }
        debug!("published {} config(s)", count);
        count
    }

    async fn publish_device_config(&self, device_id: &str) -> Result<()> {
        let device = self
            .roster
            .get(device_id)
            .ok_or_else(|| BridgeError::UnknownDevice(device_id.to_string()))?;
        let doc = synth::build_config(device, self.store.profiles());
        self.publish_config(&doc).await;
        Ok(())
    }

    fn dump_device_config(&self, device_id: &str) -> Result<ConfigDocument> {
        let Some(device) = self.roster.get(device_id) else {
            warn!("dump_device_config: device {} not found", device_id);
            return Err(BridgeError::UnknownDevice(device_id.to_string()));
        };
        let doc = synth::build_config(device, self.store.profiles());
        match serde_json::to_string_pretty(&doc) {
            Ok(pretty) => info!("dump_device_config({}): {}", device_id, pretty),
            Err(e) => warn!("dump_device_config({}): {}", device_id, e),
        }
        Ok(doc)
    }

    /// Clear every retained topic of `device_id`, optionally leaving an
    /// unassigned placeholder config behind.
    async fn purge_retained(&self, device_id: &str, placeholder: bool) {
        let retained = topics::retained_device_topics(device_id);
        debug!("purge_device_retained: clearing {} topics for {}", retained.len(), device_id);
        for topic in &retained {
            publish_logged(&*self.transport, topic, "", true).await;
        }
        if placeholder {
            self.publish_config(&synth::placeholder_config(device_id)).await;
        }
    }

    async fn publish_online(&self, device_id: &str) {
        publish_logged(&*self.transport, &topics::status(device_id), "online", true).await;
    }

    // ---------- settings ----------

    fn update_device_settings(&mut self, device_id: &str, patch: &DeviceSettings) -> DeviceSettings {
        let merged = self.store.update_device_settings(device_id, patch);
        self.bus.publish(BusEvent::DeviceSettingsUpdated {
            device_id: device_id.to_string(),
            settings: merged.clone(),
        });
        merged
    }

    async fn publish_device_settings(
        &mut self,
        device_id: &str,
        patch: DeviceSettings,
    ) -> Option<DeviceSettings> {
        let patch = patch.clamped();
        if device_id.is_empty() || patch.is_empty() {
            return None;
        }
        let payload = match serde_json::to_string(&patch) {
            Ok(p) => p,
            Err(e) => {
                warn!("publish_device_settings: {}", e);
                return None;
            }
        };
        let topic = topics::settings(device_id);
        debug!("publish_device_settings: {} payload={}", topic, payload);
        publish_logged(&*self.transport, &topic, &payload, true).await;
        Some(self.update_device_settings(device_id, &patch))
    }

    /// Re-send stored settings so a reconnecting device picks them up
    async fn republish_settings(&self, device_id: &str) {
        let current = self.store.get_device_settings(device_id);
        if current.is_empty() {
            return;
        }
        match serde_json::to_string(&current) {
            Ok(payload) => {
                publish_logged(&*self.transport, &topics::settings(device_id), &payload, true)
                    .await;
                self.bus.publish(BusEvent::DeviceSettingsUpdated {
                    device_id: device_id.to_string(),
                    settings: current,
                });
            }
            Err(e) => debug!("settings republish skipped for {}: {}", device_id, e),
        }
    }

    async fn publish_device_action(&self, device_id: &str, action: &str) {
        if device_id.is_empty() || action.is_empty() {
            return;
        }
        let payload = json!({ "action": action }).to_string();
        debug!("publish_device_action: {} action={}", device_id, action);
        publish_logged(&*self.transport, &topics::request(device_id), &payload, false).await;
        // non-retained so a reconnect never replays a stale action
        publish_logged(&*self.transport, &topics::settings(device_id), &payload, false).await;
    }

    // ---------- maintenance ----------

    async fn purge_device(&mut self, device_id: &str) -> bool {
        info!("purge_device: {}", device_id);
        self.purge_retained(device_id, false).await;

        let offboard = json!({ "action": "offboard" }).to_string();
        publish_logged(&*self.transport, &topics::request(device_id), &offboard, false).await;
        publish_logged(&*self.transport, &topics::settings(device_id), &offboard, true).await;

        let removed = self.roster.remove(device_id);
        self.save_devices().await;
        if self.registry.remove(device_id).is_none() {
            debug!("purge_device: {} was not in the registry", device_id);
        }
        self.store.remove_device_settings(device_id);
        let guid = removed.as_ref().and_then(|r| r.guid());
        self.store.add_purged(Some(device_id), guid);
        self.telemetry.remove(device_id).await;
        self.coordinator.schedule_entry_reload("device_purged");
        self.bus.publish(BusEvent::DevicePurged {
            device_id: device_id.to_string(),
        });
        removed.is_some()
    }

    async fn rename_device(&mut self, old_id: &str, new_id: &str) {
        let (old_id, new_id) = (old_id.trim(), new_id.trim());
        if old_id.is_empty() || new_id.is_empty() || old_id == new_id {
            return;
        }
        info!("rename_device: {} -> {}", old_id, new_id);
        if !self.roster.rename(old_id, new_id) {
            debug!("rename_device: {} unknown, created blank {}", old_id, new_id);
        }

        let mut profiles = self.store.profiles().clone();
        if !profiles.contains_key(new_id) {
            if let Some(profile) = profiles.remove(old_id) {
                profiles.insert(new_id.to_string(), profile);
                self.store.persist_profiles(profiles);
                self.mirror_profiles().await;
            }
        }
        self.save_devices().await;

        let placeholder = self.entry.options().await.placeholder_on_remove;
        self.purge_retained(old_id, placeholder).await;
        self.publish_all_configs().await;
        self.migrate_registry(old_id, new_id);
        self.telemetry.rename(old_id, new_id).await;

        let payload = json!({ "action": "rename", "old": old_id, "new": new_id }).to_string();
        publish_logged(&*self.transport, &topics::request(old_id), &payload, false).await;
        self.coordinator.schedule_entry_reload("device_renamed");
        self.bus.publish(BusEvent::DeviceRenamed {
            old_id: old_id.to_string(),
            new_id: new_id.to_string(),
        });
    }

    async fn prune_unassigned(&mut self) -> Vec<String> {
        let removed = self.roster.prune_unassigned();
        if !removed.is_empty() {
            debug!("pruning {} unassigned device(s): {:?}", removed.len(), removed);
            for device_id in &removed {
                self.purge_retained(device_id, true).await;
            }
            self.coordinator.schedule_entry_reload("prune_unassigned");
        }
        self.save_devices().await;
        self.publish_all_configs().await;
        removed
    }

    async fn set_device_profile(&mut self, device_id: &str, profile: Value) -> Result<()> {
        if self.roster.get(device_id).is_none() {
            return Err(BridgeError::UnknownDevice(device_id.to_string()));
        }
        synth::validate_layout(&profile)?;
        let mut profiles = self.store.profiles().clone();
        profiles.insert(device_id.to_string(), profile);
        self.store.persist_profiles(profiles);
        self.mirror_profiles().await;
        self.coordinator.schedule_republish_reload("profile_updated");
        Ok(())
    }

    async fn send_notification(
        &self,
        device_id: &str,
        message: &str,
        title: Option<&str>,
    ) -> Result<()> {
        let topic = topics::notify(device_id);
        if device_id.trim().is_empty() {
            return Err(BridgeError::malformed(topic, "missing device_id"));
        }
        if message.trim().is_empty() {
            return Err(BridgeError::malformed(topic, "missing message"));
        }
        let mut payload = json!({ "message": message });
        if let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) {
            payload["title"] = Value::String(title.to_string());
        }
        self.transport
            .publish(&topic, &payload.to_string(), false)
            .await?;
        debug!("notify: published to {}", topic);
        Ok(())
    }

    // ---------- mirror ----------

    async fn publish_mirror(&self, publishes: Vec<MirrorPublish>) {
        for p in publishes {
            publish_logged(&*self.transport, &p.topic, &p.payload, true).await;
        }
    }

    async fn retrack_mirror(&mut self, entities: &[String]) {
        let tombstones = self.mirror.set_tracked(entities);
        self.publish_mirror(tombstones).await;
        let watched: Vec<String> = self.mirror.tracked().iter().cloned().collect();
        self.hub.watch(watched).await;
    }

    async fn publish_snapshot(&mut self) -> usize {
        let tracked: Vec<String> = self.mirror.tracked().iter().cloned().collect();
        let mut states = BTreeMap::new();
        for entity_id in tracked {
            match self.hub.get_state(&entity_id).await {
                Ok(Some(state)) => {
                    states.insert(entity_id, state);
                }
                Ok(None) => debug!("snapshot: {} not found", entity_id),
                Err(e) => warn!("snapshot: {} lookup failed: {}", entity_id, e),
            }
        }
        let publishes = self.mirror.snapshot(&states);
        let count = publishes.len();
        self.publish_mirror(publishes).await;
        count
    }

    async fn on_state_changed(&mut self, change: StateChanged) {
        let Some(state) = change.new_state else {
            return;
        };
        let publishes = self.mirror.on_state_changed(&state);
        self.publish_mirror(publishes).await;
    }

    // ---------- reactions ----------

    async fn on_entry_update(&mut self, update: EntryUpdate) {
        if update.origin == Origin::Internal {
            return;
        }
        // Roster saves may have landed since the broadcast; react to the
        // record as it is now so they are not reverted.
        let options = self.entry.options().await;
        if options.devices != update.options.devices {
            debug!("options_updated: roster moved on since the edit, using current record");
        }
        debug!(
            "options_updated: devices={} profiles={} mirror={}",
            options.devices.len(),
            options.profiles.len(),
            options.mirror_entities.len()
        );

        if !options.profiles.is_empty() && options.profiles != *self.store.profiles() {
            self.store.persist_profiles(options.profiles.clone());
        }

        let tombstones = self.mirror.set_tracked(&options.mirror_entities);
        self.publish_mirror(tombstones).await;

        self.roster = Roster::new(options.devices.clone());
        let current = self.roster.ids();
        let removed: Vec<String> = self.last_device_ids.difference(&current).cloned().collect();
        let added = current.difference(&self.last_device_ids).next().is_some();
        for device_id in &removed {
            self.purge_retained(device_id, options.placeholder_on_remove).await;
        }
        if added || !removed.is_empty() {
            self.coordinator.schedule_entry_reload("options_devices_changed");
        }
        self.last_device_ids = current;

        let profiles = self.store.profiles().clone();
        let remaining = self.store.prune_unused_profiles(profiles, self.roster.devices());
        let mut mirrored = options;
        mirrored.profiles = remaining;
        if let Err(e) = self.entry.replace_options(mirrored, Origin::Internal).await {
            error!("mirror to options failed: {}", e);
        }

        let watched: Vec<String> = self.mirror.tracked().iter().cloned().collect();
        self.hub.watch(watched).await;
        self.coordinator.schedule_republish_reload("options_updated");
    }

    async fn on_timer(&mut self, kind: TimerKind) {
        let Some(reasons) = self.coordinator.take_fired(kind) else {
            debug!("stale {:?} notification", kind);
            return;
        };
        match kind {
            TimerKind::RepublishReload => self.republish_reload(&reasons).await,
            TimerKind::EntryReload => self.entry_reload(&reasons),
        }
    }

    /// Reload the store, tell every device to reload, then publish fresh
    /// configs so the reload is seen first.
    async fn republish_reload(&mut self, reasons: &[String]) {
        self.store.load();
        let ids = self.roster.ids();
        for device_id in &ids {
            self.publish_device_action(device_id, "reload").await;
        }
        let count = self.publish_all_configs().await;
        debug!("republish_reload: completed for {} device(s) ({:?})", ids.len(), reasons);
        self.bus.publish(BusEvent::ConfigsPublished { count });
    }

    /// Bring the registry in line with the roster and tell adapters
    fn entry_reload(&mut self, reasons: &[String]) {
        let ids = self.roster.ids();
        for device_id in &ids {
            if self.registry.register(device_id, device_id) {
                debug!("registry: added {}", device_id);
            }
        }
        for stale in self.registry.identifiers() {
            if !ids.contains(&stale) && self.registry.remove(&stale).is_some() {
                debug!("registry: removed {}", stale);
            }
        }
        debug!("entry reloaded ({:?})", reasons);
        self.bus.publish(BusEvent::EntryReloaded {
            device_ids: ids.into_iter().collect(),
        });
    }
}
