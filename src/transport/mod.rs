//! Pub/sub transport
//!
//! The bridge only needs `publish(topic, payload, retain)`; inbound messages
//! arrive on a bounded channel fed by the transport's own event loop.

mod memory;

pub use memory::{MemoryTransport, Published};

use async_trait::async_trait;
use rand::Rng;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::MqttConfig;
use crate::error::{BridgeError, Result};
use crate::topics;

/// Capacity of the inbound message channel
pub const INBOUND_CAPACITY: usize = 256;

/// Message received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Fire-and-forget publish (QoS 0)
    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<()>;
}

pub type SharedTransport = Arc<dyn Transport>;

/// rumqttc-backed transport
pub struct MqttTransport {
    client: AsyncClient,
    shutdown: CancellationToken,
}

impl MqttTransport {
    /// Create the client and spawn its event loop. Subscriptions are
    /// (re)issued on every ConnAck; publishes are forwarded to `inbound`.
    pub fn start(
        config: &MqttConfig,
        inbound: mpsc::Sender<InboundMessage>,
        shutdown: CancellationToken,
    ) -> Self {
        // Random suffix so two bridges never kick each other off the broker
        let suffix: u16 = rand::thread_rng().gen();
        let client_id = format!("{}-{:04x}", config.client_id, suffix);
        let mut options = MqttOptions::new(client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 100);

        tracing::info!("MQTT connecting to {}:{}...", config.host, config.port);

        let loop_client = client.clone();
        let loop_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = loop_shutdown.cancelled() => {
                        tracing::info!("MQTT event loop shutting down");
                        break;
                    }
                    result = eventloop.poll() => {
                        match result {
                            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                                let msg = InboundMessage {
                                    topic: publish.topic.clone(),
                                    payload: String::from_utf8_lossy(&publish.payload).to_string(),
                                };
                                // Never block the event loop: publishes from the
                                // bridge drain through this same loop
                                match inbound.try_send(msg) {
                                    Ok(()) => {}
                                    Err(mpsc::error::TrySendError::Full(msg)) => {
                                        tracing::warn!("MQTT inbound queue full, dropping message on {}", msg.topic);
                                    }
                                    Err(mpsc::error::TrySendError::Closed(_)) => {
                                        tracing::info!("MQTT inbound receiver gone, stopping event loop");
                                        break;
                                    }
                                }
                            }
                            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                                tracing::info!("MQTT connected (code: {:?})", ack.code);
                                for pattern in topics::subscriptions() {
                                    if let Err(e) = loop_client.try_subscribe(&pattern, QoS::AtMostOnce) {
                                        tracing::error!("MQTT subscribe {} failed: {}", pattern, e);
                                    } else {
                                        tracing::debug!("MQTT subscribed to {}", pattern);
                                    }
                                }
                            }
                            Ok(Event::Incoming(Incoming::Disconnect)) => {
                                tracing::warn!("MQTT disconnected");
                            }
                            Err(e) => {
                                tracing::error!("MQTT error: {}", e);
                                // Check shutdown before sleeping
                                tokio::select! {
                                    _ = loop_shutdown.cancelled() => break,
                                    _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
        });

        Self { client, shutdown }
    }

    /// Stop MQTT connection
    pub async fn stop(&self) {
        // Cancel background tasks first
        self.shutdown.cancel();
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!("MQTT disconnect: {}", e);
        }
        tracing::info!("MQTT transport stopped");
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<()> {
        self.client
            .publish(topic, QoS::AtMostOnce, retain, payload.as_bytes().to_vec())
            .await
            .map_err(|e| BridgeError::publish(topic, e.to_string()))
    }
}

/// Publish and log instead of failing; retained state self-heals on the next cycle
pub async fn publish_logged(transport: &dyn Transport, topic: &str, payload: &str, retain: bool) {
    if let Err(e) = transport.publish(topic, payload, retain).await {
        tracing::warn!("{}", e);
    }
}
