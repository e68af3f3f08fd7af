//! mqttdash bridge
//!
//! Connects MQTT dashboard-display devices to a home-automation hub.

use mqttdash_bridge::{bridge, bus, config, entry, hub, registry, transport};

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mqttdash_bridge=debug,rumqttc=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting mqttdash bridge v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = config::load_config()?;
    let data_dir = config::get_data_dir();
    tracing::info!(
        "Configuration loaded, broker: {}:{}, data: {}",
        config.mqtt.host,
        config.mqtt.port,
        data_dir.display()
    );

    let shutdown = CancellationToken::new();
    let bus = bus::create_bus();

    // Hub: REST with a state poller, or a static hub when none is configured
    let hub: hub::SharedHub = match &config.hub {
        Some(hub_config) => {
            let rest = hub::RestHub::new(hub_config)?;
            rest.start_poller(shutdown.child_token());
            tracing::info!("Hub client configured for {}", hub_config.url);
            Arc::new(rest)
        }
        None => {
            tracing::warn!("No hub configured; mirror is empty and commands are only logged");
            Arc::new(hub::StaticHub::new())
        }
    };

    let (inbound_tx, inbound_rx) = mpsc::channel(transport::INBOUND_CAPACITY);
    let mqtt = Arc::new(transport::MqttTransport::start(
        &config.mqtt,
        inbound_tx,
        shutdown.child_token(),
    ));

    let deps = bridge::BridgeDeps {
        transport: mqtt.clone(),
        hub,
        registry: Arc::new(registry::InMemoryRegistry::new()),
        entry: entry::EntryStore::open(&data_dir),
        bus,
    };
    let settings = bridge::BridgeSettings::from_config(&config, data_dir);
    let handle = bridge::spawn(deps, settings, inbound_rx, shutdown.child_token());
    tracing::info!("Bridge task started");

    shutdown_signal().await;

    tracing::info!("Shutting down...");
    shutdown.cancel();
    mqtt.stop().await;
    drop(handle);
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
