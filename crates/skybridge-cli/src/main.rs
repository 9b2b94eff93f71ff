//! Command-line entry point for the skybridge observatory bridge.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use skybridge_bridge::{BridgeConfig, BridgeService, MqttTransport};
use skybridge_indi::{IndiSession, ProtocolClient};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Bridge an INDI observatory bus to an MQTT broker.
#[derive(Parser, Debug)]
#[command(name = "skybridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// INDI server host.
    #[arg(long)]
    indi_host: Option<String>,

    /// INDI server port.
    #[arg(long)]
    indi_port: Option<u16>,

    /// MQTT broker host.
    #[arg(long)]
    mqtt_host: Option<String>,

    /// MQTT broker port.
    #[arg(long)]
    mqtt_port: Option<u16>,

    /// Topic root (upper-cased on the wire).
    #[arg(long)]
    topic_root: Option<String>,

    /// Seconds between snapshot publishes.
    #[arg(long)]
    polling: Option<u64>,

    /// Verbose output.
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(&self, config: &mut BridgeConfig) {
        if let Some(host) = &self.indi_host {
            config.indi.host = host.clone();
        }
        if let Some(port) = self.indi_port {
            config.indi.port = port;
        }
        if let Some(host) = &self.mqtt_host {
            config.mqtt.host = host.clone();
        }
        if let Some(port) = self.mqtt_port {
            config.mqtt.port = port;
        }
        if let Some(root) = &self.topic_root {
            config.bridge.topic_root = root.clone();
        }
        if let Some(polling) = self.polling {
            config.bridge.polling_secs = polling;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if args.verbose { "debug" } else { "info" };
        tracing_subscriber::EnvFilter::new(format!("skybridge={level}"))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = BridgeConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    info!(
        "Starting skybridge: INDI {}:{} -> MQTT {}:{} (topic root {})",
        config.indi.host,
        config.indi.port,
        config.mqtt.host,
        config.mqtt.port,
        config.bridge.topic_root.to_uppercase()
    );

    let session = IndiSession::connect(config.indi.clone());
    let client: Arc<dyn ProtocolClient> = session.clone();

    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::debug!("INDI event: {:?}", event);
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (command_tx, command_rx) = mpsc::channel(64);
    let transport = MqttTransport::connect(
        &config.mqtt,
        &config.bridge.topic_root,
        command_tx,
        shutdown_rx.clone(),
    );
    let worker = BridgeService::spawn_command_worker(client.clone(), command_rx);

    let service = BridgeService::new(client, transport.clone(), config.bridge.clone());

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = service.run(shutdown_rx.clone()) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupt received; shutting down"),
        _ = sigterm.recv() => info!("Termination signal received; shutting down"),
    }

    transport.disconnect().await;
    let _ = shutdown_tx.send(true);
    session.shutdown().await;
    let _ = worker.await;

    info!("Exiting. Good bye.");
    Ok(())
}
