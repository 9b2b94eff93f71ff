//! MQTT transport adapter.
//!
//! Thin publish/subscribe glue over rumqttc: snapshots go out on
//! `<ROOT>/json`, inbound payloads from `<ROOT>/command` are forwarded into
//! the command worker channel. The event loop runs in a spawned task;
//! rumqttc reconnects on its own, so the task's only jobs are re-issuing the
//! command subscription on every connection and draining inbound traffic.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::BridgeError;

/// MQTT broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker host.
    pub host: String,

    /// Broker port.
    pub port: u16,

    /// Client ID; generated when not provided.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Username for authentication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password for authentication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Keep-alive interval in seconds.
    pub keep_alive: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: None,
            username: None,
            password: None,
            keep_alive: 60,
        }
    }
}

impl MqttConfig {
    fn client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("skybridge-{}", Uuid::new_v4()))
    }
}

/// Handle for publishing snapshots and tearing the connection down.
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
    json_topic: String,
    host: String,
    port: u16,
}

impl MqttTransport {
    /// Build the client and spawn its event-loop task. Inbound command
    /// payloads are forwarded into `commands`; the task exits when `shutdown`
    /// fires or the worker side of the channel is gone.
    pub fn connect(
        config: &MqttConfig,
        topic_root: &str,
        commands: mpsc::Sender<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let root = topic_root.to_uppercase();
        let json_topic = format!("{}/json", root);
        let command_topic = format!("{}/command", root);

        let mut options = MqttOptions::new(config.client_id(), &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(options, 32);
        tokio::spawn(run_eventloop(
            eventloop,
            client.clone(),
            command_topic,
            commands,
            shutdown,
            config.host.clone(),
            config.port,
        ));

        Self {
            client,
            json_topic,
            host: config.host.clone(),
            port: config.port,
        }
    }

    /// Publish one snapshot document, compact JSON, fire-and-forget.
    pub async fn publish_snapshot(&self, document: &Value) -> Result<(), BridgeError> {
        let payload = serde_json::to_vec(document)?;
        self.client
            .publish(&self.json_topic, QoS::AtMostOnce, false, payload)
            .await?;
        debug!(
            "Snapshot published to {} on {}:{}",
            self.json_topic, self.host, self.port
        );
        Ok(())
    }

    /// Best-effort disconnect.
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("MQTT disconnect: {}", e);
        }
        info!("Disconnected from MQTT server {}:{}", self.host, self.port);
    }
}

async fn run_eventloop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    command_topic: String,
    commands: mpsc::Sender<String>,
    mut shutdown: watch::Receiver<bool>,
    host: String,
    port: u16,
) {
    loop {
        tokio::select! {
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to MQTT server {}:{}", host, port);
                    // Subscriptions do not survive a reconnect; re-issue on
                    // every ConnAck.
                    match client.subscribe(&command_topic, QoS::AtLeastOnce).await {
                        Ok(()) => info!("Subscribed to {} topic", command_topic),
                        Err(e) => warn!("Failed to subscribe to {}: {}", command_topic, e),
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if publish.topic == command_topic {
                        let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                        debug!("Command message received: {}", payload);
                        if commands.send(payload).await.is_err() {
                            return;
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("MQTT connection error on {}:{}: {}", host, port, e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            },
            _ = shutdown.changed() => return,
        }
    }
}
