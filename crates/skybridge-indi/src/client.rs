//! Async INDI client session.
//!
//! [`IndiSession`] owns a supervisor task that connects to the INDI server,
//! requests every property, feeds an in-memory device store from the inbound
//! message stream, and reconnects forever with capped exponential backoff.
//! The bridge core consumes it through the [`ProtocolClient`] trait so tests
//! can substitute a mock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::property::{Device, PropertyElements, PropertyKind, PropertyVector};
use crate::wire::{self, ElementUpdate, ServerMessage, WireReader};

const RECONNECT_MIN: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(60);

const DRIVER_INFO: &str = "DRIVER_INFO";
const DRIVER_INTERFACE: &str = "DRIVER_INTERFACE";

/// Errors surfaced by the client session.
#[derive(Debug, thiserror::Error)]
pub enum IndiError {
    /// No live connection to the INDI server.
    #[error("not connected to INDI server")]
    NotConnected,

    /// A submission targeted a vector of the wrong kind.
    #[error("property {device}.{name} is not a {expected} vector")]
    KindMismatch {
        device: String,
        name: String,
        expected: PropertyKind,
    },

    /// I/O error on the server socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// INDI server endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndiConfig {
    /// Server host.
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    7624
}

impl Default for IndiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Session-level events, fanned out to any number of observers.
#[derive(Debug, Clone)]
pub enum IndiEvent {
    Connected,
    Disconnected,
    DeviceDefined(String),
    PropertyDefined { device: String, name: String },
    PropertyUpdated { device: String, name: String },
    PropertyRemoved {
        device: String,
        name: Option<String>,
    },
    ServerMessage {
        device: Option<String>,
        text: String,
    },
}

/// The protocol-side interface the bridge core consumes.
///
/// Lookups return `None` when the device or property is absent (or of the
/// wrong kind); callers skip the operation instead of failing. Submissions
/// send the whole vector as one atomic update and fail fast when there is no
/// live connection.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Snapshot of every device the server currently exposes.
    async fn devices(&self) -> Vec<Device>;

    /// Fetch a switch vector by device and property name.
    async fn switch_vector(&self, device: &str, name: &str) -> Option<PropertyVector>;

    /// Fetch a number vector by device and property name.
    async fn number_vector(&self, device: &str, name: &str) -> Option<PropertyVector>;

    /// Submit a switch vector update.
    async fn send_switch(&self, vector: &PropertyVector) -> Result<(), IndiError>;

    /// Submit a number vector update.
    async fn send_number(&self, vector: &PropertyVector) -> Result<(), IndiError>;
}

/// In-memory mirror of the server's device and property graph.
#[derive(Debug, Default)]
struct DeviceStore {
    devices: BTreeMap<String, Device>,
}

impl DeviceStore {
    fn apply(&mut self, message: ServerMessage) -> Vec<IndiEvent> {
        match message {
            ServerMessage::Define(vector) => {
                let mut events = Vec::new();
                let device = self
                    .devices
                    .entry(vector.device.clone())
                    .or_insert_with(|| {
                        events.push(IndiEvent::DeviceDefined(vector.device.clone()));
                        Device::new(vector.device.clone())
                    });
                events.push(IndiEvent::PropertyDefined {
                    device: vector.device.clone(),
                    name: vector.name.clone(),
                });
                device.properties.insert(vector.name.clone(), vector);
                refresh_interface(device);
                events
            }
            ServerMessage::Update(update) => {
                let Some(device) = self.devices.get_mut(&update.device) else {
                    debug!("update for unknown device {}", update.device);
                    return Vec::new();
                };
                {
                    let Some(vector) = device.properties.get_mut(&update.name) else {
                        debug!("update for unknown property {}.{}", update.device, update.name);
                        return Vec::new();
                    };
                    if let Some(state) = update.state {
                        vector.state = state;
                    }
                    for element in update.elements {
                        apply_element(vector, element);
                    }
                }
                if update.name == DRIVER_INFO {
                    refresh_interface(device);
                }
                vec![IndiEvent::PropertyUpdated {
                    device: update.device,
                    name: update.name,
                }]
            }
            ServerMessage::Delete { device, property } => {
                match &property {
                    Some(name) => {
                        if let Some(entry) = self.devices.get_mut(&device) {
                            entry.properties.remove(name);
                        }
                    }
                    None => {
                        self.devices.remove(&device);
                    }
                }
                vec![IndiEvent::PropertyRemoved {
                    device,
                    name: property,
                }]
            }
            ServerMessage::Message { .. } => Vec::new(),
        }
    }
}

/// Update one element in place, matched by name within the same kind.
fn apply_element(vector: &mut PropertyVector, update: ElementUpdate) {
    match (&mut vector.elements, update) {
        (PropertyElements::Text(items), ElementUpdate::Text { name, value }) => {
            if let Some(item) = items.iter_mut().find(|i| i.name == name) {
                item.value = value;
            }
        }
        (PropertyElements::Number(items), ElementUpdate::Number { name, value }) => {
            if let Some(item) = items.iter_mut().find(|i| i.name == name) {
                item.value = value;
            }
        }
        (PropertyElements::Switch(items), ElementUpdate::Switch { name, state }) => {
            if let Some(item) = items.iter_mut().find(|i| i.name == name) {
                item.state = state;
            }
        }
        (PropertyElements::Light(items), ElementUpdate::Light { name, state }) => {
            if let Some(item) = items.iter_mut().find(|i| i.name == name) {
                item.state = state;
            }
        }
        (PropertyElements::Blob(items), ElementUpdate::Blob { name, size }) => {
            if let Some(item) = items.iter_mut().find(|i| i.name == name) {
                item.size = size;
            }
        }
        _ => {}
    }
}

/// Re-derive the device's interface bitmask from `DRIVER_INFO.DRIVER_INTERFACE`.
fn refresh_interface(device: &mut Device) {
    let Some(vector) = device.properties.get(DRIVER_INFO) else {
        return;
    };
    let PropertyElements::Text(items) = &vector.elements else {
        return;
    };
    if let Some(item) = items.iter().find(|i| i.name == DRIVER_INTERFACE) {
        if let Ok(mask) = item.value.trim().parse::<u32>() {
            device.interface = mask;
        }
    }
}

/// A live INDI client session.
pub struct IndiSession {
    config: IndiConfig,
    store: Arc<RwLock<DeviceStore>>,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    events: broadcast::Sender<IndiEvent>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IndiSession {
    /// Spawn the session supervisor. Returns immediately; the supervisor
    /// keeps retrying the server forever with capped backoff.
    pub fn connect(config: IndiConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let store: Arc<RwLock<DeviceStore>> = Arc::default();
        let writer: Arc<Mutex<Option<OwnedWriteHalf>>> = Arc::default();

        let handle = tokio::spawn(run_session(
            config.clone(),
            store.clone(),
            writer.clone(),
            events.clone(),
            shutdown_rx,
        ));

        Arc::new(Self {
            config,
            store,
            writer,
            events,
            shutdown_tx,
            task: Mutex::new(Some(handle)),
        })
    }

    /// Subscribe to the session event feed.
    pub fn subscribe(&self) -> broadcast::Receiver<IndiEvent> {
        self.events.subscribe()
    }

    /// Stop the supervisor and drop the connection.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        *self.writer.lock().await = None;
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
        info!(
            "Disconnected from INDI server {}:{}",
            self.config.host, self.config.port
        );
    }

    async fn vector(&self, device: &str, name: &str, kind: PropertyKind) -> Option<PropertyVector> {
        let store = self.store.read().await;
        store
            .devices
            .get(device)?
            .properties
            .get(name)
            .filter(|v| v.kind() == kind)
            .cloned()
    }

    async fn write(&self, payload: String) -> Result<(), IndiError> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(IndiError::NotConnected);
        };
        writer.write_all(payload.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ProtocolClient for IndiSession {
    async fn devices(&self) -> Vec<Device> {
        self.store.read().await.devices.values().cloned().collect()
    }

    async fn switch_vector(&self, device: &str, name: &str) -> Option<PropertyVector> {
        self.vector(device, name, PropertyKind::Switch).await
    }

    async fn number_vector(&self, device: &str, name: &str) -> Option<PropertyVector> {
        self.vector(device, name, PropertyKind::Number).await
    }

    async fn send_switch(&self, vector: &PropertyVector) -> Result<(), IndiError> {
        let Some(switches) = vector.switches() else {
            return Err(IndiError::KindMismatch {
                device: vector.device.clone(),
                name: vector.name.clone(),
                expected: PropertyKind::Switch,
            });
        };
        self.write(wire::new_switch_vector(&vector.device, &vector.name, switches))
            .await
    }

    async fn send_number(&self, vector: &PropertyVector) -> Result<(), IndiError> {
        let Some(numbers) = vector.numbers() else {
            return Err(IndiError::KindMismatch {
                device: vector.device.clone(),
                name: vector.name.clone(),
                expected: PropertyKind::Number,
            });
        };
        self.write(wire::new_number_vector(&vector.device, &vector.name, numbers))
            .await
    }
}

/// Supervisor: connect, serve, clear, back off, repeat until shutdown.
async fn run_session(
    config: IndiConfig,
    store: Arc<RwLock<DeviceStore>>,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    events: broadcast::Sender<IndiEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut delay = RECONNECT_MIN;
    loop {
        if *shutdown.borrow() {
            return;
        }
        match TcpStream::connect((config.host.as_str(), config.port)).await {
            Ok(stream) => {
                info!("Connected to INDI server {}:{}", config.host, config.port);
                delay = RECONNECT_MIN;
                let (read_half, write_half) = stream.into_split();
                let stopped =
                    serve_connection(read_half, write_half, &store, &writer, &events, &mut shutdown)
                        .await;
                store.write().await.devices.clear();
                let _ = events.send(IndiEvent::Disconnected);
                if stopped {
                    return;
                }
                warn!(
                    "Lost connection to INDI server {}:{}; reconnecting",
                    config.host, config.port
                );
            }
            Err(e) => {
                debug!(
                    "INDI server {}:{} not available: {}; retrying in {}s",
                    config.host,
                    config.port,
                    e,
                    delay.as_secs()
                );
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return,
        }
        delay = (delay * 2).min(RECONNECT_MAX);
    }
}

/// Serve one established connection until it drops or shutdown is requested.
/// Returns true when shutdown ended the loop.
async fn serve_connection(
    mut read_half: OwnedReadHalf,
    mut write_half: OwnedWriteHalf,
    store: &Arc<RwLock<DeviceStore>>,
    writer: &Arc<Mutex<Option<OwnedWriteHalf>>>,
    events: &broadcast::Sender<IndiEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    if let Err(e) = write_half.write_all(wire::get_properties().as_bytes()).await {
        warn!("Failed to request properties: {}", e);
        return false;
    }
    *writer.lock().await = Some(write_half);
    let _ = events.send(IndiEvent::Connected);

    let mut reader = WireReader::new();
    let mut chunk = [0u8; 8192];
    let stopped = loop {
        tokio::select! {
            result = read_half.read(&mut chunk) => {
                match result {
                    Ok(0) => break false,
                    Ok(n) => {
                        reader.extend(&chunk[..n]);
                        while let Some(message) = reader.next_message() {
                            match message {
                                ServerMessage::Message { device, text } => {
                                    debug!(
                                        "INDI message from {}: {}",
                                        device.as_deref().unwrap_or("server"),
                                        text
                                    );
                                    let _ = events.send(IndiEvent::ServerMessage { device, text });
                                }
                                other => {
                                    for event in store.write().await.apply(other) {
                                        let _ = events.send(event);
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!("INDI read error: {}", e);
                        break false;
                    }
                }
            }
            _ = shutdown.changed() => break true,
        }
    };
    *writer.lock().await = None;
    stopped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::SwitchState;

    fn messages(xml: &str) -> Vec<ServerMessage> {
        let mut reader = WireReader::new();
        reader.extend(xml.as_bytes());
        let mut out = Vec::new();
        while let Some(message) = reader.next_message() {
            out.push(message);
        }
        out
    }

    fn seeded_store() -> DeviceStore {
        let mut store = DeviceStore::default();
        for message in messages(
            "<defSwitchVector device=\"Scope\" name=\"TELESCOPE_PARK\" state=\"Idle\" perm=\"rw\">\
             <defSwitch name=\"PARK\">On</defSwitch>\
             <defSwitch name=\"UNPARK\">Off</defSwitch>\
             </defSwitchVector>\
             <defTextVector device=\"Scope\" name=\"DRIVER_INFO\" state=\"Idle\" perm=\"ro\">\
             <defText name=\"DRIVER_INTERFACE\">5</defText>\
             </defTextVector>",
        ) {
            store.apply(message);
        }
        store
    }

    #[test]
    fn define_creates_device_and_interface() {
        let store = seeded_store();
        let device = store.devices.get("Scope").expect("device");
        assert_eq!(device.interface, 5);
        assert_eq!(device.properties.len(), 2);
        let park = device.property("TELESCOPE_PARK").expect("property");
        assert_eq!(park.switches().unwrap()[0].state, SwitchState::On);
    }

    #[test]
    fn update_changes_values_and_state() {
        let mut store = seeded_store();
        for message in messages(
            "<setSwitchVector device=\"Scope\" name=\"TELESCOPE_PARK\" state=\"Busy\">\
             <oneSwitch name=\"PARK\">Off</oneSwitch>\
             <oneSwitch name=\"UNPARK\">On</oneSwitch>\
             </setSwitchVector>",
        ) {
            store.apply(message);
        }
        let park = store.devices["Scope"].property("TELESCOPE_PARK").unwrap();
        assert_eq!(park.state, crate::property::PropertyState::Busy);
        let switches = park.switches().unwrap();
        assert_eq!(switches[0].state, SwitchState::Off);
        assert_eq!(switches[1].state, SwitchState::On);
    }

    #[test]
    fn update_for_unknown_targets_is_ignored() {
        let mut store = seeded_store();
        for message in messages(
            "<setSwitchVector device=\"Nope\" name=\"X\"><oneSwitch name=\"A\">On</oneSwitch></setSwitchVector>\
             <setNumberVector device=\"Scope\" name=\"MISSING\"><oneNumber name=\"A\">1</oneNumber></setNumberVector>",
        ) {
            assert!(store.apply(message).is_empty());
        }
    }

    #[test]
    fn driver_info_update_refreshes_interface() {
        let mut store = seeded_store();
        for message in messages(
            "<setTextVector device=\"Scope\" name=\"DRIVER_INFO\">\
             <oneText name=\"DRIVER_INTERFACE\">128</oneText>\
             </setTextVector>",
        ) {
            store.apply(message);
        }
        assert_eq!(store.devices["Scope"].interface, 128);
    }

    #[test]
    fn delete_removes_property_then_device() {
        let mut store = seeded_store();
        for message in messages("<delProperty device=\"Scope\" name=\"TELESCOPE_PARK\"/>") {
            store.apply(message);
        }
        assert!(store.devices["Scope"].property("TELESCOPE_PARK").is_none());
        for message in messages("<delProperty device=\"Scope\"/>") {
            store.apply(message);
        }
        assert!(store.devices.is_empty());
    }
}
