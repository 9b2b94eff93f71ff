//! Command router integration tests against a mock protocol client.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use skybridge_bridge::service::BridgeService;
use skybridge_bridge::CommandRouter;
use skybridge_indi::{
    Device, IndiError, NumberElement, Permission, PropertyElements, PropertyKind, PropertyState,
    PropertyVector, ProtocolClient, SwitchElement, SwitchState,
};
use tokio::sync::{mpsc, Mutex};

/// In-memory protocol client recording every submitted vector.
#[derive(Default)]
struct MockClient {
    vectors: Mutex<HashMap<(String, String), PropertyVector>>,
    sent: Mutex<Vec<PropertyVector>>,
}

impl MockClient {
    async fn insert(&self, vector: PropertyVector) {
        self.vectors
            .lock()
            .await
            .insert((vector.device.clone(), vector.name.clone()), vector);
    }

    async fn sent(&self) -> Vec<PropertyVector> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl ProtocolClient for MockClient {
    async fn devices(&self) -> Vec<Device> {
        Vec::new()
    }

    async fn switch_vector(&self, device: &str, name: &str) -> Option<PropertyVector> {
        self.vectors
            .lock()
            .await
            .get(&(device.to_string(), name.to_string()))
            .filter(|v| v.kind() == PropertyKind::Switch)
            .cloned()
    }

    async fn number_vector(&self, device: &str, name: &str) -> Option<PropertyVector> {
        self.vectors
            .lock()
            .await
            .get(&(device.to_string(), name.to_string()))
            .filter(|v| v.kind() == PropertyKind::Number)
            .cloned()
    }

    async fn send_switch(&self, vector: &PropertyVector) -> Result<(), IndiError> {
        self.insert(vector.clone()).await;
        self.sent.lock().await.push(vector.clone());
        Ok(())
    }

    async fn send_number(&self, vector: &PropertyVector) -> Result<(), IndiError> {
        self.insert(vector.clone()).await;
        self.sent.lock().await.push(vector.clone());
        Ok(())
    }
}

fn switch_vector(device: &str, name: &str, states: &[SwitchState]) -> PropertyVector {
    let elements = states
        .iter()
        .enumerate()
        .map(|(i, state)| SwitchElement {
            name: format!("ELEM_{}", i),
            label: None,
            state: *state,
        })
        .collect();
    PropertyVector {
        device: device.to_string(),
        name: name.to_string(),
        label: None,
        group: None,
        state: PropertyState::Idle,
        perm: Permission::ReadWrite,
        elements: PropertyElements::Switch(elements),
    }
}

fn number_vector(device: &str, name: &str, values: &[f64]) -> PropertyVector {
    let elements = values
        .iter()
        .enumerate()
        .map(|(i, value)| NumberElement {
            name: format!("ELEM_{}", i),
            label: None,
            value: *value,
        })
        .collect();
    PropertyVector {
        device: device.to_string(),
        name: name.to_string(),
        label: None,
        group: None,
        state: PropertyState::Idle,
        perm: Permission::ReadWrite,
        elements: PropertyElements::Number(elements),
    }
}

fn states(vector: &PropertyVector) -> Vec<SwitchState> {
    vector
        .switches()
        .expect("switch vector")
        .iter()
        .map(|s| s.state)
        .collect()
}

const TELESCOPE: &str = "Pi Radiotelescope";

async fn telescope_client() -> Arc<MockClient> {
    let client = Arc::new(MockClient::default());
    client
        .insert(switch_vector(
            TELESCOPE,
            "TELESCOPE_PARK",
            &[SwitchState::Off, SwitchState::On],
        ))
        .await;
    client
        .insert(switch_vector(
            TELESCOPE,
            "TELESCOPE_SLEW_RATE",
            &[SwitchState::On; 5],
        ))
        .await;
    client
        .insert(switch_vector(
            TELESCOPE,
            "GPIO_OUTPUTS",
            &[SwitchState::On, SwitchState::Off],
        ))
        .await;
    client
        .insert(switch_vector(
            TELESCOPE,
            "TELESCOPE_MOTION_WE",
            &[SwitchState::Off, SwitchState::Off],
        ))
        .await;
    client
        .insert(switch_vector(
            TELESCOPE,
            "TELESCOPE_MOTION_NS",
            &[SwitchState::Off, SwitchState::Off],
        ))
        .await;
    client
        .insert(switch_vector(
            TELESCOPE,
            "TELESCOPE_ABORT_MOTION",
            &[SwitchState::Off],
        ))
        .await;
    client
        .insert(switch_vector(
            TELESCOPE,
            "TELESCOPE_TRACK_STATE",
            &[SwitchState::On, SwitchState::Off],
        ))
        .await;
    client
        .insert(number_vector(TELESCOPE, "INT_TIME", &[1.0]))
        .await;
    client
}

#[tokio::test]
async fn park_writes_the_exclusive_pair() {
    let client = telescope_client().await;
    let router = CommandRouter::new(client.clone());

    router.dispatch("rt_park=1").await;
    let sent = client.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].name, "TELESCOPE_PARK");
    assert_eq!(states(&sent[0]), vec![SwitchState::On, SwitchState::Off]);

    router.dispatch("rt_park=0").await;
    let sent = client.sent().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(states(&sent[1]), vec![SwitchState::Off, SwitchState::On]);
}

#[tokio::test]
async fn slew_rate_selects_exactly_one_position() {
    let client = telescope_client().await;
    let router = CommandRouter::new(client.clone());

    router.dispatch("rt_slewrate=3").await;
    let sent = client.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(
        states(&sent[0]),
        vec![
            SwitchState::Off,
            SwitchState::Off,
            SwitchState::On,
            SwitchState::Off,
            SwitchState::Off,
        ]
    );
}

#[tokio::test]
async fn unknown_commands_write_nothing() {
    let client = telescope_client().await;
    let router = CommandRouter::new(client.clone());

    router.dispatch("bogus_command=1").await;
    router.dispatch("no equals sign at all").await;
    router.dispatch("").await;
    assert!(client.sent().await.is_empty());
}

#[tokio::test]
async fn missing_targets_are_skipped_without_error() {
    let client = Arc::new(MockClient::default());
    let router = CommandRouter::new(client.clone());

    // No devices seeded at all; every dispatch must be a clean no-op.
    router.dispatch("rt_park=1").await;
    router.dispatch("rt_connection=1").await;
    router.dispatch("rt_inttime=10").await;
    assert!(client.sent().await.is_empty());
}

#[tokio::test]
async fn gpio_writes_touch_a_single_index() {
    let client = telescope_client().await;
    let router = CommandRouter::new(client.clone());

    router.dispatch("rt_gpio1=1").await;
    let sent = client.sent().await;
    assert_eq!(sent.len(), 1);
    // Index 0 keeps its seeded state.
    assert_eq!(states(&sent[0]), vec![SwitchState::On, SwitchState::On]);

    router.dispatch("rt_gpio0=0").await;
    let sent = client.sent().await;
    assert_eq!(states(&sent[1]), vec![SwitchState::Off, SwitchState::On]);
}

#[tokio::test]
async fn move_and_stop_drive_the_right_axis() {
    let client = telescope_client().await;
    let router = CommandRouter::new(client.clone());

    router.dispatch("rt_move=E").await;
    router.dispatch("rt_move=N").await;
    router.dispatch("rt_stop=S").await;
    let sent = client.sent().await;
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].name, "TELESCOPE_MOTION_WE");
    assert_eq!(states(&sent[0]), vec![SwitchState::Off, SwitchState::On]);
    assert_eq!(sent[1].name, "TELESCOPE_MOTION_NS");
    assert_eq!(states(&sent[1]), vec![SwitchState::On, SwitchState::Off]);
    assert_eq!(sent[2].name, "TELESCOPE_MOTION_NS");
    assert_eq!(states(&sent[2]), vec![SwitchState::Off, SwitchState::Off]);
}

#[tokio::test]
async fn connection_targets_all_three_devices() {
    let client = telescope_client().await;
    client
        .insert(switch_vector(
            "Weather Watcher",
            "CONNECTION",
            &[SwitchState::Off, SwitchState::On],
        ))
        .await;
    client
        .insert(switch_vector(
            "GPSD",
            "CONNECTION",
            &[SwitchState::Off, SwitchState::On],
        ))
        .await;
    client
        .insert(switch_vector(
            TELESCOPE,
            "CONNECTION",
            &[SwitchState::Off, SwitchState::On],
        ))
        .await;
    let router = CommandRouter::new(client.clone());

    router.dispatch("rt_connection=1").await;
    let sent = client.sent().await;
    assert_eq!(sent.len(), 3);
    let devices: Vec<_> = sent.iter().map(|v| v.device.clone()).collect();
    assert_eq!(devices, vec!["Weather Watcher", "GPSD", TELESCOPE]);
    for vector in &sent {
        assert_eq!(states(vector), vec![SwitchState::On, SwitchState::Off]);
    }
}

#[tokio::test]
async fn integration_time_writes_the_parsed_number() {
    let client = telescope_client().await;
    let router = CommandRouter::new(client.clone());

    router.dispatch("rt_inttime=30").await;
    let sent = client.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].name, "INT_TIME");
    assert_eq!(sent[0].numbers().expect("number vector")[0].value, 30.0);
}

#[tokio::test(start_paused = true)]
async fn abort_runs_the_full_sequence_in_order() {
    let client = telescope_client().await;
    let router = CommandRouter::new(client.clone());

    router.dispatch("rt_abort").await;
    let sent = client.sent().await;
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].name, "TELESCOPE_ABORT_MOTION");
    assert_eq!(states(&sent[0]), vec![SwitchState::On]);
    assert_eq!(sent[1].name, "TELESCOPE_PARK");
    assert_eq!(states(&sent[1]), vec![SwitchState::Off, SwitchState::On]);
    assert_eq!(sent[2].name, "TELESCOPE_TRACK_STATE");
    assert_eq!(states(&sent[2]), vec![SwitchState::Off, SwitchState::On]);
}

#[tokio::test]
async fn worker_serializes_concurrent_commands() {
    let client = telescope_client().await;
    let (tx, rx) = mpsc::channel(8);
    let worker = BridgeService::spawn_command_worker(client.clone(), rx);

    // Two racing motion commands on the same vector: with a single consumer
    // the second write must observe the first one completely applied.
    tx.send("rt_move=E".to_string()).await.expect("send");
    tx.send("rt_move=W".to_string()).await.expect("send");
    drop(tx);
    worker.await.expect("worker");

    let sent = client.sent().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(states(&sent[0]), vec![SwitchState::Off, SwitchState::On]);
    assert_eq!(states(&sent[1]), vec![SwitchState::On, SwitchState::Off]);
}
