//! Bridge service: the polling loop and the command worker.
//!
//! Two independent activities run concurrently: a fixed-interval polling loop
//! that assembles and publishes the snapshot document, and a single worker
//! task that executes inbound commands in arrival order. One consumer on the
//! command channel means two concurrent commands can never interleave their
//! read-modify-write sequences on the same vector.

use std::sync::Arc;
use std::time::Duration;

use skybridge_indi::ProtocolClient;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::command::CommandRouter;
use crate::config::BridgeOptions;
use crate::error::BridgeError;
use crate::mqtt::MqttTransport;
use crate::snapshot;

/// The periodic snapshot publisher.
pub struct BridgeService {
    client: Arc<dyn ProtocolClient>,
    transport: MqttTransport,
    options: BridgeOptions,
}

impl BridgeService {
    pub fn new(
        client: Arc<dyn ProtocolClient>,
        transport: MqttTransport,
        options: BridgeOptions,
    ) -> Self {
        Self {
            client,
            transport,
            options,
        }
    }

    /// Run the polling loop until shutdown fires. Each cycle's errors are
    /// logged and swallowed; the loop itself never dies.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.options.polling_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!("Snapshot publish failed: {}", e);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("Polling loop stopped");
    }

    /// One polling cycle: read all devices, assemble, publish.
    pub async fn poll_once(&self) -> Result<(), BridgeError> {
        let devices = self.client.devices().await;
        let document = snapshot::assemble(&devices, self.options.zero_interface_is_general);
        debug!("Snapshot document: {}", document);
        self.transport.publish_snapshot(&document).await
    }

    /// Spawn the single worker that executes inbound commands in arrival
    /// order. The task exits when every sender is gone.
    pub fn spawn_command_worker(
        client: Arc<dyn ProtocolClient>,
        mut commands: mpsc::Receiver<String>,
    ) -> JoinHandle<()> {
        let router = CommandRouter::new(client);
        tokio::spawn(async move {
            while let Some(message) = commands.recv().await {
                router.dispatch(&message).await;
            }
            debug!("Command worker stopped");
        })
    }
}
