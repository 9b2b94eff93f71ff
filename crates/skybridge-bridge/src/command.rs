//! Inbound command parsing and dispatch.
//!
//! Command messages arrive as `name=argument` text. Each recognized name maps
//! to a fixed sequence of property writes against hard-coded device and
//! vector names; unrecognized or malformed input is silently ignored. Every
//! write is read-modify-write on the whole vector: fetch, mutate element
//! states in place, submit the vector as one atomic update. Missing devices
//! or properties are logged and skipped, never fatal.

use std::sync::Arc;
use std::time::Duration;

use skybridge_indi::{ProtocolClient, SwitchState};
use tracing::{debug, warn};

use crate::error::BridgeError;

/// Telescope device name on the INDI bus.
pub const TELESCOPE_DEVICE: &str = "Pi Radiotelescope";
/// Weather station device name.
pub const WEATHER_DEVICE: &str = "Weather Watcher";
/// GPS daemon device name.
pub const GPS_DEVICE: &str = "GPSD";

const ABORT_VECTOR: &str = "TELESCOPE_ABORT_MOTION";
const PARK_VECTOR: &str = "TELESCOPE_PARK";
const TRACK_STATE_VECTOR: &str = "TELESCOPE_TRACK_STATE";
const CONNECTION_VECTOR: &str = "CONNECTION";
const GPIO_VECTOR: &str = "GPIO_OUTPUTS";
const WEATHER_OVERRIDE_VECTOR: &str = "WEATHER_OVERRIDE";
const SLEW_RATE_VECTOR: &str = "TELESCOPE_SLEW_RATE";
const INT_TIME_VECTOR: &str = "INT_TIME";
const MOTION_WE_VECTOR: &str = "TELESCOPE_MOTION_WE";
const MOTION_NS_VECTOR: &str = "TELESCOPE_MOTION_NS";

/// Settle time between unparking and re-enabling tracking on abort.
const ABORT_SETTLE: Duration = Duration::from_secs(1);

/// Motion direction named in `rt_move` / `rt_stop` arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    fn parse(text: &str) -> Option<Self> {
        match text {
            "N" => Some(Self::North),
            "S" => Some(Self::South),
            "E" => Some(Self::East),
            "W" => Some(Self::West),
            _ => None,
        }
    }

    pub fn axis(&self) -> Axis {
        match self {
            Self::North | Self::South => Axis::NorthSouth,
            Self::East | Self::West => Axis::WestEast,
        }
    }
}

/// Mount motion axis, selecting the WE or NS motion vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    WestEast,
    NorthSouth,
}

impl Axis {
    fn vector_name(&self) -> &'static str {
        match self {
            Self::WestEast => MOTION_WE_VECTOR,
            Self::NorthSouth => MOTION_NS_VECTOR,
        }
    }
}

/// A recognized command message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BridgeCommand {
    /// Abort motion, unpark, re-enable tracking.
    Abort,
    /// Connect or disconnect the weather, GPS and telescope drivers.
    Connection(bool),
    /// Park or unpark the mount.
    Park(bool),
    /// Enable or disable tracking.
    TrackState(bool),
    /// Drive GPIO output 0.
    Gpio0(bool),
    /// Drive GPIO output 1.
    Gpio1(bool),
    /// Force the weather gate open.
    WeatherOverride(bool),
    /// Select one of the five slew rates (1-based).
    SlewRate(usize),
    /// Set the integration time in seconds.
    IntegrationTime(i64),
    /// Start moving in one direction.
    Move(Direction),
    /// Stop motion on one axis.
    Stop(Axis),
}

fn flag(argument: &str) -> Option<bool> {
    match argument {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

impl BridgeCommand {
    /// Parse a `name=argument` message. Unknown names, missing arguments and
    /// out-of-domain arguments all yield `None`.
    pub fn parse(message: &str) -> Option<Self> {
        let (name, argument) = match message.split_once('=') {
            Some((name, argument)) => (name, argument),
            None => (message, ""),
        };
        match name {
            "rt_abort" => Some(Self::Abort),
            "rt_connection" => flag(argument).map(Self::Connection),
            "rt_park" => flag(argument).map(Self::Park),
            "rt_trackstate" => flag(argument).map(Self::TrackState),
            "rt_gpio0" => flag(argument).map(Self::Gpio0),
            "rt_gpio1" => flag(argument).map(Self::Gpio1),
            "weather_override" => flag(argument).map(Self::WeatherOverride),
            "rt_slewrate" => match argument {
                "1" | "2" | "3" | "4" | "5" => argument.parse().ok().map(Self::SlewRate),
                _ => None,
            },
            "rt_inttime" => argument.trim().parse().ok().map(Self::IntegrationTime),
            "rt_move" => Direction::parse(argument).map(Self::Move),
            "rt_stop" => Direction::parse(argument).map(|d| Self::Stop(d.axis())),
            _ => None,
        }
    }
}

/// The ON/OFF pairing for two-element command switches (CONNECTION, PARK,
/// TRACK_STATE): asserting the command turns element 0 on, clearing it turns
/// element 1 on.
fn pair_states(asserted: bool) -> [(usize, SwitchState); 2] {
    if asserted {
        [(0, SwitchState::On), (1, SwitchState::Off)]
    } else {
        [(0, SwitchState::Off), (1, SwitchState::On)]
    }
}

fn switch_state(on: bool) -> SwitchState {
    if on {
        SwitchState::On
    } else {
        SwitchState::Off
    }
}

/// Executes bridge commands as INDI property writes.
pub struct CommandRouter {
    client: Arc<dyn ProtocolClient>,
}

impl CommandRouter {
    pub fn new(client: Arc<dyn ProtocolClient>) -> Self {
        Self { client }
    }

    /// Parse and execute one raw message. Unrecognized input is ignored;
    /// execution failures are logged, never propagated.
    pub async fn dispatch(&self, message: &str) {
        let message = message.trim();
        let Some(command) = BridgeCommand::parse(message) else {
            debug!("Ignoring unrecognized command message: {}", message);
            return;
        };
        if let Err(e) = self.execute(command).await {
            warn!("Command {} failed: {}", message, e);
        }
    }

    /// Execute one parsed command.
    pub async fn execute(&self, command: BridgeCommand) -> Result<(), BridgeError> {
        match command {
            BridgeCommand::Abort => {
                self.set_switches(TELESCOPE_DEVICE, ABORT_VECTOR, &[(0, SwitchState::On)])
                    .await?;
                self.set_switches(TELESCOPE_DEVICE, PARK_VECTOR, &pair_states(false))
                    .await?;
                // Let the mount settle before tracking is re-enabled.
                tokio::time::sleep(ABORT_SETTLE).await;
                self.set_switches(TELESCOPE_DEVICE, TRACK_STATE_VECTOR, &pair_states(false))
                    .await
            }
            BridgeCommand::Connection(connect) => {
                let states = pair_states(connect);
                self.set_switches(WEATHER_DEVICE, CONNECTION_VECTOR, &states)
                    .await?;
                self.set_switches(GPS_DEVICE, CONNECTION_VECTOR, &states)
                    .await?;
                self.set_switches(TELESCOPE_DEVICE, CONNECTION_VECTOR, &states)
                    .await
            }
            BridgeCommand::Park(parked) => {
                self.set_switches(TELESCOPE_DEVICE, PARK_VECTOR, &pair_states(parked))
                    .await
            }
            BridgeCommand::TrackState(tracking) => {
                self.set_switches(TELESCOPE_DEVICE, TRACK_STATE_VECTOR, &pair_states(tracking))
                    .await
            }
            BridgeCommand::Gpio0(on) => {
                self.set_switches(TELESCOPE_DEVICE, GPIO_VECTOR, &[(0, switch_state(on))])
                    .await
            }
            BridgeCommand::Gpio1(on) => {
                self.set_switches(TELESCOPE_DEVICE, GPIO_VECTOR, &[(1, switch_state(on))])
                    .await
            }
            BridgeCommand::WeatherOverride(on) => {
                self.set_switches(
                    WEATHER_DEVICE,
                    WEATHER_OVERRIDE_VECTOR,
                    &[(0, switch_state(on))],
                )
                .await
            }
            BridgeCommand::SlewRate(position) => {
                self.set_exclusive(TELESCOPE_DEVICE, SLEW_RATE_VECTOR, position - 1)
                    .await
            }
            BridgeCommand::IntegrationTime(seconds) => {
                self.set_number(TELESCOPE_DEVICE, INT_TIME_VECTOR, 0, seconds as f64)
                    .await
            }
            BridgeCommand::Move(direction) => {
                let states = match direction {
                    Direction::West | Direction::North => pair_states(true),
                    Direction::East | Direction::South => pair_states(false),
                };
                self.set_switches(TELESCOPE_DEVICE, direction.axis().vector_name(), &states)
                    .await
            }
            BridgeCommand::Stop(axis) => {
                self.set_switches(
                    TELESCOPE_DEVICE,
                    axis.vector_name(),
                    &[(0, SwitchState::Off), (1, SwitchState::Off)],
                )
                .await
            }
        }
    }

    /// Read-modify-write a switch vector. Missing vectors or elements are
    /// skipped with a warning instead of failing.
    async fn set_switches(
        &self,
        device: &str,
        name: &str,
        states: &[(usize, SwitchState)],
    ) -> Result<(), BridgeError> {
        let Some(mut vector) = self.client.switch_vector(device, name).await else {
            warn!("Switch vector {}.{} not available; skipping write", device, name);
            return Ok(());
        };
        for (index, state) in states {
            if !vector.set_switch(*index, *state) {
                warn!(
                    "Switch vector {}.{} has no element {}; skipping write",
                    device, name, index
                );
                return Ok(());
            }
        }
        self.client.send_switch(&vector).await?;
        Ok(())
    }

    /// Read-modify-write a one-of-many selector vector.
    async fn set_exclusive(
        &self,
        device: &str,
        name: &str,
        index: usize,
    ) -> Result<(), BridgeError> {
        let Some(mut vector) = self.client.switch_vector(device, name).await else {
            warn!("Switch vector {}.{} not available; skipping write", device, name);
            return Ok(());
        };
        if !vector.set_exclusive_switch(index) {
            warn!(
                "Switch vector {}.{} has no element {}; skipping write",
                device, name, index
            );
            return Ok(());
        }
        self.client.send_switch(&vector).await?;
        Ok(())
    }

    /// Read-modify-write a number vector.
    async fn set_number(
        &self,
        device: &str,
        name: &str,
        index: usize,
        value: f64,
    ) -> Result<(), BridgeError> {
        let Some(mut vector) = self.client.number_vector(device, name).await else {
            warn!("Number vector {}.{} not available; skipping write", device, name);
            return Ok(());
        };
        if !vector.set_number(index, value) {
            warn!(
                "Number vector {}.{} has no element {}; skipping write",
                device, name, index
            );
            return Ok(());
        }
        self.client.send_number(&vector).await?;
        Ok(())
    }
}
