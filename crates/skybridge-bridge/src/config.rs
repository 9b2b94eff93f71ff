//! Bridge configuration.
//!
//! One immutable [`BridgeConfig`] is built at startup and passed by reference
//! to every component. Sources in priority order: CLI flags (applied by the
//! binary), TOML config file, environment variables for credentials,
//! built-in defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use skybridge_indi::IndiConfig;
use tracing::info;

use crate::error::BridgeError;
use crate::mqtt::MqttConfig;

/// Config file consulted when no `--config` flag is given.
pub const DEFAULT_CONFIG_FILE: &str = "skybridge.toml";

/// Environment override for the MQTT username.
pub const ENV_MQTT_USERNAME: &str = "SKYBRIDGE_MQTT_USERNAME";
/// Environment override for the MQTT password.
pub const ENV_MQTT_PASSWORD: &str = "SKYBRIDGE_MQTT_PASSWORD";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub indi: IndiConfig,
    pub mqtt: MqttConfig,
    pub bridge: BridgeOptions,
}

/// Bridge behavior options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeOptions {
    /// Topic root; upper-cased on the wire (`<ROOT>/json`, `<ROOT>/command`).
    pub topic_root: String,

    /// Seconds between snapshot publishes.
    pub polling_secs: u64,

    /// Map an all-zero driver interface mask to GENERAL instead of UNKNOWN.
    /// Off by default: without it an all-zero mask resolves to UNKNOWN.
    pub zero_interface_is_general: bool,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            topic_root: "observatory".to_string(),
            polling_secs: 1,
            zero_interface_is_general: false,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file, falling back to defaults when no
    /// file is present, then apply credential overrides from the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, BridgeError> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                info!("Loading config from {}", path.display());
                Self::parse(&content)?
            }
            None => match std::fs::read_to_string(DEFAULT_CONFIG_FILE) {
                Ok(content) => {
                    info!("Loading config from {}", DEFAULT_CONFIG_FILE);
                    Self::parse(&content)?
                }
                Err(_) => {
                    info!("No config file found; using defaults");
                    Self::default()
                }
            },
        };

        if let Ok(username) = std::env::var(ENV_MQTT_USERNAME) {
            config.mqtt.username = Some(username);
        }
        if let Ok(password) = std::env::var(ENV_MQTT_PASSWORD) {
            config.mqtt.password = Some(password);
        }
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self, BridgeError> {
        toml::from_str(content).map_err(|e| BridgeError::Configuration(e.to_string()))
    }
}
