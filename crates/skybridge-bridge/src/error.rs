//! Errors that can occur during bridge operations.

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// MQTT client error.
    #[error("MQTT error: {0}")]
    Transport(#[from] rumqttc::ClientError),

    /// INDI client error.
    #[error("INDI error: {0}")]
    Protocol(#[from] skybridge_indi::IndiError),

    /// Snapshot serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file error.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
