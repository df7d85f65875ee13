//! Error types for the Beacon controller

use thiserror::Error;

/// Main error type for controller operations
#[derive(Debug, Error)]
pub enum BeaconError {
    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] beacon_proto::ProtocolError),

    /// No agent with this id has ever connected
    #[error("Unknown client: {0}")]
    UnknownClient(String),

    /// Delivering a command to an agent failed
    #[error("Publish error: {0}")]
    Publish(String),

    /// Agent socket errors
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for BeaconError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON error: {}", err))
    }
}

impl From<axum::Error> for BeaconError {
    fn from(err: axum::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}
