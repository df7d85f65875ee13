//! Error types for protocol operations

use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not valid JSON
    #[error("Decode error: {0}")]
    Decode(String),
    
    /// Envelope could not be serialized
    #[error("Encode error: {0}")]
    Encode(String),
    
    /// Frame element is not an envelope object
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),
    
    /// Envelope has an empty or absent operation
    #[error("Envelope has no operation")]
    MissingOperation,
    
    /// Frame too large
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { 
        /// Actual frame size
        size: usize, 
        /// Maximum allowed size
        max: usize 
    },
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
