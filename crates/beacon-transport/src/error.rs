//! Transport-specific error types

use thiserror::Error;
use std::io;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection could not be established
    #[error("Connection error: {0}")]
    Connection(String),
    
    /// Connect attempt exceeded its deadline
    #[error("Operation timed out")]
    Timeout,
    
    /// Writer stayed busy for the whole retry budget
    #[error("Transport not ready after {attempts} attempts")]
    NotReady {
        /// Number of send attempts made
        attempts: u32,
    },
    
    /// Frame could not be written
    #[error("Send failed: {0}")]
    Send(String),
    
    /// Peer answered a request/response send with a non-success status
    #[error("Peer responded with status {0}")]
    Status(u16),
    
    /// Transport has been torn down or the peer closed it
    #[error("Transport closed")]
    Closed,
    
    /// A receive callback is already registered
    #[error("Message callback already registered")]
    CallbackAlreadyRegistered,
    
    /// Every registered candidate failed to connect
    #[error("No transport available ({tried} candidates tried)")]
    NoTransportAvailable {
        /// Number of candidates attempted
        tried: usize,
    },
    
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
    
    /// Frame encoding error
    #[error("Protocol error: {0}")]
    Protocol(#[from] beacon_proto::ProtocolError),
    
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
