//! # Beacon Transport
//!
//! Transport plugins for the Beacon control channel and the registry that
//! ranks them and fails over between them.

#![warn(missing_docs)]

/// Transport abstraction shared by all variants
pub mod transport;

/// Candidate registry and transport selection
pub mod registry;

/// Persistent WebSocket stream transport
#[cfg(feature = "websocket")]
pub mod websocket;

/// HTTP request/response transport
#[cfg(feature = "http")]
pub mod http;

/// Transport-specific error types
pub mod error;

pub use transport::{send_payload, MessageCallback, RetryPolicy, Transport, TransportFactory};
pub use registry::{SelectedTransport, TransportCandidate, TransportRegistry};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketFactory, WebSocketTransport};
#[cfg(feature = "http")]
pub use http::{HttpFactory, HttpTransport};
pub use error::TransportError;
