//! # Beacon Protocol
//!
//! Envelope definitions and the text frame codec shared by the Beacon agent
//! and controller.

#![warn(missing_docs)]

/// Envelope structure and well-known operations
pub mod envelope;

/// Text frame encoding and decoding
pub mod codec;

/// Error types for protocol operations
pub mod error;

pub use envelope::{operations, Envelope};
pub use codec::{decode_frame, encode_envelope, encode_payload, DecodedFrame};
pub use error::ProtocolError;
