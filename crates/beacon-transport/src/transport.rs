//! Transport abstraction shared by all variants

use async_trait::async_trait;
use crate::TransportError;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked with every inbound text frame
pub type MessageCallback = Arc<dyn Fn(String) + Send + Sync>;

/// A live connection to the controller.
///
/// Implementations are exclusively owned by one control channel and are never
/// reused after [`Transport::teardown`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Name of the variant, used in diagnostics
    fn name(&self) -> &str;
    
    /// Register the inbound frame callback.
    ///
    /// Exactly one callback may be registered, and it must be registered
    /// before traffic is expected.
    fn on_message(&mut self, callback: MessageCallback) -> Result<(), TransportError>;
    
    /// Send one text frame to the peer (best effort)
    async fn send(&self, frame: String) -> Result<(), TransportError>;
    
    /// Release the underlying resources. Safe to call more than once.
    fn teardown(&mut self);
}

/// Constructs connected transports of one variant
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Name of the variant this factory builds
    fn name(&self) -> &str;
    
    /// Try to establish a new transport
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError>;
}

/// Serialize a payload to a text frame and send it.
///
/// Strings are sent unchanged, everything else as JSON.
pub async fn send_payload<T>(transport: &dyn Transport, payload: &T) -> Result<(), TransportError>
where
    T: Serialize + ?Sized + Sync,
{
    let frame = beacon_proto::encode_payload(payload)?;
    transport.send(frame).await
}

/// Bounded retry used while a stream writer is busy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of send attempts
    pub max_attempts: u32,
    /// Delay between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(100),
        }
    }
}
