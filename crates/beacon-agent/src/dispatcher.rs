//! Operation dispatch table

use crate::channel::ControlChannel;
use anyhow::Result;
use beacon_proto::Envelope;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

/// Handler trait for processing inbound operations
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    /// Handle the payload of one envelope.
    ///
    /// The channel is passed so the handler can reply, possibly from a task
    /// it spawns.
    async fn handle(&self, data: Value, channel: Arc<ControlChannel>) -> Result<()>;
}

/// Operation name to ordered handler list.
///
/// Entries are append-only: handlers run in registration order and are never
/// removed.
#[derive(Default)]
pub struct Dispatcher {
    /// Registered handlers by operation
    handlers: RwLock<HashMap<String, Vec<Arc<dyn Handler>>>>,
}

impl Dispatcher {
    /// Create an empty dispatcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for an operation
    pub async fn register(&self, operation: impl Into<String>, handler: Arc<dyn Handler>) {
        let operation = operation.into();
        let mut handlers = self.handlers.write().await;
        debug!("Registered handler for operation: {}", operation);
        handlers.entry(operation).or_default().push(handler);
    }

    /// Number of handlers registered for an operation
    pub async fn handler_count(&self, operation: &str) -> usize {
        self.handlers.read().await.get(operation).map_or(0, Vec::len)
    }

    /// Run every handler registered for the envelope's operation.
    ///
    /// Handler failures are logged and do not stop later handlers. Returns
    /// the number of handlers that ran.
    pub async fn dispatch(&self, envelope: Envelope, channel: &Arc<ControlChannel>) -> usize {
        // Snapshot so handlers may register more handlers without deadlocking
        let handlers = {
            let handlers = self.handlers.read().await;
            handlers.get(&envelope.operation).cloned().unwrap_or_default()
        };

        if handlers.is_empty() {
            warn!("No handlers registered for operation: {}", envelope.operation);
            return 0;
        }

        debug!("Dispatching {} to {} handler(s)", envelope.operation, handlers.len());
        for handler in &handlers {
            if let Err(e) = handler.handle(envelope.data.clone(), Arc::clone(channel)).await {
                error!("Handler error for operation {}: {:#}", envelope.operation, e);
            }
        }
        handlers.len()
    }
}
