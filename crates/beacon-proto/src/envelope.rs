//! Envelope structure and well-known operations

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use crate::ProtocolError;

/// Operation names understood by both sides of the channel
pub mod operations {
    /// Sent by the agent once per channel establishment
    pub const CONNECT: &str = "connect";
    /// Liveness ping/pong, both directions
    pub const HEARTBEAT: &str = "heartbeat";
    /// Controller asks the agent to fetch and run a script
    pub const LOAD_PLUGIN: &str = "load_plugin";
    /// Agent reports a finished script load
    pub const PLUGIN_LOADED: &str = "plugin_loaded";
    /// Controller asks the agent to evaluate code
    pub const EVAL_JS: &str = "eval_js";
    /// Agent reports an evaluation outcome
    pub const EVAL_RESULT: &str = "eval_result";
}

/// Heartbeat payload sent by the agent
pub const PING: &str = "ping";

/// Heartbeat payload sent by the controller
pub const PONG: &str = "pong";

/// Minimal message unit exchanged over every transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Operation name; must be non-empty to be dispatched
    #[serde(default)]
    pub operation: String,
    /// Opaque payload
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Create a new envelope
    pub fn new(operation: impl Into<String>, data: Value) -> Self {
        Self {
            operation: operation.into(),
            data,
        }
    }
    
    /// Channel establishment announcement
    pub fn connect() -> Self {
        Self::new(operations::CONNECT, json!({}))
    }
    
    /// Heartbeat ping from the agent
    pub fn ping() -> Self {
        Self::new(operations::HEARTBEAT, Value::String(PING.to_string()))
    }
    
    /// Heartbeat pong from the controller
    pub fn pong() -> Self {
        Self::new(operations::HEARTBEAT, Value::String(PONG.to_string()))
    }
    
    /// Check that the envelope can be routed to a dispatcher
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.operation.trim().is_empty() {
            return Err(ProtocolError::MissingOperation);
        }
        Ok(())
    }
    
    /// Correlation id carried in the payload.
    ///
    /// Looks for `id` in an object payload, or inside a JSON object encoded
    /// as a string payload (the shape `eval_result` uses). Numeric ids are
    /// rendered as strings.
    pub fn correlation_id(&self) -> Option<String> {
        match &self.data {
            Value::Object(map) => map.get("id").and_then(id_to_string),
            Value::String(text) => serde_json::from_str::<Value>(text)
                .ok()?
                .get("id")
                .and_then(id_to_string),
            _ => None,
        }
    }
    
    /// Return a copy of this envelope with `id` attached to an object payload.
    ///
    /// A non-object payload is wrapped as `{"value": <payload>, "id": id}`.
    pub fn with_correlation_id(mut self, id: &str) -> Self {
        match &mut self.data {
            Value::Object(map) => {
                map.insert("id".to_string(), Value::String(id.to_string()));
            }
            Value::Null => {
                self.data = json!({ "id": id });
            }
            other => {
                let value = other.take();
                self.data = json!({ "value": value, "id": id });
            }
        }
        self
    }
}

fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
