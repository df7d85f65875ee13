//! Command issuance and response correlation

use crate::Result;
use beacon_proto::Envelope;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Correlation id assigned to an issued command
pub type CommandId = String;

/// Capacity of the update broadcast channel
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle of an issued command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    /// Sent, no response yet
    Pending,
    /// A response with this id arrived
    Success,
    /// The command could not be transmitted
    Error,
}

/// Controller-side record of an issued command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCommand {
    /// Correlation id
    pub id: CommandId,
    /// Response payload, once one arrived
    pub result: Option<Value>,
    /// Current status
    pub status: CommandStatus,
    /// Issue time in milliseconds since the Unix epoch
    pub timestamp: u64,
}

/// An operation to run on one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Target agent
    pub client_id: String,
    /// Operation name, e.g. `eval_js`
    pub operation: String,
    /// Operation arguments, sent as the envelope payload
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl Command {
    /// Create a command with no arguments
    pub fn new(client_id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            operation: operation.into(),
            kwargs: Map::new(),
        }
    }

    /// Add an argument
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Envelope carrying this command under the given correlation id
    pub fn to_envelope(&self, id: &str) -> Envelope {
        Envelope::new(self.operation.clone(), Value::Object(self.kwargs.clone())).with_correlation_id(id)
    }
}

/// A response as seen by the correlation layer
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse {
    /// Correlation id, if the response carried one
    pub id: Option<CommandId>,
    /// Operation of the response envelope
    pub operation: String,
    /// Response payload
    pub payload: Value,
}

impl CommandResponse {
    /// Create a response
    pub fn new(id: Option<CommandId>, operation: impl Into<String>, payload: Value) -> Self {
        Self {
            id,
            operation: operation.into(),
            payload,
        }
    }

    /// Extract the id and payload from an agent envelope.
    ///
    /// A string payload holding a JSON document (the `eval_result` shape) is
    /// decoded; any other string is kept as is.
    pub fn from_envelope(envelope: &Envelope) -> Self {
        let payload = match &envelope.data {
            Value::String(text) => serde_json::from_str(text).unwrap_or_else(|_| envelope.data.clone()),
            other => other.clone(),
        };
        Self::new(envelope.correlation_id(), envelope.operation.clone(), payload)
    }

    /// Whether the payload reports a failure: `err` in an `eval_result`,
    /// `error` in a `plugin_loaded`
    pub fn is_error(&self) -> bool {
        self.operation == "error" || ["err", "error"].iter().any(|field| self.payload.get(field).is_some())
    }
}

/// Delivers issued commands to agents
#[async_trait::async_trait]
pub trait CommandBus: Send + Sync {
    /// Transmit a command under the given correlation id
    async fn publish(&self, id: &str, command: &Command) -> Result<()>;
}

/// Entry plus its issue sequence, used to order equal timestamps
#[derive(Debug, Clone)]
struct Slot {
    seq: u64,
    command: PendingCommand,
}

#[derive(Debug, Default)]
struct TableState {
    slots: HashMap<CommandId, Slot>,
    next_seq: u64,
}

/// Pending and resolved commands by correlation id.
///
/// Entries are never expired. Every change is published to subscribers.
pub struct CorrelationTable {
    /// Entries and issue order
    state: RwLock<TableState>,
    /// Update notifications
    updates: broadcast::Sender<PendingCommand>,
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationTable {
    /// Create an empty table
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(TableState::default()),
            updates,
        }
    }

    /// Receive every entry change
    pub fn subscribe(&self) -> broadcast::Receiver<PendingCommand> {
        self.updates.subscribe()
    }

    /// Issue a command: assign an id, record it as pending, transmit it
    pub async fn issue(&self, command: Command, bus: &dyn CommandBus) -> Result<CommandId> {
        self.issue_with(command, bus, |_| {}).await
    }

    /// Issue a command and invoke `callback` with the id once transmit
    /// succeeded.
    ///
    /// The entry exists before transmission starts. A transmit failure marks
    /// it [`CommandStatus::Error`] and is returned.
    pub async fn issue_with<F>(&self, command: Command, bus: &dyn CommandBus, callback: F) -> Result<CommandId>
    where
        F: FnOnce(&str) + Send,
    {
        let (id, outcome) = self.try_issue(command, bus).await;
        outcome?;
        callback(&id);
        Ok(id)
    }

    /// Issue a command and return its id together with the transmit
    /// outcome, so a failed command can still be referred to
    pub async fn try_issue(&self, command: Command, bus: &dyn CommandBus) -> (CommandId, Result<()>) {
        let id = Uuid::new_v4().simple().to_string();
        let entry = PendingCommand {
            id: id.clone(),
            result: None,
            status: CommandStatus::Pending,
            timestamp: now_millis(),
        };

        {
            let mut state = self.state.write().await;
            let seq = state.next_seq;
            state.next_seq += 1;
            state.slots.insert(id.clone(), Slot { seq, command: entry.clone() });
        }
        self.notify(entry);

        debug!("Issuing {} to client {} with id {}", command.operation, command.client_id, id);
        match bus.publish(&id, &command).await {
            Ok(()) => (id, Ok(())),
            Err(e) => {
                warn!("Failed to transmit command {}: {}", id, e);
                let failed = {
                    let mut state = self.state.write().await;
                    state.slots.get_mut(&id).map(|slot| {
                        slot.command.status = CommandStatus::Error;
                        slot.command.result = Some(Value::String(e.to_string()));
                        slot.command.clone()
                    })
                };
                if let Some(failed) = failed {
                    self.notify(failed);
                }
                (id, Err(e))
            }
        }
    }

    /// Resolve the entry a response refers to.
    ///
    /// The issue timestamp is kept. Responses without an id, or with an id
    /// this table never issued, change nothing. Returns the updated entry.
    pub async fn on_response(&self, response: CommandResponse) -> Option<PendingCommand> {
        let Some(id) = response.id.as_deref() else {
            info!("Unaddressed {} response: {}", response.operation, response.payload);
            return None;
        };

        let updated = {
            let mut state = self.state.write().await;
            match state.slots.get_mut(id) {
                Some(slot) => {
                    slot.command.result = Some(response.payload.clone());
                    slot.command.status = CommandStatus::Success;
                    slot.command.clone()
                }
                None => {
                    warn!("Received response for unknown command id {}", id);
                    return None;
                }
            }
        };

        if response.is_error() {
            debug!("Command {} resolved with an error payload", id);
        }
        self.notify(updated.clone());
        Some(updated)
    }

    /// Look up one entry
    pub async fn get(&self, id: &str) -> Option<PendingCommand> {
        self.state.read().await.slots.get(id).map(|slot| slot.command.clone())
    }

    /// All entries, newest timestamp first; equal timestamps newest issue
    /// first
    pub async fn results(&self) -> Vec<PendingCommand> {
        let state = self.state.read().await;
        let mut slots: Vec<&Slot> = state.slots.values().collect();
        slots.sort_by(|a, b| {
            b.command.timestamp.cmp(&a.command.timestamp).then(b.seq.cmp(&a.seq))
        });
        slots.into_iter().map(|slot| slot.command.clone()).collect()
    }

    /// The most recently issued entry
    pub async fn latest(&self) -> Option<PendingCommand> {
        let state = self.state.read().await;
        state.slots.values().max_by_key(|slot| slot.seq).map(|slot| slot.command.clone())
    }

    /// Number of entries
    pub async fn len(&self) -> usize {
        self.state.read().await.slots.len()
    }

    /// Check whether nothing was issued yet
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.slots.is_empty()
    }

    fn notify(&self, entry: PendingCommand) {
        // No subscribers is fine
        let _ = self.updates.send(entry);
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
