//! Agent-facing endpoints and command bus

use crate::correlation::{Command, CommandBus, CommandResponse, CorrelationTable};
use crate::{BeaconError, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use beacon_proto::{decode_frame, encode_payload, operations, Envelope};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Route stream agents open their socket on
pub const WS_ROUTE: &str = "/clients/ws/:client_id";

/// Route request/response agents post their frames to
pub const XHR_ROUTE: &str = "/clients/xhr/:client_id";

/// Capacity of the gateway event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Gateway settings
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Listen address
    pub bind_addr: String,
    /// Heartbeat silence after which a client counts as disconnected
    pub client_timeout: Duration,
    /// Period of the background sweep
    pub sweep_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            client_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(2),
        }
    }
}

impl GatewayConfig {
    /// Set the listen address
    pub fn with_bind_addr(mut self, bind_addr: impl Into<String>) -> Self {
        self.bind_addr = bind_addr.into();
        self
    }

    /// Set the heartbeat silence limit
    pub fn with_client_timeout(mut self, client_timeout: Duration) -> Self {
        self.client_timeout = client_timeout;
        self
    }

    /// Set the sweep period
    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }
}

/// Liveness of a known client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    /// Heard from within the timeout
    Connected,
    /// Silent for longer than the timeout
    Disconnected,
}

/// Client lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// A client announced itself or came back
    Connected(String),
    /// A client went silent
    Disconnected(String),
}

/// Per-client bookkeeping
struct ClientEntry {
    status: ClientStatus,
    last_heartbeat: Instant,
    /// Operations waiting for the client's next message
    queue: Vec<Envelope>,
    /// Writer of the current socket, if one is attached
    outbound: Option<mpsc::UnboundedSender<String>>,
    /// Incremented on every socket attach
    connection: u64,
}

impl ClientEntry {
    fn new(now: Instant) -> Self {
        Self {
            status: ClientStatus::Connected,
            last_heartbeat: now,
            queue: Vec::new(),
            outbound: None,
            connection: 0,
        }
    }
}

/// Accepts agent connections and routes commands to them.
///
/// Every inbound message gets a reply batch: the direct response (a `pong`
/// for heartbeats) followed by any operations queued for that client.
pub struct Gateway {
    /// Settings
    config: GatewayConfig,
    /// Known clients by id
    clients: RwLock<HashMap<String, ClientEntry>>,
    /// Receives agent responses
    table: Arc<CorrelationTable>,
    /// Lifecycle notifications
    events: broadcast::Sender<GatewayEvent>,
}

impl Gateway {
    /// Create a gateway feeding `table`
    pub fn new(config: GatewayConfig, table: Arc<CorrelationTable>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            clients: RwLock::new(HashMap::new()),
            table,
            events,
        }
    }

    /// Settings in use
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Correlation table responses are forwarded to
    pub fn table(&self) -> &Arc<CorrelationTable> {
        &self.table
    }

    /// Receive client lifecycle notifications
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Gateway listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Agent-facing routes: the socket endpoint and the request/response
    /// endpoint
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route(WS_ROUTE, get(ws_upgrade))
            .route(XHR_ROUTE, post(xhr_exchange))
            .with_state(self)
    }

    /// Serve agents until the listener fails
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Periodically mark silent clients disconnected
    pub async fn run_sweeper(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        loop {
            ticker.tick().await;
            self.sweep(Instant::now()).await;
        }
    }

    /// Serve one agent socket until it closes
    pub async fn handle_socket(self: Arc<Self>, client_id: String, socket: WebSocket) -> Result<()> {
        info!("Got socket connection from client {}", client_id);

        let (mut sink, mut source) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let connection = self.attach(&client_id, outbound_tx.clone()).await;

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    debug!("Socket write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let mut outcome = Ok(());
        while let Some(message) = source.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        warn!("Dropping non-UTF-8 frame from client {}", client_id);
                        continue;
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    outcome = Err(e.into());
                    break;
                }
            };

            let reply = self.exchange(&client_id, &text).await;
            if !reply.is_empty() && outbound_tx.send(reply).is_err() {
                debug!("Writer for client {} already stopped", client_id);
            }
        }

        self.detach(&client_id, connection).await;
        drop(outbound_tx);
        let _ = writer.await;
        info!("Client {} socket closed", client_id);
        outcome
    }

    /// Handle one inbound frame and render the reply batch as a frame.
    ///
    /// Returns an empty string when there is nothing to say.
    pub async fn exchange(&self, client_id: &str, raw: &str) -> String {
        let batch = self.process_frame(client_id, raw).await;
        if batch.is_empty() {
            return String::new();
        }
        encode_payload(&batch).unwrap_or_else(|e| {
            error!("Failed to encode reply for client {}: {}", client_id, e);
            String::new()
        })
    }

    /// Attach a socket writer to a client, creating the client if needed.
    /// Returns the connection number.
    async fn attach(&self, client_id: &str, outbound: mpsc::UnboundedSender<String>) -> u64 {
        let now = Instant::now();
        let mut clients = self.clients.write().await;
        let entry = clients.entry(client_id.to_string()).or_insert_with(|| ClientEntry::new(now));
        entry.connection += 1;
        entry.outbound = Some(outbound);
        entry.last_heartbeat = now;
        entry.connection
    }

    /// Detach the writer if it still belongs to `connection`
    async fn detach(&self, client_id: &str, connection: u64) {
        let mut clients = self.clients.write().await;
        if let Some(entry) = clients.get_mut(client_id) {
            if entry.connection == connection {
                entry.outbound = None;
            }
        }
    }

    /// Handle one inbound frame from a client and build its reply batch
    pub async fn process_frame(&self, client_id: &str, raw: &str) -> Vec<Envelope> {
        let decoded = match decode_frame(raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Discarding malformed frame from client {}: {}", client_id, e);
                return Vec::new();
            }
        };
        for rejected in &decoded.rejected {
            warn!("Dropping envelope from client {}: {}", client_id, rejected);
        }

        let mut batch = Vec::new();
        for envelope in decoded.envelopes {
            if let Some(response) = self.handle_message(client_id, envelope).await {
                batch.push(response);
            }
        }

        let mut clients = self.clients.write().await;
        if let Some(entry) = clients.get_mut(client_id) {
            batch.append(&mut entry.queue);
        }
        batch
    }

    /// Handle one envelope from a client, returning the direct response
    pub async fn handle_message(&self, client_id: &str, envelope: Envelope) -> Option<Envelope> {
        match envelope.operation.as_str() {
            operations::HEARTBEAT => {
                self.mark_alive(client_id, false).await;
                Some(Envelope::pong())
            }
            operations::CONNECT => {
                self.mark_alive(client_id, true).await;
                None
            }
            _ => {
                debug!("Forwarding {} from client {}", envelope.operation, client_id);
                self.table.on_response(CommandResponse::from_envelope(&envelope)).await;
                None
            }
        }
    }

    /// Record contact from a client. A `connect` always announces the
    /// client; a heartbeat only does when it revives a disconnected one.
    async fn mark_alive(&self, client_id: &str, announce: bool) {
        let now = Instant::now();
        let revived = {
            let mut clients = self.clients.write().await;
            let entry = clients.entry(client_id.to_string()).or_insert_with(|| ClientEntry::new(now));
            let revived = entry.status == ClientStatus::Disconnected;
            entry.status = ClientStatus::Connected;
            entry.last_heartbeat = now;
            revived
        };

        if announce || revived {
            info!("Client {} connected", client_id);
            let _ = self.events.send(GatewayEvent::Connected(client_id.to_string()));
        }
    }

    /// Queue an operation for a client's next message
    pub async fn enqueue(&self, client_id: &str, envelope: Envelope) {
        let now = Instant::now();
        let mut clients = self.clients.write().await;
        clients
            .entry(client_id.to_string())
            .or_insert_with(|| ClientEntry::new(now))
            .queue
            .push(envelope);
    }

    /// Mark clients silent for longer than the timeout as disconnected.
    /// Returns the ids that changed state.
    pub async fn sweep(&self, now: Instant) -> Vec<String> {
        let mut lost = Vec::new();
        {
            let mut clients = self.clients.write().await;
            for (id, entry) in clients.iter_mut() {
                if entry.status == ClientStatus::Connected
                    && now.saturating_duration_since(entry.last_heartbeat) > self.config.client_timeout
                {
                    entry.status = ClientStatus::Disconnected;
                    lost.push(id.clone());
                }
            }
        }

        for id in &lost {
            info!("Client {} disconnected (no heartbeat within {:?})", id, self.config.client_timeout);
            let _ = self.events.send(GatewayEvent::Disconnected(id.clone()));
        }
        lost
    }

    /// Ids of connected clients, sorted
    pub async fn clients(&self) -> Vec<String> {
        let clients = self.clients.read().await;
        let mut ids: Vec<String> = clients
            .iter()
            .filter(|(_, entry)| entry.status == ClientStatus::Connected)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Status of one client
    pub async fn client_status(&self, client_id: &str) -> Option<ClientStatus> {
        self.clients.read().await.get(client_id).map(|entry| entry.status)
    }

    /// Number of operations waiting for a client
    pub async fn queued(&self, client_id: &str) -> usize {
        self.clients.read().await.get(client_id).map_or(0, |entry| entry.queue.len())
    }
}

#[async_trait::async_trait]
impl CommandBus for Gateway {
    /// Deliver a command on the client's socket, or queue it for the
    /// client's next message when no socket is attached
    async fn publish(&self, id: &str, command: &Command) -> Result<()> {
        let envelope = command.to_envelope(id);
        let mut clients = self.clients.write().await;
        let entry = clients
            .get_mut(&command.client_id)
            .ok_or_else(|| BeaconError::UnknownClient(command.client_id.clone()))?;

        if let Some(outbound) = &entry.outbound {
            let frame = encode_payload(&[&envelope])?;
            if outbound.send(frame).is_ok() {
                debug!("Sent {} ({}) to client {}", command.operation, id, command.client_id);
                return Ok(());
            }
            entry.outbound = None;
        }

        debug!("Queued {} ({}) for client {}", command.operation, id, command.client_id);
        entry.queue.push(envelope);
        Ok(())
    }
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(gateway): State<Arc<Gateway>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let id = client_id.clone();
        if let Err(e) = gateway.handle_socket(client_id, socket).await {
            warn!("Socket of client {} ended with error: {}", id, e);
        }
    })
}

async fn xhr_exchange(
    Path(client_id): Path<String>,
    State(gateway): State<Arc<Gateway>>,
    body: String,
) -> impl IntoResponse {
    debug!("Got request from client {}", client_id);
    let reply = gateway.exchange(&client_id, &body).await;
    ([(CONTENT_TYPE, "application/json")], reply)
}

#[cfg(test)]
mod tests;
