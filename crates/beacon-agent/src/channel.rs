//! Control channel over the active transport

use crate::dispatcher::Dispatcher;
use beacon_proto::{decode_frame, Envelope};
use beacon_transport::{send_payload, SelectedTransport, Transport, TransportError, TransportRegistry};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

/// The transport currently carrying the channel
struct ActiveTransport {
    /// Candidate name it was selected from
    name: String,
    /// The connected transport
    transport: Box<dyn Transport>,
}

/// The agent's single logical link to the controller.
///
/// Holds at most one active transport. Inbound frames from the transport
/// are pushed onto an unbounded queue that the agent event loop drains
/// through [`ControlChannel::handle_frame`].
pub struct ControlChannel {
    /// Candidates to select from on every establishment
    registry: TransportRegistry,
    /// Routes decoded envelopes to handlers
    dispatcher: Dispatcher,
    /// Active transport, `None` between teardown and reestablishment
    active: RwLock<Option<ActiveTransport>>,
    /// Inbound frame queue feeding the event loop
    inbound: mpsc::UnboundedSender<String>,
}

impl ControlChannel {
    /// Create a channel that is not yet established
    pub fn new(registry: TransportRegistry, inbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            registry,
            dispatcher: Dispatcher::new(),
            active: RwLock::new(None),
            inbound,
        }
    }

    /// Handler table used for inbound envelopes
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Check whether a transport is active
    pub async fn is_established(&self) -> bool {
        self.active.read().await.is_some()
    }

    /// Name of the active transport, if any
    pub async fn transport_name(&self) -> Option<String> {
        self.active.read().await.as_ref().map(|active| active.name.clone())
    }

    /// Select a transport, wire its callback into the inbound queue and
    /// announce the agent with a `connect` envelope.
    ///
    /// A previously active transport is torn down before the new one is
    /// installed.
    pub async fn establish(&self) -> Result<(), TransportError> {
        let SelectedTransport { name, priority, mut transport } = self.registry.select().await?;

        let inbound = self.inbound.clone();
        if let Err(e) = transport.on_message(Arc::new(move |frame| {
            if inbound.send(frame).is_err() {
                debug!("Inbound queue closed, dropping frame");
            }
        })) {
            transport.teardown();
            return Err(e);
        }

        {
            let mut active = self.active.write().await;
            if let Some(mut previous) = active.take() {
                previous.transport.teardown();
            }
            *active = Some(ActiveTransport { name: name.clone(), transport });
        }

        info!("Control channel established over {} (priority {})", name, priority);
        self.send(Envelope::connect()).await;
        Ok(())
    }

    /// Tear down the active transport. Safe to call when none is active.
    pub async fn teardown(&self) {
        let mut active = self.active.write().await;
        if let Some(mut current) = active.take() {
            info!("Tearing down control channel over {}", current.name);
            current.transport.teardown();
        }
    }

    /// Send an envelope on the active transport.
    ///
    /// Failures are logged and swallowed; the channel stays established.
    pub async fn send(&self, envelope: Envelope) {
        let active = self.active.read().await;
        match active.as_ref() {
            Some(current) => {
                if let Err(e) = send_payload(&*current.transport, &envelope).await {
                    error!("Failed to send {} over {}: {}", envelope.operation, current.name, e);
                }
            }
            None => warn!("No active transport, dropping {} envelope", envelope.operation),
        }
    }

    /// Decode one inbound frame and dispatch every valid envelope in it.
    ///
    /// Malformed frames and envelopes without an operation are logged and
    /// dropped. Returns the number of envelopes dispatched.
    pub async fn handle_frame(self: &Arc<Self>, raw: &str) -> usize {
        let decoded = match decode_frame(raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Discarding malformed frame: {}", e);
                return 0;
            }
        };

        for rejected in &decoded.rejected {
            warn!("Dropping envelope: {}", rejected);
        }

        let count = decoded.envelopes.len();
        for envelope in decoded.envelopes {
            debug!("Received {} envelope", envelope.operation);
            self.dispatcher.dispatch(envelope, self).await;
        }
        count
    }
}
