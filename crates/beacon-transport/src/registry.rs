//! Candidate registry and transport selection

use crate::{Transport, TransportError, TransportFactory};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// A transport variant that may be selected, with its rank
#[derive(Clone)]
pub struct TransportCandidate {
    /// Display name
    pub name: String,
    /// Higher priority is tried first
    pub priority: i32,
    /// Builds connected transports of this variant
    pub factory: Arc<dyn TransportFactory>,
}

impl TransportCandidate {
    /// Create a candidate named after its factory
    pub fn new(priority: i32, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            name: factory.name().to_string(),
            priority,
            factory,
        }
    }

    /// Override the display name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl fmt::Debug for TransportCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportCandidate")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Outcome of a successful selection
pub struct SelectedTransport {
    /// Name of the winning candidate
    pub name: String,
    /// Priority of the winning candidate
    pub priority: i32,
    /// The connected transport
    pub transport: Box<dyn Transport>,
}

impl fmt::Debug for SelectedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectedTransport")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Ordered set of transport candidates.
///
/// Candidates are ranked by priority, highest first; equal priorities keep
/// registration order. Duplicate registrations are kept as separate
/// candidates.
#[derive(Debug, Clone)]
pub struct TransportRegistry {
    /// Candidates in registration order
    candidates: Vec<TransportCandidate>,
    /// Deadline for each connect attempt
    connect_timeout: Duration,
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            candidates: Vec::new(),
            connect_timeout: Duration::from_secs(15),
        }
    }

    /// Set the deadline applied to each connect attempt
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Append a candidate
    pub fn register(&mut self, candidate: TransportCandidate) {
        info!("Registering transport candidate: {} (priority {})", candidate.name, candidate.priority);
        self.candidates.push(candidate);
    }

    /// Append a candidate built from a factory
    pub fn register_factory(&mut self, priority: i32, factory: Arc<dyn TransportFactory>) {
        self.register(TransportCandidate::new(priority, factory));
    }

    /// Number of registered candidates
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Check whether no candidates are registered
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Candidates in the order `select` tries them
    pub fn ranked(&self) -> Vec<&TransportCandidate> {
        let mut ranked: Vec<&TransportCandidate> = self.candidates.iter().collect();
        ranked.sort_by(|a, b| b.priority.cmp(&a.priority));
        ranked
    }

    /// Connect the highest-ranked candidate that succeeds.
    ///
    /// Each failure is logged and the next candidate is tried. When every
    /// candidate fails, [`TransportError::NoTransportAvailable`] is returned.
    pub async fn select(&self) -> Result<SelectedTransport, TransportError> {
        let ranked = self.ranked();

        for candidate in &ranked {
            debug!("Trying transport candidate: {}", candidate.name);

            let attempt = timeout(self.connect_timeout, candidate.factory.connect()).await;
            match attempt {
                Ok(Ok(transport)) => {
                    info!("Established communication with transport: {}", candidate.name);
                    return Ok(SelectedTransport {
                        name: candidate.name.clone(),
                        priority: candidate.priority,
                        transport,
                    });
                }
                Ok(Err(e)) => {
                    warn!("Failed to establish communication with transport {}: {}", candidate.name, e);
                }
                Err(_) => {
                    warn!("Transport {} did not connect within {:?}", candidate.name, self.connect_timeout);
                }
            }
        }

        error!("No transport could be established ({} candidates tried)", ranked.len());
        Err(TransportError::NoTransportAvailable { tried: ranked.len() })
    }
}
