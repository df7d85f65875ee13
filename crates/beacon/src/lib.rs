//! # Beacon
//!
//! The controller side of Beacon: a gateway that agents reach over
//! WebSocket or plain HTTP requests, the correlation table that turns fire-and-forget operations
//! into request/response pairs, and the model the operator dashboard
//! consumes.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use beacon_proto as proto;

/// Error types for the Beacon controller
pub mod error;

/// Command issuance and response correlation
pub mod correlation;

/// Agent-facing endpoints and command bus
pub mod gateway;

/// Method catalog and dashboard events
pub mod dashboard;

/// Dashboard request handling
pub mod controller;

pub use error::BeaconError;
pub use correlation::{Command, CommandBus, CommandId, CommandResponse, CommandStatus, CorrelationTable, PendingCommand};
pub use gateway::{ClientStatus, Gateway, GatewayConfig, GatewayEvent};
pub use controller::{Controller, DashboardUpdates};
pub use dashboard::{DashboardEvent, DashboardRequest, MethodCatalog, MethodDefinition, MethodParameter, PluginResponse};

/// Result type alias for Beacon operations
pub type Result<T> = std::result::Result<T, BeaconError>;
