//! # Beacon Agent
//!
//! The agent side of the Beacon control channel: transport selection and
//! failover, heartbeat liveness, operation dispatch and the built-in remote
//! execution handlers.

#![warn(missing_docs)]

/// Agent event loop
pub mod agent;

/// Control channel over the active transport
pub mod channel;

/// Agent configuration
pub mod config;

/// Operation dispatch table
pub mod dispatcher;

/// Built-in operation handlers
pub mod handlers;

/// Heartbeat liveness monitoring
pub mod liveness;

#[cfg(test)]
mod testing;

pub use agent::Agent;
pub use channel::ControlChannel;
pub use config::AgentConfig;
pub use dispatcher::{Dispatcher, Handler};
pub use handlers::{EvalHandler, HeartbeatHandler, HttpScriptHost, LoadPluginHandler, ScriptHost};
pub use liveness::{HeartbeatConfig, LivenessMonitor, LivenessState};
