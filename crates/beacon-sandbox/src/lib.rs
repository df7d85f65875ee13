//! # Beacon Sandbox
//!
//! A resource-limited JavaScript engine. Remote `eval_js` requests and
//! loaded plugin scripts run here instead of in the host.

#![warn(missing_docs)]

/// Evaluation runtime and limits
pub mod runtime;

/// Sandbox error types
pub mod error;

pub use runtime::{Sandbox, SandboxConfig};
pub use error::SandboxError;
