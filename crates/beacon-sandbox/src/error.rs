//! Sandbox error types

use thiserror::Error;

/// Errors raised while evaluating sandboxed code
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SandboxError {
    /// Uncaught exception, rendered the way `String(err)` renders it
    #[error("{0}")]
    Thrown(String),
    
    /// Source length, memory, stack or time budget exceeded
    #[error("RangeError: {0}")]
    ResourceExhausted(String),
    
    /// Result has no JSON representation
    #[error("Unserializable value: {0}")]
    Unserializable(String),
    
    /// Engine could not be created or failed outside of script code
    #[error("Engine error: {0}")]
    Engine(String),
}

impl From<rquickjs::Error> for SandboxError {
    fn from(err: rquickjs::Error) -> Self {
        match err {
            rquickjs::Error::Allocation => SandboxError::ResourceExhausted("out of memory".to_string()),
            other => SandboxError::Engine(other.to_string()),
        }
    }
}
