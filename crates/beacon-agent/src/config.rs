//! Agent configuration

use crate::liveness::HeartbeatConfig;
use anyhow::{Context, Result};
use beacon_sandbox::SandboxConfig;
use beacon_transport::{HttpFactory, RetryPolicy, TransportRegistry, WebSocketFactory};
use std::sync::Arc;
use std::time::Duration;

/// Priority of the WebSocket candidate
pub const WEBSOCKET_PRIORITY: i32 = 10;

/// Priority of the HTTP candidate
pub const HTTP_PRIORITY: i32 = 5;

/// Everything needed to start an agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Identifier the controller knows this agent by
    pub client_id: String,
    /// Stream endpoint
    pub websocket_url: String,
    /// Request/response endpoint
    pub http_url: String,
    /// Heartbeat timing
    pub heartbeat: HeartbeatConfig,
    /// Deadline for each transport connect attempt
    pub connect_timeout: Duration,
    /// Send retry while the stream is not yet open
    pub retry: RetryPolicy,
    /// Limits for evaluated code
    pub sandbox: SandboxConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::for_controller("127.0.0.1:8000", uuid::Uuid::new_v4().simple().to_string())
    }
}

impl AgentConfig {
    /// Config pointing both transports at `host:port` for `client_id`
    pub fn for_controller(controller: &str, client_id: impl Into<String>) -> Self {
        let client_id = client_id.into();
        Self {
            websocket_url: format!("ws://{}/clients/ws/{}", controller, client_id),
            http_url: format!("http://{}/clients/xhr/{}", controller, client_id),
            client_id,
            heartbeat: HeartbeatConfig::default(),
            connect_timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
            sandbox: SandboxConfig::default(),
        }
    }

    /// Build a config from `BEACON_*` environment variables.
    ///
    /// `BEACON_CONTROLLER` (host:port) and `BEACON_CLIENT_ID` set the
    /// endpoints; `BEACON_WS_URL` and `BEACON_HTTP_URL` override them.
    /// `BEACON_HEARTBEAT_MS` and `BEACON_CONNECT_TIMEOUT_MS` tune timing.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let controller = lookup("BEACON_CONTROLLER").unwrap_or_else(|| "127.0.0.1:8000".to_string());
        let client_id = lookup("BEACON_CLIENT_ID")
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

        let mut config = Self::for_controller(&controller, client_id);

        if let Some(url) = lookup("BEACON_WS_URL") {
            config.websocket_url = url;
        }
        if let Some(url) = lookup("BEACON_HTTP_URL") {
            config.http_url = url;
        }
        if let Some(ms) = lookup("BEACON_HEARTBEAT_MS") {
            let ms: u64 = ms.parse().context("BEACON_HEARTBEAT_MS must be an integer")?;
            config.heartbeat = HeartbeatConfig::with_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = lookup("BEACON_CONNECT_TIMEOUT_MS") {
            let ms: u64 = ms.parse().context("BEACON_CONNECT_TIMEOUT_MS must be an integer")?;
            config.connect_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }

    /// Registry with the WebSocket and HTTP candidates
    pub fn transport_registry(&self) -> TransportRegistry {
        let mut registry = TransportRegistry::new().with_connect_timeout(self.connect_timeout);
        registry.register_factory(
            WEBSOCKET_PRIORITY,
            Arc::new(
                WebSocketFactory::new(self.websocket_url.clone())
                    .with_connect_timeout(self.connect_timeout)
                    .with_retry(self.retry),
            ),
        );
        registry.register_factory(HTTP_PRIORITY, Arc::new(HttpFactory::new(self.http_url.clone())));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_endpoints_from_controller() {
        let config = AgentConfig::from_lookup(lookup_from(&[
            ("BEACON_CONTROLLER", "c2.local:9000"),
            ("BEACON_CLIENT_ID", "abc"),
        ]))
        .unwrap();

        assert_eq!(config.websocket_url, "ws://c2.local:9000/clients/ws/abc");
        assert_eq!(config.http_url, "http://c2.local:9000/clients/xhr/abc");
        assert_eq!(config.heartbeat, HeartbeatConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = AgentConfig::from_lookup(lookup_from(&[
            ("BEACON_WS_URL", "ws://other/ws"),
            ("BEACON_HEARTBEAT_MS", "500"),
            ("BEACON_CONNECT_TIMEOUT_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.websocket_url, "ws://other/ws");
        assert_eq!(config.heartbeat.interval, Duration::from_millis(500));
        assert_eq!(config.heartbeat.timeout, Duration::from_millis(1000));
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.client_id.len(), 32);
    }

    #[test]
    fn test_invalid_number_is_error() {
        assert!(AgentConfig::from_lookup(lookup_from(&[("BEACON_HEARTBEAT_MS", "soon")])).is_err());
    }

    #[test]
    fn test_registry_prefers_websocket() {
        let registry = AgentConfig::for_controller("localhost:1", "x").transport_registry();
        let names: Vec<_> = registry.ranked().iter().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["websocket", "http"]);
    }
}
