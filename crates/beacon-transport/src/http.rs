//! HTTP request/response transport

use async_trait::async_trait;
use crate::{MessageCallback, Transport, TransportError, TransportFactory};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Variant name reported in diagnostics
pub const HTTP_TRANSPORT: &str = "http";

/// Factory for [`HttpTransport`]
#[derive(Debug, Clone)]
pub struct HttpFactory {
    /// Endpoint that accepts POSTed frames, e.g. `http://controller:8000/clients/xhr/`
    url: String,
    /// Per-request deadline
    request_timeout: Duration,
}

impl HttpFactory {
    /// Create a factory for the given endpoint
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Set the per-request deadline
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

#[async_trait]
impl TransportFactory for HttpFactory {
    fn name(&self) -> &str {
        HTTP_TRANSPORT
    }

    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        let url = Url::parse(&self.url)
            .map_err(|e| TransportError::Configuration(format!("invalid URL {}: {}", self.url, e)))?;

        let client = Client::builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        debug!("HTTP transport ready for {}", url);
        Ok(Box::new(HttpTransport {
            client,
            url,
            callback: None,
            closed: false,
        }))
    }
}

/// Half-duplex transport: the peer can only speak in the response to a send
pub struct HttpTransport {
    /// Shared HTTP client
    client: Client,
    /// Endpoint
    url: Url,
    /// Receives response bodies
    callback: Option<MessageCallback>,
    /// Set by `teardown`
    closed: bool,
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        HTTP_TRANSPORT
    }

    fn on_message(&mut self, callback: MessageCallback) -> Result<(), TransportError> {
        if self.callback.is_some() {
            return Err(TransportError::CallbackAlreadyRegistered);
        }
        debug!("HTTP transport registered message callback");
        self.callback = Some(callback);
        Ok(())
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let response = self.client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json;charset=UTF-8")
            .body(frame)
            .send()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            error!("HTTP transport send failed with status {}", status);
            return Err(TransportError::Status(status.as_u16()));
        }

        let body = response.text().await
            .map_err(|e| TransportError::Send(e.to_string()))?;

        if body.is_empty() {
            return Ok(());
        }

        match &self.callback {
            Some(callback) => callback(body),
            None => warn!("HTTP transport received a response but no callback is registered"),
        }
        Ok(())
    }

    fn teardown(&mut self) {
        if !self.closed {
            debug!("Tearing down HTTP transport");
        }
        self.closed = true;
        self.callback = None;
    }
}
