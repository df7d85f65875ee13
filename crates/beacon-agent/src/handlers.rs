//! Built-in handlers for the remote execution surface

use crate::channel::ControlChannel;
use crate::dispatcher::Handler;
use crate::liveness::LivenessState;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use beacon_proto::{operations, Envelope};
use beacon_sandbox::{Sandbox, SandboxError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Fetches plugin scripts by URL
#[async_trait]
pub trait ScriptHost: Send + Sync {
    /// Download the script source at `url`
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// [`ScriptHost`] that downloads scripts with an HTTP GET
#[derive(Debug, Clone, Default)]
pub struct HttpScriptHost {
    client: reqwest::Client,
}

impl HttpScriptHost {
    /// Create a host with a default client
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a host reusing an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ScriptHost for HttpScriptHost {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self.client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch script from {}", url))?
            .error_for_status()
            .with_context(|| format!("Script host refused {}", url))?;

        response.text().await.context("Failed to read script body")
    }
}

/// Handler for `heartbeat`: records that the controller is alive
pub struct HeartbeatHandler {
    liveness: LivenessState,
}

impl HeartbeatHandler {
    /// Create a handler writing to the given liveness state
    pub fn new(liveness: LivenessState) -> Self {
        Self { liveness }
    }
}

#[async_trait]
impl Handler for HeartbeatHandler {
    async fn handle(&self, data: Value, _channel: Arc<ControlChannel>) -> Result<()> {
        debug!("Heartbeat received: {}", data);
        self.liveness.mark();
        Ok(())
    }
}

/// Payload of `eval_js`
#[derive(Debug, Default, Deserialize)]
struct EvalRequest {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    id: Option<Value>,
}

/// Serialized body of `eval_result`
#[derive(Serialize)]
struct EvalOutcome<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(rename = "err", skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a Value>,
}

/// Evaluate `code` and render the `eval_result` payload string.
///
/// The string is `{"result":..,"id":..}` or `{"err":..,"id":..}`, with
/// non-finite numbers rendered as `null`. A value with no JSON form at all
/// (a cyclic object, a BigInt) yields `Unserializable result: <reason>`.
pub fn eval_message(sandbox: &Sandbox, code: &str, id: Option<&Value>) -> String {
    let outcome = match sandbox.evaluate(code) {
        Ok(result) => EvalOutcome { result, error: None, id },
        Err(SandboxError::Unserializable(reason)) => return format!("Unserializable result: {}", reason),
        Err(e) => EvalOutcome { result: None, error: Some(e.to_string()), id },
    };

    serde_json::to_string(&outcome).unwrap_or_else(|e| format!("Unserializable result: {}", e))
}

/// Handler for `eval_js`: evaluates code in the sandbox and replies with
/// `eval_result`
pub struct EvalHandler {
    sandbox: Arc<Sandbox>,
}

impl EvalHandler {
    /// Create a handler evaluating in the given sandbox
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Handler for EvalHandler {
    async fn handle(&self, data: Value, channel: Arc<ControlChannel>) -> Result<()> {
        let request = match data {
            Value::String(code) => EvalRequest { code: Some(code), id: None },
            Value::Object(_) => serde_json::from_value::<EvalRequest>(data)
                .context("Invalid eval_js payload")?,
            other => return Err(anyhow!("Unsupported eval_js payload: {}", other)),
        };

        let message = match &request.code {
            Some(code) => {
                debug!("Evaluating {} bytes of code", code.len());
                eval_message(&self.sandbox, code, request.id.as_ref())
            }
            None => serde_json::to_string(&EvalOutcome {
                result: None,
                error: Some("missing code".to_string()),
                id: request.id.as_ref(),
            })?,
        };

        channel.send(Envelope::new(operations::EVAL_RESULT, Value::String(message))).await;
        Ok(())
    }
}

/// Payload of `load_plugin`
#[derive(Debug, Clone, Deserialize)]
pub struct PluginRequest {
    /// Script location
    pub url: String,
    /// Correlation id echoed in `plugin_loaded`
    #[serde(default)]
    pub id: Option<Value>,
}

/// Handler for `load_plugin`: fetches a script and runs it in the sandbox
/// without blocking the event loop
#[derive(Clone)]
pub struct LoadPluginHandler {
    host: Arc<dyn ScriptHost>,
    sandbox: Arc<Sandbox>,
}

impl LoadPluginHandler {
    /// Create a handler loading through `host` into `sandbox`
    pub fn new(host: Arc<dyn ScriptHost>, sandbox: Arc<Sandbox>) -> Self {
        Self { host, sandbox }
    }

    /// Fetch and run one plugin, returning the `plugin_loaded` reply
    pub async fn load(&self, request: &PluginRequest) -> Envelope {
        let mut reply = Map::new();
        if let Some(id) = &request.id {
            reply.insert("id".to_string(), id.clone());
        }
        reply.insert("url".to_string(), Value::String(request.url.clone()));

        match self.run(&request.url).await {
            Ok(()) => info!("Loaded plugin from {}", request.url),
            Err(e) => {
                error!("Failed to load plugin from {}: {:#}", request.url, e);
                reply.insert("error".to_string(), Value::String(format!("{:#}", e)));
            }
        }

        Envelope::new(operations::PLUGIN_LOADED, Value::Object(reply))
    }

    async fn run(&self, url: &str) -> Result<()> {
        let script = self.host.fetch(url).await?;
        match self.sandbox.evaluate(&script) {
            Ok(_) | Err(SandboxError::Unserializable(_)) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Plugin script from {} failed", url)),
        }
    }
}

#[async_trait]
impl Handler for LoadPluginHandler {
    async fn handle(&self, data: Value, channel: Arc<ControlChannel>) -> Result<()> {
        let request = match data {
            Value::String(url) => PluginRequest { url, id: None },
            other => serde_json::from_value::<PluginRequest>(other)
                .context("Invalid load_plugin payload")?,
        };

        debug!("Loading plugin from {}", request.url);
        let loader = self.clone();
        tokio::spawn(async move {
            let reply = loader.load(&request).await;
            channel.send(reply).await;
        });
        Ok(())
    }
}
