//! Agent event loop

use crate::channel::ControlChannel;
use crate::config::AgentConfig;
use crate::dispatcher::Handler;
use crate::handlers::{EvalHandler, HeartbeatHandler, LoadPluginHandler, ScriptHost};
use crate::liveness::{HeartbeatConfig, LivenessMonitor, LivenessState};
use anyhow::{Context, Result};
use beacon_proto::operations;
use beacon_sandbox::Sandbox;
use beacon_transport::TransportRegistry;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// The agent: one control channel, its liveness monitor and the loop that
/// serializes inbound dispatch with heartbeat ticks
pub struct Agent {
    /// Link to the controller
    channel: Arc<ControlChannel>,
    /// Shared with the heartbeat handler
    liveness: LivenessState,
    /// Heartbeat timing
    heartbeat: HeartbeatConfig,
    /// Frames pushed by the active transport
    inbound_rx: mpsc::UnboundedReceiver<String>,
    /// Shutdown signal receiver
    shutdown_rx: Option<oneshot::Receiver<()>>,
    /// Shutdown signal sender (kept for graceful shutdown)
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl Agent {
    /// Create an agent selecting from `registry`
    pub fn new(registry: TransportRegistry, heartbeat: HeartbeatConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        Self {
            channel: Arc::new(ControlChannel::new(registry, inbound_tx)),
            liveness: LivenessState::new(),
            heartbeat,
            inbound_rx,
            shutdown_rx: Some(shutdown_rx),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Create an agent with the configured transports
    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.transport_registry(), config.heartbeat)
    }

    /// The control channel
    pub fn channel(&self) -> &Arc<ControlChannel> {
        &self.channel
    }

    /// Liveness state written by the heartbeat handler
    pub fn liveness(&self) -> &LivenessState {
        &self.liveness
    }

    /// Register a handler for an operation
    pub async fn register_handler(&self, operation: impl Into<String>, handler: Arc<dyn Handler>) {
        self.channel.dispatcher().register(operation, handler).await;
    }

    /// Register the `heartbeat`, `load_plugin` and `eval_js` handlers
    pub async fn register_builtin_handlers(&self, sandbox: Arc<Sandbox>, host: Arc<dyn ScriptHost>) {
        self.register_handler(
            operations::HEARTBEAT,
            Arc::new(HeartbeatHandler::new(self.liveness.clone())),
        ).await;
        self.register_handler(
            operations::LOAD_PLUGIN,
            Arc::new(LoadPluginHandler::new(host, Arc::clone(&sandbox))),
        ).await;
        self.register_handler(operations::EVAL_JS, Arc::new(EvalHandler::new(sandbox))).await;
    }

    /// Get shutdown sender for graceful shutdown
    pub fn shutdown_sender(&mut self) -> Option<oneshot::Sender<()>> {
        self.shutdown_tx.take()
    }

    /// Establish the channel and run until shutdown.
    ///
    /// A failed first establishment is not fatal: the monitor starts in
    /// recovery and retries on every tick.
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting agent loop");

        let mut shutdown_rx = self.shutdown_rx.take()
            .context("Shutdown receiver already taken")?;

        let mut monitor = LivenessMonitor::new(Arc::clone(&self.channel), self.liveness.clone(), self.heartbeat);
        if let Err(e) = self.channel.establish().await {
            warn!("Initial connection failed, will retry: {}", e);
            monitor.enter_recovery();
        }

        let period = self.heartbeat.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Received shutdown signal, stopping agent loop");
                    break;
                }

                Some(frame) = self.inbound_rx.recv() => {
                    self.channel.handle_frame(&frame).await;
                }

                _ = ticker.tick() => {
                    let outcome = monitor.tick(Instant::now()).await;
                    debug!("Heartbeat tick: {:?}", outcome);
                }
            }
        }

        self.channel.teardown().await;
        info!("Agent loop stopped");
        Ok(())
    }
}
