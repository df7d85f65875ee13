//! Beacon Agent Binary
//!
//! Connects to the controller and serves remote operations until Ctrl-C.

use anyhow::Result;
use beacon_agent::{Agent, AgentConfig, HttpScriptHost};
use beacon_sandbox::Sandbox;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AgentConfig::from_env()?;
    info!("Starting Beacon agent {}", config.client_id);

    let sandbox = Sandbox::with_config(config.sandbox.clone())?;

    let mut agent = Agent::from_config(&config);
    agent.register_builtin_handlers(Arc::new(sandbox), Arc::new(HttpScriptHost::new())).await;

    let shutdown = agent.shutdown_sender();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            if let Some(shutdown) = shutdown {
                let _ = shutdown.send(());
            }
        }
    });

    info!("All handlers registered, starting agent loop");

    if let Err(e) = agent.run().await {
        error!("Agent error: {}", e);
        std::process::exit(1);
    }

    info!("Agent shutting down");
    Ok(())
}
