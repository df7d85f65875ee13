//! Dashboard request handling over the gateway and correlation table

use crate::correlation::{CommandStatus, PendingCommand};
use crate::dashboard::{DashboardEvent, DashboardRequest, MethodCatalog, PluginResponse};
use crate::gateway::Gateway;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Answers dashboard requests.
///
/// Clients come from the gateway, methods from the catalog, and `plugin.run`
/// issues a command through the gateway's correlation table.
pub struct Controller {
    /// Agent connections and the table they feed
    gateway: Arc<Gateway>,
    /// Methods offered to the operator
    catalog: MethodCatalog,
}

impl Controller {
    /// Create a controller offering `catalog`
    pub fn new(gateway: Arc<Gateway>, catalog: MethodCatalog) -> Self {
        Self { gateway, catalog }
    }

    /// Gateway in use
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Methods offered to the operator
    pub fn catalog(&self) -> &MethodCatalog {
        &self.catalog
    }

    /// Answer one dashboard request
    pub async fn handle(&self, request: DashboardRequest) -> DashboardEvent {
        match request {
            DashboardRequest::Clients => DashboardEvent::Clients(self.gateway.clients().await),
            DashboardRequest::Methods => DashboardEvent::Methods(self.catalog.clone()),
            DashboardRequest::Run(command) => {
                if self.catalog.get(&command.operation).is_none() {
                    debug!("Running {} which is not in the method catalog", command.operation);
                }
                let (id, outcome) = self.gateway.table().try_issue(command, &*self.gateway).await;
                match outcome {
                    Ok(()) => DashboardEvent::Plugin(PluginResponse {
                        msg: Value::String(id.clone()),
                        id: Some(id),
                    }),
                    Err(e) => DashboardEvent::PluginError { id, error: e.to_string() },
                }
            }
        }
    }

    /// Stream of command results for the dashboard
    pub fn updates(&self) -> DashboardUpdates {
        DashboardUpdates {
            updates: self.gateway.table().subscribe(),
        }
    }
}

/// Correlation table changes rendered as dashboard events.
///
/// Resolved commands become `plugin.response`, failed transmits become
/// `plugin.error`. Pending entries are skipped.
pub struct DashboardUpdates {
    updates: broadcast::Receiver<PendingCommand>,
}

impl DashboardUpdates {
    /// Next event, or `None` once the table is gone
    pub async fn next(&mut self) -> Option<DashboardEvent> {
        loop {
            match self.updates.recv().await {
                Ok(command) => {
                    if let Some(event) = dashboard_event(&command) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Dashboard fell behind, {} command updates dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Dashboard event for a table entry, if it has left the pending state
pub fn dashboard_event(command: &PendingCommand) -> Option<DashboardEvent> {
    match command.status {
        CommandStatus::Pending => None,
        CommandStatus::Success => Some(DashboardEvent::Plugin(PluginResponse::from(command))),
        CommandStatus::Error => Some(DashboardEvent::PluginError {
            id: command.id.clone(),
            error: match &command.result {
                Some(Value::String(reason)) => reason.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            },
        }),
    }
}
