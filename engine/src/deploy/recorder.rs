//! Persists deployment changes, writes the deployment log and publishes updates

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::deploy::events::EventBus;
use crate::models::deployment::{Deployment, DeploymentLogEntry, LogSeverity};
use crate::storage::deployments::DeploymentStore;
use crate::storage::log_store::LogStore;

/// Write side shared by the executor and the rollback controller
///
/// Failures to persist are reported through tracing and never abort the
/// running deployment: the remote instance has already been changed and the
/// remaining bookkeeping is still worth attempting.
#[derive(Clone)]
pub struct Recorder {
    records: Arc<dyn DeploymentStore>,
    logs: Arc<dyn LogStore>,
    events: EventBus,
}

impl Recorder {
    pub fn new(records: Arc<dyn DeploymentStore>, logs: Arc<dyn LogStore>, events: EventBus) -> Self {
        Self {
            records,
            logs,
            events,
        }
    }

    pub fn records(&self) -> &Arc<dyn DeploymentStore> {
        &self.records
    }

    /// Stamp `updated_at`, persist and publish
    pub async fn save(&self, deployment: &mut Deployment) {
        deployment.updated_at = Utc::now();
        if let Err(e) = self.records.update(deployment).await {
            error!(deployment_id = %deployment.id, "Failed to persist deployment: {}", e);
        }
        self.events.publish(deployment);
    }

    /// Append a log entry and mirror it to the process log
    pub async fn log(
        &self,
        deployment_id: &str,
        level: LogSeverity,
        message: impl Into<String>,
        details: serde_json::Value,
    ) {
        let entry = DeploymentLogEntry::new(deployment_id, level, message, details);
        match level {
            LogSeverity::Info => info!(deployment_id, "{}", entry.message),
            LogSeverity::Warn => warn!(deployment_id, "{}", entry.message),
            LogSeverity::Error => error!(deployment_id, "{}", entry.message),
        }
        if let Err(e) = self.logs.append(entry).await {
            error!(deployment_id, "Failed to append deployment log: {}", e);
        }
    }
}
