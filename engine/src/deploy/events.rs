//! Progress events published on every persisted transition

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::deployment::{Deployment, DeploymentStatus};

/// Snapshot of a deployment after a change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentUpdate {
    pub deployment_id: String,
    pub instance_id: String,
    pub status: DeploymentStatus,
    pub progress: u8,
    pub current_step: Option<String>,
    pub at: DateTime<Utc>,
}

impl From<&Deployment> for DeploymentUpdate {
    fn from(deployment: &Deployment) -> Self {
        Self {
            deployment_id: deployment.id.clone(),
            instance_id: deployment.instance_id.clone(),
            status: deployment.status,
            progress: deployment.progress,
            current_step: deployment.current_step.clone(),
            at: deployment.updated_at,
        }
    }
}

/// Fan-out of deployment updates to any number of subscribers
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DeploymentUpdate>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishing never fails; updates without subscribers are dropped
    pub fn publish(&self, deployment: &Deployment) {
        let _ = self.tx.send(DeploymentUpdate::from(deployment));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeploymentUpdate> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
