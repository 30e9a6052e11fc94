//! Server state

use crate::deploy::executor::DeploymentEngine;
use crate::monitor::MonitoringService;

/// Server state shared across handlers
pub struct ServerState {
    pub engine: DeploymentEngine,
    pub monitor: MonitoringService,
}

impl ServerState {
    pub fn new(engine: DeploymentEngine) -> Self {
        let monitor = engine.monitoring();
        Self { engine, monitor }
    }
}
