//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::deploy::executor::DeploymentEngine;
use crate::deploy::fsm::FsmSettings;
use crate::deploy::remote::RemoteSystemClient;
use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::storage::deployments::InMemoryDeploymentStore;
use crate::storage::log_store::InMemoryLogStore;
use crate::storage::templates::DirTemplateCatalog;

/// Main application state
pub struct AppState {
    /// Deployment engine, shared with the server and the watchdog
    pub engine: DeploymentEngine,
}

impl AppState {
    /// Initialize application state
    pub async fn init(
        templates_dir: &Dir,
        client: Arc<dyn RemoteSystemClient>,
        fsm_settings: FsmSettings,
    ) -> Result<Self, EngineError> {
        info!("Initializing application state...");

        if !templates_dir.exists().await {
            warn!(
                "Template directory {:?} does not exist, creating it",
                templates_dir.path()
            );
            templates_dir.create().await?;
        }
        let catalog = DirTemplateCatalog::new(templates_dir.clone());
        let templates = catalog.load_all().await?;
        info!(
            "Found {} template(s) in {:?}",
            templates.len(),
            templates_dir.path()
        );

        let engine = DeploymentEngine::new(
            Arc::new(InMemoryDeploymentStore::new()),
            Arc::new(InMemoryLogStore::new()),
            Arc::new(catalog),
            client,
            fsm_settings,
        );

        Ok(Self { engine })
    }

    /// Stop running deployments at their next step boundary and wait for them
    pub async fn shutdown(&self, poll_interval: Duration) -> Result<(), EngineError> {
        info!("Shutting down application state...");

        self.engine.stop_all();
        while self.engine.running_count() > 0 {
            info!(
                "Waiting for {} running deployment(s) to stop...",
                self.engine.running_count()
            );
            tokio::time::sleep(poll_interval).await;
        }
        Ok(())
    }
}
