//! Deployment record store

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::deploy::step::AppliedStep;
use crate::errors::EngineError;
use crate::models::deployment::{Deployment, DeploymentStatus, TemplateType};

/// Filter for history listings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentFilter {
    pub instance_id: Option<String>,
    pub template_type: Option<TemplateType>,
    pub status: Option<DeploymentStatus>,
}

impl DeploymentFilter {
    pub fn matches(&self, deployment: &Deployment) -> bool {
        self.instance_id
            .as_ref()
            .is_none_or(|id| &deployment.instance_id == id)
            && self
                .template_type
                .is_none_or(|t| deployment.template_type == t)
            && self.status.is_none_or(|s| deployment.status == s)
    }
}

/// Durable state of deployments and of the steps they applied
///
/// Reads return owned snapshots; implementations must not hold a lock
/// across an await point so monitoring reads never wait on a running step.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn insert(&self, deployment: &Deployment) -> Result<(), EngineError>;

    async fn update(&self, deployment: &Deployment) -> Result<(), EngineError>;

    async fn get(&self, id: &str) -> Result<Option<Deployment>, EngineError>;

    /// Pending and in-progress records
    async fn list_active(&self) -> Result<Vec<Deployment>, EngineError>;

    async fn find_active_by_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<Deployment>, EngineError>;

    /// Newest first by start (or creation) time
    async fn list(
        &self,
        filter: &DeploymentFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Deployment>, EngineError>;

    async fn list_all(&self) -> Result<Vec<Deployment>, EngineError>;

    async fn append_applied_step(
        &self,
        deployment_id: &str,
        step: AppliedStep,
    ) -> Result<(), EngineError>;

    /// Applied steps in the order they were applied
    async fn applied_steps(&self, deployment_id: &str) -> Result<Vec<AppliedStep>, EngineError>;
}

#[derive(Default)]
struct Tables {
    deployments: HashMap<String, Deployment>,
    journal: HashMap<String, Vec<AppliedStep>>,
}

/// In-memory deployment store
#[derive(Default)]
pub struct InMemoryDeploymentStore {
    tables: RwLock<Tables>,
}

impl InMemoryDeploymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot<F>(&self, predicate: F) -> Vec<Deployment>
    where
        F: Fn(&Deployment) -> bool,
    {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<Deployment> = tables
            .deployments
            .values()
            .filter(|d| predicate(d))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.sort_time()
                .cmp(&a.sort_time())
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        records
    }
}

#[async_trait]
impl DeploymentStore for InMemoryDeploymentStore {
    async fn insert(&self, deployment: &Deployment) -> Result<(), EngineError> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        if tables.deployments.contains_key(&deployment.id) {
            return Err(EngineError::StorageError(format!(
                "Deployment {} already exists",
                deployment.id
            )));
        }
        tables
            .deployments
            .insert(deployment.id.clone(), deployment.clone());
        Ok(())
    }

    async fn update(&self, deployment: &Deployment) -> Result<(), EngineError> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        match tables.deployments.get_mut(&deployment.id) {
            Some(existing) => {
                *existing = deployment.clone();
                Ok(())
            }
            None => Err(EngineError::NotFound(format!(
                "Deployment {}",
                deployment.id
            ))),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Deployment>, EngineError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        Ok(tables.deployments.get(id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Deployment>, EngineError> {
        Ok(self.snapshot(|d| d.status.is_active()))
    }

    async fn find_active_by_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<Deployment>, EngineError> {
        Ok(self
            .snapshot(|d| d.instance_id == instance_id && d.status.is_active())
            .into_iter()
            .next())
    }

    async fn list(
        &self,
        filter: &DeploymentFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Deployment>, EngineError> {
        Ok(self
            .snapshot(|d| filter.matches(d))
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<Deployment>, EngineError> {
        Ok(self.snapshot(|_| true))
    }

    async fn append_applied_step(
        &self,
        deployment_id: &str,
        step: AppliedStep,
    ) -> Result<(), EngineError> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        tables
            .journal
            .entry(deployment_id.to_string())
            .or_default()
            .push(step);
        Ok(())
    }

    async fn applied_steps(&self, deployment_id: &str) -> Result<Vec<AppliedStep>, EngineError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        Ok(tables
            .journal
            .get(deployment_id)
            .cloned()
            .unwrap_or_default())
    }
}
