//! Deployment steps and their inverse operations

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::deploy::remote::{RemoteOutcome, RemoteResult, RemoteSystemClient};

/// Kind of a deployment step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    InstallModule,
    CreateCustomField,
    CreateWorkflow,
    CreateDashboard,
    SeedData,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::InstallModule => "install_module",
            StepKind::CreateCustomField => "create_custom_field",
            StepKind::CreateWorkflow => "create_workflow",
            StepKind::CreateDashboard => "create_dashboard",
            StepKind::SeedData => "seed_data",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomField {
    pub model: String,
    pub name: String,
    pub field_type: String,
    pub label: String,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub model: String,
    pub stages: Vec<String>,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub name: String,
    pub model: String,
    pub fields: Vec<String>,
    pub widgets: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedData {
    pub model: String,
    pub records: Vec<serde_json::Value>,
}

/// One atomic operation against an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeploymentStep {
    InstallModule { module: String },
    CreateCustomField(CustomField),
    CreateWorkflow(Workflow),
    CreateDashboard(Dashboard),
    SeedData(SeedData),
}

/// Inverse of a step, if it has one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RollbackAction {
    UninstallModule { module: String },
    DeleteCustomField { model: String, name: String },
    DeleteWorkflow { model: String, name: String },
    DeleteDashboard { name: String },
    None,
}

impl DeploymentStep {
    pub fn kind(&self) -> StepKind {
        match self {
            DeploymentStep::InstallModule { .. } => StepKind::InstallModule,
            DeploymentStep::CreateCustomField(_) => StepKind::CreateCustomField,
            DeploymentStep::CreateWorkflow(_) => StepKind::CreateWorkflow,
            DeploymentStep::CreateDashboard(_) => StepKind::CreateDashboard,
            DeploymentStep::SeedData(_) => StepKind::SeedData,
        }
    }

    /// Human-readable description shown as `current_step`
    pub fn description(&self) -> String {
        match self {
            DeploymentStep::InstallModule { module } => format!("Install module '{}'", module),
            DeploymentStep::CreateCustomField(field) => {
                format!("Create custom field '{}' on {}", field.name, field.model)
            }
            DeploymentStep::CreateWorkflow(workflow) => {
                format!("Create workflow '{}' on {}", workflow.name, workflow.model)
            }
            DeploymentStep::CreateDashboard(dashboard) => {
                format!("Create dashboard '{}'", dashboard.name)
            }
            DeploymentStep::SeedData(seed) => {
                format!("Seed {} record(s) into {}", seed.records.len(), seed.model)
            }
        }
    }

    /// Re-running the step cannot create duplicates on the instance.
    /// Only module installation qualifies.
    pub fn is_idempotent(&self) -> bool {
        matches!(self, DeploymentStep::InstallModule { .. })
    }

    /// Attempts allowed given the configured maximum for idempotent steps
    pub fn max_attempts(&self, idempotent_max: u32) -> u32 {
        if self.is_idempotent() {
            idempotent_max.max(1)
        } else {
            1
        }
    }

    pub fn rollback(&self) -> RollbackAction {
        match self {
            DeploymentStep::InstallModule { module } => RollbackAction::UninstallModule {
                module: module.clone(),
            },
            DeploymentStep::CreateCustomField(field) => RollbackAction::DeleteCustomField {
                model: field.model.clone(),
                name: field.name.clone(),
            },
            DeploymentStep::CreateWorkflow(workflow) => RollbackAction::DeleteWorkflow {
                model: workflow.model.clone(),
                name: workflow.name.clone(),
            },
            DeploymentStep::CreateDashboard(dashboard) => RollbackAction::DeleteDashboard {
                name: dashboard.name.clone(),
            },
            DeploymentStep::SeedData(_) => RollbackAction::None,
        }
    }

    /// Perform the step against the instance
    pub async fn apply(&self, client: &dyn RemoteSystemClient, instance_id: &str) -> RemoteResult {
        match self {
            DeploymentStep::InstallModule { module } => client.install_module(instance_id, module).await,
            DeploymentStep::CreateCustomField(field) => {
                client.create_custom_field(instance_id, field).await
            }
            DeploymentStep::CreateWorkflow(workflow) => {
                client.create_workflow(instance_id, workflow).await
            }
            DeploymentStep::CreateDashboard(dashboard) => {
                client.create_dashboard(instance_id, dashboard).await
            }
            DeploymentStep::SeedData(seed) => client.seed_data(instance_id, seed).await,
        }
    }
}

impl RollbackAction {
    pub fn is_none(&self) -> bool {
        matches!(self, RollbackAction::None)
    }

    /// Perform the inverse operation. `None` is a no-op reported as unchanged.
    pub async fn revert(&self, client: &dyn RemoteSystemClient, instance_id: &str) -> RemoteResult {
        match self {
            RollbackAction::UninstallModule { module } => {
                client.uninstall_module(instance_id, module).await
            }
            RollbackAction::DeleteCustomField { model, name } => {
                client.delete_custom_field(instance_id, model, name).await
            }
            RollbackAction::DeleteWorkflow { model, name } => {
                client.delete_workflow(instance_id, model, name).await
            }
            RollbackAction::DeleteDashboard { name } => client.delete_dashboard(instance_id, name).await,
            RollbackAction::None => Ok(RemoteOutcome::AlreadyPresent),
        }
    }
}

/// Journal entry for a step the instance accepted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedStep {
    /// Zero-based position in the plan
    pub index: usize,
    pub step: DeploymentStep,
    pub outcome: RemoteOutcome,
}
