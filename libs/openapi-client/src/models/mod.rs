//! ERP instance API models

use serde::{Deserialize, Serialize};

/// Module installation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallModuleRequest {
    pub name: String,
}

/// Custom field creation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateCustomFieldRequest {
    pub model: String,
    pub name: String,
    pub field_type: String,
    pub label: String,
    pub required: bool,
}

/// Workflow creation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
    pub model: String,
    pub stages: Vec<String>,
    pub fields: Vec<String>,
}

/// Dashboard creation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateDashboardRequest {
    pub name: String,
    pub model: String,
    pub fields: Vec<String>,
    pub widgets: Vec<serde_json::Value>,
}

/// Seed data request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedDataRequest {
    pub model: String,
    pub records: Vec<serde_json::Value>,
}

/// Result reported by the instance for a mutating call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Applied,
    AlreadyPresent,
}

/// Operation response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResponse {
    pub status: OperationStatus,
    #[serde(default)]
    pub message: Option<String>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}
