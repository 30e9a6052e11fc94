//! deployd API models

use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Deployment submission request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitDeploymentRequest {
    pub instance_id: String,
    pub template_id: String,
    pub template_type: String,
    #[serde(default)]
    pub customizations: Option<serde_json::Value>,
    pub requested_by: String,
    #[serde(default)]
    pub auto_rollback_on_failure: bool,
}

/// Query string of the deployment log listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogsQueryParams {
    pub level: Option<String>,
    pub limit: Option<usize>,
}

/// Query string of the deployment history listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryQueryParams {
    pub instance_id: Option<String>,
    pub template_type: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// List response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

/// Page response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub limit: i64,
    pub offset: i64,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}
