//! Error types for the deployment engine

use thiserror::Error;

use crate::deploy::planner::PlanningError;

/// Main error type for the deployment engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Planning error: {0}")]
    Planning(#[from] PlanningError),

    #[error("Step execution error: {0}")]
    StepExecution(String),

    #[error("Rollback of deployment {deployment_id} left {failed_steps} step(s) unreverted")]
    RollbackPartialFailure {
        deployment_id: String,
        failed_steps: usize,
    },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable machine-readable code, used in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Conflict(_) => "conflict",
            EngineError::Planning(_) => "planning_error",
            EngineError::StepExecution(_) => "step_execution_error",
            EngineError::RollbackPartialFailure { .. } => "rollback_partial_failure",
            EngineError::Timeout(_) => "timeout",
            EngineError::Cancelled(_) => "cancelled",
            EngineError::ValidationError(_) => "validation_error",
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidState(_) => "invalid_state",
            EngineError::IoError(_)
            | EngineError::JsonError(_)
            | EngineError::HttpError(_)
            | EngineError::StorageError(_)
            | EngineError::ConfigError(_)
            | EngineError::ServerError(_)
            | EngineError::ShutdownError(_)
            | EngineError::Internal(_) => "internal_error",
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}
