//! Remote ERP system contract
//!
//! One method per step kind and one per inverse operation. Implementations
//! own transport details; the engine only looks at [`RemoteErrorKind`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::deploy::step::{CustomField, Dashboard, SeedData, Workflow};

/// Successful outcome of a remote operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteOutcome {
    /// The operation changed the instance
    Applied,

    /// The target state already existed; nothing was changed
    AlreadyPresent,
}

/// Classification of a remote failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// Connection refused, reset, or request timed out
    Transport,

    /// The instance answered with a server-side error
    Unavailable,

    /// Credentials were rejected
    Unauthorized,

    /// The referenced object does not exist on the instance
    NotFound,

    /// The object exists in a conflicting form
    Conflict,

    /// The instance refused the operation as invalid
    Rejected,
}

impl RemoteErrorKind {
    /// Whether trying again could succeed without operator action
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteErrorKind::Transport | RemoteErrorKind::Unavailable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteErrorKind::Transport => "transport",
            RemoteErrorKind::Unavailable => "unavailable",
            RemoteErrorKind::Unauthorized => "unauthorized",
            RemoteErrorKind::NotFound => "not_found",
            RemoteErrorKind::Conflict => "conflict",
            RemoteErrorKind::Rejected => "rejected",
        }
    }

    /// Operator-facing summary that never includes remote detail
    pub fn summary(&self) -> &'static str {
        match self {
            RemoteErrorKind::Transport => "the ERP instance could not be reached",
            RemoteErrorKind::Unavailable => "the ERP instance reported an internal error",
            RemoteErrorKind::Unauthorized => "the ERP instance rejected the configured credentials",
            RemoteErrorKind::NotFound => "a referenced object does not exist on the ERP instance",
            RemoteErrorKind::Conflict => "a conflicting object already exists on the ERP instance",
            RemoteErrorKind::Rejected => "the ERP instance rejected the operation",
        }
    }
}

/// Structured failure from the remote system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,

    /// Raw detail; only ever written to log entry details
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for RemoteError {}

pub type RemoteResult = Result<RemoteOutcome, RemoteError>;

/// Operations the engine performs against an ERP instance
#[async_trait]
pub trait RemoteSystemClient: Send + Sync {
    async fn install_module(&self, instance_id: &str, module: &str) -> RemoteResult;

    async fn uninstall_module(&self, instance_id: &str, module: &str) -> RemoteResult;

    async fn create_custom_field(&self, instance_id: &str, field: &CustomField) -> RemoteResult;

    async fn delete_custom_field(&self, instance_id: &str, model: &str, name: &str) -> RemoteResult;

    async fn create_workflow(&self, instance_id: &str, workflow: &Workflow) -> RemoteResult;

    async fn delete_workflow(&self, instance_id: &str, model: &str, name: &str) -> RemoteResult;

    async fn create_dashboard(&self, instance_id: &str, dashboard: &Dashboard) -> RemoteResult;

    async fn delete_dashboard(&self, instance_id: &str, name: &str) -> RemoteResult;

    async fn seed_data(&self, instance_id: &str, seed: &SeedData) -> RemoteResult;
}
