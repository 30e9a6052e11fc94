//! Deployment models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::template::Customizations;

/// Deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Record created, task not yet started
    Pending,

    /// Steps are being applied
    InProgress,

    /// Every step applied
    Success,

    /// A step failed, was cancelled, or timed out
    Failed,

    /// Applied steps were reverted after a failure
    RolledBack,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::InProgress => "in_progress",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RolledBack => "rolled_back",
        }
    }

    /// Pending and in-progress deployments own their instance
    pub fn is_active(&self) -> bool {
        matches!(self, DeploymentStatus::Pending | DeploymentStatus::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeploymentStatus::Pending),
            "in_progress" => Ok(DeploymentStatus::InProgress),
            "success" => Ok(DeploymentStatus::Success),
            "failed" => Ok(DeploymentStatus::Failed),
            "rolled_back" => Ok(DeploymentStatus::RolledBack),
            _ => Err(format!("Invalid deployment status: {}", s)),
        }
    }
}

/// Kind of template being deployed
///
/// A closed set: project kickoff templates are `Project`, bill-of-materials
/// setups are `Inventory`, and anything else deploys as `Custom`. Metrics are
/// keyed by these names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateType {
    Hr,
    Crm,
    Accounting,
    Inventory,
    Project,
    Custom,
}

impl TemplateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateType::Hr => "hr",
            TemplateType::Crm => "crm",
            TemplateType::Accounting => "accounting",
            TemplateType::Inventory => "inventory",
            TemplateType::Project => "project",
            TemplateType::Custom => "custom",
        }
    }

    /// ERP module every template of this type builds on
    pub fn base_module(&self) -> Option<&'static str> {
        match self {
            TemplateType::Hr => Some("hr"),
            TemplateType::Crm => Some("crm"),
            TemplateType::Accounting => Some("account"),
            TemplateType::Inventory => Some("stock"),
            TemplateType::Project => Some("project"),
            TemplateType::Custom => None,
        }
    }
}

impl fmt::Display for TemplateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hr" => Ok(TemplateType::Hr),
            "crm" => Ok(TemplateType::Crm),
            "accounting" => Ok(TemplateType::Accounting),
            "inventory" => Ok(TemplateType::Inventory),
            "project" => Ok(TemplateType::Project),
            "custom" => Ok(TemplateType::Custom),
            _ => Err(format!("Invalid template type: {}", s)),
        }
    }
}

/// Why a deployment ended up failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    StepExecution,
    Timeout,
    Cancelled,
}

/// One attempt to apply a template to an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub instance_id: String,
    pub template_id: String,
    pub template_type: TemplateType,
    pub customizations: Customizations,
    pub status: DeploymentStatus,

    /// 0..=100, only ever increases while in progress
    pub progress: u8,

    /// Description of the step about to run or running
    pub current_step: Option<String>,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub error_message: Option<String>,
    pub error_kind: Option<FailureKind>,
    pub auto_rollback: bool,

    /// SHA-256 of the serialized step plan
    pub plan_digest: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
}

impl Deployment {
    /// Sort key for history listings
    pub fn sort_time(&self) -> DateTime<Utc> {
        self.started_at.unwrap_or(self.created_at)
    }

    /// Stamp completion time and derive the duration
    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.completed_at = Some(now);
        let start = self.started_at.unwrap_or(self.created_at);
        self.duration_seconds = Some((now - start).num_milliseconds() as f64 / 1000.0);
    }
}

/// Severity of a deployment log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Info,
    Warn,
    Error,
}

impl LogSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSeverity::Info => "info",
            LogSeverity::Warn => "warn",
            LogSeverity::Error => "error",
        }
    }
}

impl FromStr for LogSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(LogSeverity::Info),
            "warn" | "warning" => Ok(LogSeverity::Warn),
            "error" => Ok(LogSeverity::Error),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}

/// Append-only log entry written while a deployment runs or rolls back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentLogEntry {
    pub id: String,
    pub deployment_id: String,
    pub level: LogSeverity,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl DeploymentLogEntry {
    pub fn new(
        deployment_id: &str,
        level: LogSeverity,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: crate::utils::generate_uuid(),
            deployment_id: deployment_id.to_string(),
            level,
            message: message.into(),
            details,
            created_at: Utc::now(),
        }
    }
}
