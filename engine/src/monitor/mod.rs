//! Deployment monitoring service
//!
//! Read-only facade over the record and log stores. Nothing here mutates a
//! deployment; callers poll it or subscribe to the engine's updates.

pub mod metrics;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::models::deployment::{
    Deployment, DeploymentLogEntry, DeploymentStatus, LogSeverity, TemplateType,
};
use crate::storage::deployments::{DeploymentFilter, DeploymentStore};
use crate::storage::log_store::LogStore;

pub use metrics::DeploymentMetrics;

pub const DEFAULT_LOG_LIMIT: usize = 200;
pub const MAX_LOG_LIMIT: usize = 1000;
pub const MAX_HISTORY_LIMIT: i64 = 100;

/// Log query options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogQuery {
    /// Minimum severity
    pub level: Option<LogSeverity>,
    pub limit: Option<usize>,
}

/// History query options
///
/// `limit` and `offset` are signed so out-of-range input from callers is
/// rejected here rather than wrapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub instance_id: Option<String>,
    pub template_type: Option<TemplateType>,
    pub status: Option<DeploymentStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            instance_id: None,
            template_type: None,
            status: None,
            limit: 20,
            offset: 0,
        }
    }
}

/// Deployment monitoring service
#[derive(Clone)]
pub struct MonitoringService {
    records: Arc<dyn DeploymentStore>,
    logs: Arc<dyn LogStore>,
}

impl MonitoringService {
    pub fn new(records: Arc<dyn DeploymentStore>, logs: Arc<dyn LogStore>) -> Self {
        Self { records, logs }
    }

    pub async fn get_deployment_status(
        &self,
        deployment_id: &str,
    ) -> Result<Deployment, EngineError> {
        self.records
            .get(deployment_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Deployment {}", deployment_id)))
    }

    /// Entries at or above the requested level, newest first
    ///
    /// Logs outlive their record, so an unknown id yields an empty list.
    pub async fn get_deployment_logs(
        &self,
        deployment_id: &str,
        query: &LogQuery,
    ) -> Result<Vec<DeploymentLogEntry>, EngineError> {
        let limit = match query.limit {
            Some(0) => {
                return Err(EngineError::ValidationError(
                    "limit must be at least 1".to_string(),
                ))
            }
            Some(limit) => limit.min(MAX_LOG_LIMIT),
            None => DEFAULT_LOG_LIMIT,
        };
        self.logs.query(deployment_id, query.level, limit).await
    }

    pub async fn get_active_deployments(&self) -> Result<Vec<Deployment>, EngineError> {
        self.records.list_active().await
    }

    /// One page of deployments, newest first
    pub async fn get_deployment_history(
        &self,
        query: &HistoryQuery,
    ) -> Result<Vec<Deployment>, EngineError> {
        if query.limit < 1 || query.limit > MAX_HISTORY_LIMIT {
            return Err(EngineError::ValidationError(format!(
                "limit must be between 1 and {}, got {}",
                MAX_HISTORY_LIMIT, query.limit
            )));
        }
        if query.offset < 0 {
            return Err(EngineError::ValidationError(format!(
                "offset must not be negative, got {}",
                query.offset
            )));
        }

        let filter = DeploymentFilter {
            instance_id: query.instance_id.clone(),
            template_type: query.template_type,
            status: query.status,
        };
        self.records
            .list(&filter, query.limit as usize, query.offset as usize)
            .await
    }

    pub async fn get_deployment_metrics(&self) -> Result<DeploymentMetrics, EngineError> {
        let records = self.records.list_all().await?;
        Ok(DeploymentMetrics::from_records(&records))
    }
}
