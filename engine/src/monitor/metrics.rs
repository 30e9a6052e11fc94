//! Aggregate deployment metrics

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::deployment::{Deployment, DeploymentStatus};

/// Aggregates over every known deployment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentMetrics {
    pub total: u64,
    pub successful: u64,

    /// Failed deployments, rolled back or not
    pub failed: u64,
    pub rolled_back: u64,

    /// Pending or in progress
    pub active: u64,
    pub by_template_type: BTreeMap<String, u64>,

    /// Percentage of finished deployments that succeeded
    pub success_rate: f64,

    /// Over deployments with a recorded duration only
    pub average_duration_seconds: Option<f64>,
}

impl DeploymentMetrics {
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a Deployment>,
    {
        let mut metrics = Self::default();
        let mut duration_total = 0.0;
        let mut duration_count = 0u64;

        for deployment in records {
            metrics.total += 1;
            match deployment.status {
                DeploymentStatus::Success => metrics.successful += 1,
                DeploymentStatus::Failed => metrics.failed += 1,
                DeploymentStatus::RolledBack => {
                    metrics.failed += 1;
                    metrics.rolled_back += 1;
                }
                DeploymentStatus::Pending | DeploymentStatus::InProgress => metrics.active += 1,
            }
            *metrics
                .by_template_type
                .entry(deployment.template_type.to_string())
                .or_default() += 1;

            if let Some(duration) = deployment.duration_seconds {
                duration_total += duration;
                duration_count += 1;
            }
        }

        let finished = metrics.successful + metrics.failed;
        if finished > 0 {
            metrics.success_rate = metrics.successful as f64 * 100.0 / finished as f64;
        }
        if duration_count > 0 {
            metrics.average_duration_seconds = Some(duration_total / duration_count as f64);
        }
        metrics
    }
}
