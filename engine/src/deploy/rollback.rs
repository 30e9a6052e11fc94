//! Rollback controller
//!
//! Reverts the steps a failed deployment applied, newest first. Rollback is
//! best effort: a step that cannot be reverted is logged and skipped, and the
//! deployment always ends `rolled_back` so the instance can be deployed to
//! again.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm};
use crate::deploy::lock::InstanceLocks;
use crate::deploy::recorder::Recorder;
use crate::deploy::remote::{RemoteOutcome, RemoteSystemClient};
use crate::errors::EngineError;
use crate::models::deployment::{Deployment, DeploymentStatus, LogSeverity};

/// What happened to one applied step during rollback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RollbackStepOutcome {
    /// The inverse operation succeeded
    Reverted,

    /// The instance already had this state before the deployment
    NotApplied,

    /// The step has no inverse operation
    ManualCleanupRequired,

    /// The inverse operation failed
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackStepResult {
    /// Zero-based position in the original plan
    pub index: usize,
    pub description: String,
    #[serde(flatten)]
    pub outcome: RollbackStepOutcome,
}

/// Result of a rollback, returned to the caller for alerting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackReport {
    pub deployment: Deployment,

    /// In the order they were processed (reverse plan order)
    pub steps: Vec<RollbackStepResult>,
}

impl RollbackReport {
    pub fn failures(&self) -> Vec<&RollbackStepResult> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, RollbackStepOutcome::Failed { .. }))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failures().is_empty()
    }

    /// `RollbackPartialFailure` when any inverse operation failed
    pub fn ensure_complete(&self) -> Result<(), EngineError> {
        let failed_steps = self.failures().len();
        if failed_steps == 0 {
            return Ok(());
        }
        Err(EngineError::RollbackPartialFailure {
            deployment_id: self.deployment.id.clone(),
            failed_steps,
        })
    }
}

/// Rollback controller
#[derive(Clone)]
pub struct RollbackController {
    recorder: Recorder,
    client: Arc<dyn RemoteSystemClient>,
    locks: Arc<InstanceLocks>,
    step_timeout: Duration,
}

impl RollbackController {
    pub fn new(
        recorder: Recorder,
        client: Arc<dyn RemoteSystemClient>,
        locks: Arc<InstanceLocks>,
        step_timeout: Duration,
    ) -> Self {
        Self {
            recorder,
            client,
            locks,
            step_timeout,
        }
    }

    /// Roll back a failed deployment, taking the instance lock for the duration
    pub async fn rollback(&self, deployment_id: &str) -> Result<RollbackReport, EngineError> {
        let deployment = self.load_failed(deployment_id).await?;

        let _guard = self.locks.try_acquire(&deployment.instance_id).ok_or_else(|| {
            EngineError::Conflict(format!(
                "Instance {} is locked by another deployment or rollback",
                deployment.instance_id
            ))
        })?;

        // Re-read under the lock so two rollbacks cannot both proceed
        let deployment = self.load_failed(deployment_id).await?;
        self.rollback_locked(deployment).await
    }

    async fn load_failed(&self, deployment_id: &str) -> Result<Deployment, EngineError> {
        let deployment = self
            .recorder
            .records()
            .get(deployment_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Deployment {}", deployment_id)))?;

        if deployment.status != DeploymentStatus::Failed {
            return Err(EngineError::InvalidState(format!(
                "Deployment {} is {}; only failed deployments can be rolled back",
                deployment.id, deployment.status
            )));
        }
        Ok(deployment)
    }

    /// Roll back with the instance lock already held by the caller
    pub async fn rollback_locked(
        &self,
        mut deployment: Deployment,
    ) -> Result<RollbackReport, EngineError> {
        let mut fsm = DeploymentFsm::resume(
            deployment.status,
            deployment.error_message.clone(),
            deployment.error_kind,
        );
        if !fsm.can_rollback() {
            return Err(EngineError::InvalidState(format!(
                "Deployment {} is {}",
                deployment.id, deployment.status
            )));
        }

        let applied = self.recorder.records().applied_steps(&deployment.id).await?;
        let total = deployment.total_steps;
        info!(
            "Rolling back deployment {} on {} ({} applied step(s))",
            deployment.id,
            deployment.instance_id,
            applied.len()
        );
        self.recorder
            .log(
                &deployment.id,
                LogSeverity::Info,
                format!("Rollback started: {} applied step(s) to revert", applied.len()),
                json!({ "applied_steps": applied.len() }),
            )
            .await;

        let mut results = Vec::with_capacity(applied.len());
        for entry in applied.iter().rev() {
            let position = format!("step {}/{}", entry.index + 1, total);
            let description = entry.step.description();

            let outcome = if entry.outcome == RemoteOutcome::AlreadyPresent {
                self.recorder
                    .log(
                        &deployment.id,
                        LogSeverity::Info,
                        format!(
                            "Nothing to revert for {} ({}): it was already present",
                            position, description
                        ),
                        json!({ "index": entry.index }),
                    )
                    .await;
                RollbackStepOutcome::NotApplied
            } else {
                self.revert(&deployment, entry.index, &position, &description, &entry.step)
                    .await
            };

            results.push(RollbackStepResult {
                index: entry.index,
                description,
                outcome,
            });
        }

        fsm.process(DeploymentEvent::RolledBack)
            .map_err(EngineError::InvalidState)?;
        deployment.status = fsm.state();
        deployment.current_step = None;
        self.recorder.save(&mut deployment).await;

        let report = RollbackReport {
            deployment,
            steps: results,
        };
        let failed = report.failures().len();
        let (level, message) = if failed == 0 {
            (LogSeverity::Info, "Rollback finished".to_string())
        } else {
            (
                LogSeverity::Warn,
                format!("Rollback finished with {} unreverted step(s)", failed),
            )
        };
        self.recorder
            .log(
                &report.deployment.id,
                level,
                message,
                json!({ "processed": report.steps.len(), "failed": failed }),
            )
            .await;

        Ok(report)
    }

    async fn revert(
        &self,
        deployment: &Deployment,
        index: usize,
        position: &str,
        description: &str,
        step: &crate::deploy::step::DeploymentStep,
    ) -> RollbackStepOutcome {
        let action = step.rollback();
        if action.is_none() {
            self.recorder
                .log(
                    &deployment.id,
                    LogSeverity::Warn,
                    format!(
                        "Manual cleanup required for {} ({}): step has no inverse operation",
                        position, description
                    ),
                    json!({ "index": index, "kind": step.kind() }),
                )
                .await;
            return RollbackStepOutcome::ManualCleanupRequired;
        }

        let result = tokio::time::timeout(
            self.step_timeout,
            action.revert(self.client.as_ref(), &deployment.instance_id),
        )
        .await;

        match result {
            Ok(Ok(_)) => {
                self.recorder
                    .log(
                        &deployment.id,
                        LogSeverity::Info,
                        format!("Reverted {} ({})", position, description),
                        json!({ "index": index, "rollback": action }),
                    )
                    .await;
                RollbackStepOutcome::Reverted
            }
            Ok(Err(e)) => {
                let reason = e.kind.summary().to_string();
                self.recorder
                    .log(
                        &deployment.id,
                        LogSeverity::Error,
                        format!("Failed to revert {} ({}): {}", position, description, reason),
                        json!({
                            "index": index,
                            "rollback": action,
                            "error_kind": e.kind,
                            "error": e.message,
                        }),
                    )
                    .await;
                RollbackStepOutcome::Failed { reason }
            }
            Err(_) => {
                let reason = format!("timed out after {:?}", self.step_timeout);
                self.recorder
                    .log(
                        &deployment.id,
                        LogSeverity::Error,
                        format!("Failed to revert {} ({}): {}", position, description, reason),
                        json!({ "index": index, "rollback": action }),
                    )
                    .await;
                RollbackStepOutcome::Failed { reason }
            }
        }
    }
}
