//! Deployment executor
//!
//! Owns the lifecycle of every deployment: submission checks, the per-instance
//! lock, the spawned task applying steps one at a time, cancellation at step
//! boundaries and the hand-off to the rollback controller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::deploy::events::{DeploymentUpdate, EventBus};
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, FsmSettings};
use crate::deploy::lock::{InstanceLockGuard, InstanceLocks};
use crate::deploy::planner;
use crate::deploy::recorder::Recorder;
use crate::deploy::remote::{RemoteOutcome, RemoteSystemClient};
use crate::deploy::rollback::{RollbackController, RollbackReport};
use crate::deploy::step::{AppliedStep, DeploymentStep};
use crate::errors::EngineError;
use crate::models::deployment::{
    Deployment, DeploymentStatus, FailureKind, LogSeverity, TemplateType,
};
use crate::models::template::Customizations;
use crate::monitor::MonitoringService;
use crate::storage::deployments::DeploymentStore;
use crate::storage::log_store::LogStore;
use crate::storage::templates::TemplateCatalog;
use crate::utils::{generate_uuid, sha256_hex, Backoff};

/// Request to deploy a template to an instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub instance_id: String,
    pub template_id: String,
    pub template_type: TemplateType,
    #[serde(default)]
    pub customizations: Customizations,
    pub requested_by: String,
    #[serde(default)]
    pub auto_rollback_on_failure: bool,
}

/// Why a running deployment was asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Cancelled,
    Stalled,
}

/// Signal shared between the engine and one deployment task
#[derive(Debug, Default)]
struct RunControl {
    stop: Mutex<Option<StopReason>>,
}

impl RunControl {
    /// The first request wins
    fn request_stop(&self, reason: StopReason) {
        let mut stop = self.stop.lock().unwrap_or_else(|e| e.into_inner());
        stop.get_or_insert(reason);
    }

    fn stop_reason(&self) -> Option<StopReason> {
        *self.stop.lock().unwrap_or_else(|e| e.into_inner())
    }
}

type RunningMap = Arc<Mutex<HashMap<String, Arc<RunControl>>>>;

/// Removes the task's control entry when the task ends, panics included
struct Registration {
    running: RunningMap,
    deployment_id: String,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&self.deployment_id);
    }
}

/// How a step ended when it did not succeed
struct StepFailure {
    kind: FailureKind,
    message: String,
    details: serde_json::Value,
}

/// Deployment engine
#[derive(Clone)]
pub struct DeploymentEngine {
    records: Arc<dyn DeploymentStore>,
    logs: Arc<dyn LogStore>,
    templates: Arc<dyn TemplateCatalog>,
    client: Arc<dyn RemoteSystemClient>,
    locks: Arc<InstanceLocks>,
    events: EventBus,
    settings: FsmSettings,
    recorder: Recorder,
    rollback: RollbackController,
    running: RunningMap,
}

impl DeploymentEngine {
    pub fn new(
        records: Arc<dyn DeploymentStore>,
        logs: Arc<dyn LogStore>,
        templates: Arc<dyn TemplateCatalog>,
        client: Arc<dyn RemoteSystemClient>,
        settings: FsmSettings,
    ) -> Self {
        let locks = InstanceLocks::new();
        let events = EventBus::default();
        let recorder = Recorder::new(records.clone(), logs.clone(), events.clone());
        let rollback = RollbackController::new(
            recorder.clone(),
            client.clone(),
            locks.clone(),
            settings.step_timeout,
        );

        Self {
            records,
            logs,
            templates,
            client,
            locks,
            events,
            settings,
            recorder,
            rollback,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Read-only view over the same stores
    pub fn monitoring(&self) -> MonitoringService {
        MonitoringService::new(self.records.clone(), self.logs.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeploymentUpdate> {
        self.events.subscribe()
    }

    pub fn locks(&self) -> &Arc<InstanceLocks> {
        &self.locks
    }

    /// Whether a task is currently driving the deployment
    pub fn is_running(&self, deployment_id: &str) -> bool {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.contains_key(deployment_id)
    }

    pub fn running_count(&self) -> usize {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.len()
    }

    /// Validate, plan and start a deployment
    ///
    /// Returns the `pending` record; execution continues on a spawned task.
    /// Every error is returned before anything is persisted.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Deployment, EngineError> {
        if request.instance_id.trim().is_empty() {
            return Err(EngineError::ValidationError(
                "instance_id must not be empty".to_string(),
            ));
        }
        if request.template_id.trim().is_empty() {
            return Err(EngineError::ValidationError(
                "template_id must not be empty".to_string(),
            ));
        }

        let template = self.templates.get(&request.template_id).await?;
        if template.template_type != request.template_type {
            return Err(EngineError::ValidationError(format!(
                "Template {} is of type {}, not {}",
                template.id, template.template_type, request.template_type
            )));
        }

        let steps = planner::plan(
            request.template_type,
            &template.structure,
            &request.customizations,
        )?;

        let guard = self.locks.try_acquire(&request.instance_id).ok_or_else(|| {
            EngineError::Conflict(format!(
                "Instance {} already has an active deployment",
                request.instance_id
            ))
        })?;
        if let Some(active) = self.records.find_active_by_instance(&request.instance_id).await? {
            return Err(EngineError::Conflict(format!(
                "Instance {} already has an active deployment ({})",
                request.instance_id, active.id
            )));
        }

        let now = Utc::now();
        let deployment = Deployment {
            id: generate_uuid(),
            instance_id: request.instance_id,
            template_id: request.template_id,
            template_type: request.template_type,
            customizations: request.customizations,
            status: DeploymentStatus::Pending,
            progress: 0,
            current_step: None,
            total_steps: steps.len(),
            completed_steps: 0,
            error_message: None,
            error_kind: None,
            auto_rollback: request.auto_rollback_on_failure,
            plan_digest: sha256_hex(&serde_json::to_vec(&steps)?),
            created_by: request.requested_by,
            created_at: now,
            started_at: None,
            updated_at: now,
            completed_at: None,
            duration_seconds: None,
        };

        // Registered before the record exists so a cancel never sees a
        // pending record without a task behind it
        let control = Arc::new(RunControl::default());
        {
            let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            running.insert(deployment.id.clone(), control.clone());
        }
        let registration = Registration {
            running: self.running.clone(),
            deployment_id: deployment.id.clone(),
        };

        self.records.insert(&deployment).await?;
        self.events.publish(&deployment);

        info!(
            "Submitted deployment {} of template {} to {} ({} step(s))",
            deployment.id,
            deployment.template_id,
            deployment.instance_id,
            steps.len()
        );

        let engine = self.clone();
        let record = deployment.clone();
        tokio::spawn(async move {
            let _registration = registration;
            engine.execute(record, steps, control, guard).await;
        });

        Ok(deployment)
    }

    /// Ask a deployment to stop at its next step boundary
    ///
    /// An active record with no task behind it is failed directly.
    pub async fn cancel(&self, deployment_id: &str) -> Result<Deployment, EngineError> {
        self.stop(deployment_id, StopReason::Cancelled).await
    }

    /// Fail a deployment that stopped making progress
    pub async fn expire(&self, deployment_id: &str) -> Result<Deployment, EngineError> {
        self.stop(deployment_id, StopReason::Stalled).await
    }

    /// Request cancellation of every running deployment
    pub fn stop_all(&self) {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        for (deployment_id, control) in running.iter() {
            debug!("Requesting stop of deployment {}", deployment_id);
            control.request_stop(StopReason::Cancelled);
        }
    }

    /// Roll back a failed deployment
    pub async fn rollback(&self, deployment_id: &str) -> Result<RollbackReport, EngineError> {
        self.rollback.rollback(deployment_id).await
    }

    async fn stop(
        &self,
        deployment_id: &str,
        reason: StopReason,
    ) -> Result<Deployment, EngineError> {
        let deployment = self
            .records
            .get(deployment_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Deployment {}", deployment_id)))?;

        if !deployment.status.is_active() {
            return Err(EngineError::InvalidState(format!(
                "Deployment {} is already {}",
                deployment.id, deployment.status
            )));
        }

        let control = {
            let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            running.get(deployment_id).cloned()
        };
        match control {
            Some(control) => {
                control.request_stop(reason);
                info!("Stop of deployment {} requested ({:?})", deployment_id, reason);
                Ok(deployment)
            }
            None => self.fail_orphan(deployment, reason).await,
        }
    }

    /// Fail an active record that no task drives
    ///
    /// The task may have finished after the record was read, so the record is
    /// read again under the instance lock and only failed if still active.
    async fn fail_orphan(
        &self,
        snapshot: Deployment,
        reason: StopReason,
    ) -> Result<Deployment, EngineError> {
        let _guard = self.locks.try_acquire(&snapshot.instance_id).ok_or_else(|| {
            EngineError::Conflict(format!(
                "Instance {} is locked by another deployment or rollback",
                snapshot.instance_id
            ))
        })?;

        let deployment = self
            .records
            .get(&snapshot.id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Deployment {}", snapshot.id)))?;
        if !deployment.status.is_active() {
            return Err(EngineError::InvalidState(format!(
                "Deployment {} is already {}",
                deployment.id, deployment.status
            )));
        }

        warn!(
            "Deployment {} is {} with no running task; failing it",
            deployment.id, deployment.status
        );
        self.fail_stopped(deployment, reason, None).await
    }

    async fn execute(
        &self,
        mut deployment: Deployment,
        steps: Vec<DeploymentStep>,
        control: Arc<RunControl>,
        guard: InstanceLockGuard,
    ) {
        debug!(
            "Deployment task for {} holds lock on {}",
            deployment.id,
            guard.instance_id()
        );
        let total = steps.len();

        if let Some(reason) = control.stop_reason() {
            self.stop_at_boundary(deployment, reason, 0).await;
            return;
        }

        let mut fsm = DeploymentFsm::new();
        if let Err(e) = fsm.process(DeploymentEvent::Start) {
            error!("Deployment {}: {}", deployment.id, e);
            return;
        }
        let started = Utc::now();
        deployment.status = fsm.state();
        deployment.started_at = Some(started);
        deployment.current_step = steps.first().map(DeploymentStep::description);
        self.recorder.save(&mut deployment).await;
        self.recorder
            .log(
                &deployment.id,
                LogSeverity::Info,
                format!("Deployment started: {} step(s) planned", total),
                json!({
                    "instance_id": deployment.instance_id,
                    "template_id": deployment.template_id,
                    "plan_digest": deployment.plan_digest,
                }),
            )
            .await;

        for (index, step) in steps.iter().enumerate() {
            if let Some(reason) = control.stop_reason() {
                self.stop_at_boundary(deployment, reason, index).await;
                return;
            }

            match self.run_step(&deployment, index, total, step).await {
                Ok(outcome) => {
                    let applied = AppliedStep {
                        index,
                        step: step.clone(),
                        outcome,
                    };
                    // Rollback only reverts journaled steps, so a step that
                    // cannot be journaled ends the deployment
                    if let Err(e) = self.records.append_applied_step(&deployment.id, applied).await {
                        let failure = StepFailure {
                            kind: FailureKind::StepExecution,
                            message: format!(
                                "Step {}/{} '{}' was applied but could not be recorded",
                                index + 1,
                                total,
                                step.description()
                            ),
                            details: json!({
                                "index": index,
                                "kind": step.kind(),
                                "outcome": outcome,
                                "journaled": false,
                                "error": e.to_string(),
                            }),
                        };
                        self.fail(deployment, &mut fsm, failure).await;
                        return;
                    }

                    deployment.completed_steps = index + 1;
                    self.recorder
                        .log(
                            &deployment.id,
                            LogSeverity::Info,
                            format!(
                                "Completed step {}/{}: {}",
                                index + 1,
                                total,
                                step.description()
                            ),
                            json!({ "index": index, "kind": step.kind(), "outcome": outcome }),
                        )
                        .await;

                    // The last step goes straight to success below
                    if index + 1 < total {
                        if let Err(e) = fsm.process(DeploymentEvent::StepCompleted) {
                            error!("Deployment {}: {}", deployment.id, e);
                        }
                        deployment.progress = progress_for(index + 1, total);
                        deployment.current_step = steps.get(index + 1).map(DeploymentStep::description);
                        self.recorder.save(&mut deployment).await;
                    }
                }
                Err(failure) => {
                    self.fail(deployment, &mut fsm, failure).await;
                    return;
                }
            }
        }

        if let Err(e) = fsm.process(DeploymentEvent::Complete) {
            error!("Deployment {}: {}", deployment.id, e);
            return;
        }
        deployment.status = fsm.state();
        deployment.progress = 100;
        deployment.current_step = None;
        deployment.mark_completed(Utc::now());
        self.recorder.save(&mut deployment).await;
        self.recorder
            .log(
                &deployment.id,
                LogSeverity::Info,
                "Deployment completed",
                json!({
                    "steps": total,
                    "duration_seconds": deployment.duration_seconds,
                }),
            )
            .await;
    }

    /// Apply one step, retrying idempotent steps on retryable errors
    async fn run_step(
        &self,
        deployment: &Deployment,
        index: usize,
        total: usize,
        step: &DeploymentStep,
    ) -> Result<RemoteOutcome, StepFailure> {
        let max_attempts = step.max_attempts(self.settings.max_attempts);
        let backoff = Backoff::doubling(self.settings.retry_delay);
        let position = format!("Step {}/{}", index + 1, total);
        let description = step.description();

        let mut attempt = 1;
        loop {
            debug!(
                "Deployment {}: {} attempt {}/{}",
                deployment.id, position, attempt, max_attempts
            );
            let result = tokio::time::timeout(
                self.settings.step_timeout,
                step.apply(self.client.as_ref(), &deployment.instance_id),
            )
            .await;

            let err = match result {
                Ok(Ok(outcome)) => return Ok(outcome),
                Ok(Err(err)) => err,
                Err(_) => {
                    return Err(StepFailure {
                        kind: FailureKind::Timeout,
                        message: format!(
                            "{} '{}' timed out after {:?}",
                            position,
                            description,
                            self.settings.step_timeout
                        ),
                        details: json!({
                            "index": index,
                            "kind": step.kind(),
                            "attempt": attempt,
                        }),
                    });
                }
            };

            if err.kind.is_retryable() && attempt < max_attempts {
                let delay = backoff.delay(attempt - 1);
                self.recorder
                    .log(
                        &deployment.id,
                        LogSeverity::Warn,
                        format!(
                            "Attempt {}/{} of {} '{}' failed: {}; retrying in {}ms",
                            attempt,
                            max_attempts,
                            position,
                            description,
                            err.kind.summary(),
                            delay.as_millis()
                        ),
                        json!({
                            "index": index,
                            "kind": step.kind(),
                            "attempt": attempt,
                            "error_kind": err.kind,
                            "error": err.message,
                        }),
                    )
                    .await;
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            return Err(StepFailure {
                kind: FailureKind::StepExecution,
                message: format!("{} '{}' failed: {}", position, description, err.kind.summary()),
                details: json!({
                    "index": index,
                    "kind": step.kind(),
                    "attempts": attempt,
                    "error_kind": err.kind,
                    "error": err.message,
                }),
            });
        }
    }

    /// Record a step failure, then roll back if the submitter asked for it
    async fn fail(&self, mut deployment: Deployment, fsm: &mut DeploymentFsm, failure: StepFailure) {
        if let Err(e) = fsm.process(DeploymentEvent::Fail {
            kind: failure.kind,
            message: failure.message.clone(),
        }) {
            error!("Deployment {}: {}", deployment.id, e);
            return;
        }
        deployment.status = fsm.state();
        deployment.error_message = fsm.error().map(str::to_string);
        deployment.error_kind = fsm.error_kind();
        deployment.mark_completed(Utc::now());
        self.recorder.save(&mut deployment).await;
        self.recorder
            .log(&deployment.id, LogSeverity::Error, failure.message, failure.details)
            .await;

        if deployment.auto_rollback {
            self.auto_rollback(deployment).await;
        }
    }

    async fn stop_at_boundary(&self, deployment: Deployment, reason: StopReason, next_step: usize) {
        match self.fail_stopped(deployment, reason, Some(next_step)).await {
            Ok(stopped) if stopped.auto_rollback => self.auto_rollback(stopped).await,
            Ok(_) => {}
            Err(e) => error!("Failed to stop deployment: {}", e),
        }
    }

    async fn auto_rollback(&self, deployment: Deployment) {
        let deployment_id = deployment.id.clone();
        match self.rollback.rollback_locked(deployment).await {
            Ok(report) if !report.is_complete() => warn!(
                "Automatic rollback of {} left {} step(s) unreverted",
                deployment_id,
                report.failures().len()
            ),
            Ok(_) => info!("Automatic rollback of {} finished", deployment_id),
            Err(e) => error!("Automatic rollback of {} failed: {}", deployment_id, e),
        }
    }

    /// Fail a deployment that was cancelled or stalled. `next_step` is the
    /// index of the step that will not run, when known.
    async fn fail_stopped(
        &self,
        mut deployment: Deployment,
        reason: StopReason,
        next_step: Option<usize>,
    ) -> Result<Deployment, EngineError> {
        let position = match next_step {
            Some(index) if index < deployment.total_steps => {
                format!(" before step {}/{}", index + 1, deployment.total_steps)
            }
            _ => String::new(),
        };
        let (kind, level, message) = match reason {
            StopReason::Cancelled => (
                FailureKind::Cancelled,
                LogSeverity::Warn,
                format!("Deployment cancelled{}", position),
            ),
            StopReason::Stalled => (
                FailureKind::Timeout,
                LogSeverity::Error,
                format!("Deployment made no progress within the stall timeout{}", position),
            ),
        };

        let mut fsm = DeploymentFsm::resume(
            deployment.status,
            deployment.error_message.clone(),
            deployment.error_kind,
        );
        fsm.process(DeploymentEvent::Fail {
            kind,
            message: message.clone(),
        })
        .map_err(EngineError::InvalidState)?;

        deployment.status = fsm.state();
        deployment.error_message = fsm.error().map(str::to_string);
        deployment.error_kind = fsm.error_kind();
        deployment.current_step = None;
        deployment.mark_completed(Utc::now());
        self.recorder.save(&mut deployment).await;
        self.recorder
            .log(
                &deployment.id,
                level,
                message,
                json!({ "completed_steps": deployment.completed_steps }),
            )
            .await;
        Ok(deployment)
    }
}

/// Rounded share of completed steps, held below 100 until success
pub fn progress_for(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (100 * completed + total / 2) / total;
    pct.min(99) as u8
}
