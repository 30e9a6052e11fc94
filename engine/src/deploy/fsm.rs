//! Finite State Machine for template deployments

use std::time::Duration;

use crate::models::deployment::{DeploymentStatus, FailureKind};

/// FSM settings
#[derive(Debug, Clone)]
pub struct FsmSettings {
    /// Upper bound for a single remote call
    pub step_timeout: Duration,

    /// Attempts for idempotent steps (non-idempotent steps get one)
    pub max_attempts: u32,

    /// Base delay between attempts, doubled on each retry
    pub retry_delay: Duration,
}

impl Default for FsmSettings {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(120),
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Task picked the deployment up
    Start,

    /// One step applied
    StepCompleted,

    /// Last step applied
    Complete,

    /// Execution stopped on a step failure, cancellation or timeout
    Fail { kind: FailureKind, message: String },

    /// Applied steps were reverted
    RolledBack,
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentStatus,
    error: Option<String>,
    error_kind: Option<FailureKind>,
}

impl DeploymentFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            state: DeploymentStatus::Pending,
            error: None,
            error_kind: None,
        }
    }

    /// Resume an FSM from a persisted status
    pub fn resume(
        state: DeploymentStatus,
        error: Option<String>,
        error_kind: Option<FailureKind>,
    ) -> Self {
        Self {
            state,
            error,
            error_kind,
        }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentStatus {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn error_kind(&self) -> Option<FailureKind> {
        self.error_kind
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            // From Pending
            (DeploymentStatus::Pending, DeploymentEvent::Start) => DeploymentStatus::InProgress,
            // Cancellation before the first step runs
            (DeploymentStatus::Pending, DeploymentEvent::Fail { kind, message }) => {
                self.error = Some(message.clone());
                self.error_kind = Some(*kind);
                DeploymentStatus::Failed
            }

            // From InProgress
            (DeploymentStatus::InProgress, DeploymentEvent::StepCompleted) => {
                DeploymentStatus::InProgress
            }
            (DeploymentStatus::InProgress, DeploymentEvent::Complete) => DeploymentStatus::Success,
            (DeploymentStatus::InProgress, DeploymentEvent::Fail { kind, message }) => {
                self.error = Some(message.clone());
                self.error_kind = Some(*kind);
                DeploymentStatus::Failed
            }

            // From Failed
            (DeploymentStatus::Failed, DeploymentEvent::RolledBack) => DeploymentStatus::RolledBack,

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }

    /// Check if the deployment can be rolled back
    pub fn can_rollback(&self) -> bool {
        self.state == DeploymentStatus::Failed
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
