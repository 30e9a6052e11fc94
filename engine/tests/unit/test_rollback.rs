use deployd::deploy::remote::RemoteErrorKind;
use deployd::deploy::rollback::RollbackStepOutcome;
use deployd::errors::EngineError;
use deployd::models::deployment::{DeploymentStatus, LogSeverity};
use deployd::monitor::LogQuery;

use crate::common::{hr_template, request, three_step_template, Harness};

/// Run the three-step template with its custom field rejected
async fn failed_deployment(harness: &Harness) -> String {
    harness.client.fail(
        "create_custom_field sale.order.x_region",
        RemoteErrorKind::Rejected,
        "field type not allowed",
    );
    let pending = harness
        .engine
        .submit(request("instance-1", &three_step_template()))
        .await
        .unwrap();
    let failed = harness.settle(&pending.id).await;
    assert_eq!(failed.status, DeploymentStatus::Failed);
    failed.id
}

#[tokio::test]
async fn test_rollback_unknown_deployment() {
    let harness = Harness::new();
    let err = harness.engine.rollback("missing").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn test_rollback_requires_failed_status() {
    let harness = Harness::new();
    let pending = harness
        .engine
        .submit(request("instance-1", &hr_template()))
        .await
        .unwrap();
    harness.settle(&pending.id).await;

    let err = harness.engine.rollback(&pending.id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
    assert!(harness
        .client
        .calls()
        .iter()
        .all(|call| !call.starts_with("uninstall") && !call.starts_with("delete")));
}

#[tokio::test]
async fn test_rollback_runs_once() {
    let harness = Harness::new();
    let id = failed_deployment(&harness).await;

    harness.engine.rollback(&id).await.unwrap();
    let err = harness.engine.rollback(&id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
    assert_eq!(harness.client.count("uninstall_module sale"), 1);
}

#[tokio::test]
async fn test_rollback_conflicts_with_lock_holder() {
    let harness = Harness::new();
    let id = failed_deployment(&harness).await;

    let guard = harness.engine.locks().try_acquire("instance-1").unwrap();
    let err = harness.engine.rollback(&id).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
    drop(guard);

    let report = harness.engine.rollback(&id).await.unwrap();
    assert_eq!(report.deployment.status, DeploymentStatus::RolledBack);
}

#[tokio::test]
async fn test_partial_rollback_failure_is_reported() {
    let harness = Harness::new();
    let id = failed_deployment(&harness).await;
    harness.client.fail(
        "uninstall_module sale",
        RemoteErrorKind::Conflict,
        "module sale is required by sale_stock",
    );

    let report = harness.engine.rollback(&id).await.unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.failures().len(), 1);
    assert!(matches!(
        report.ensure_complete(),
        Err(EngineError::RollbackPartialFailure { failed_steps: 1, .. })
    ));
    match &report.steps[0].outcome {
        RollbackStepOutcome::Failed { reason } => assert!(!reason.contains("sale_stock")),
        other => panic!("unexpected outcome {:?}", other),
    }

    // The record still ends rolled back so the instance can be used again
    let record = harness.settle(&id).await;
    assert_eq!(record.status, DeploymentStatus::RolledBack);

    let warnings = harness
        .engine
        .monitoring()
        .get_deployment_logs(
            &id,
            &LogQuery {
                level: Some(LogSeverity::Warn),
                limit: None,
            },
        )
        .await
        .unwrap();
    assert!(warnings
        .iter()
        .any(|entry| entry.message == "Rollback finished with 1 unreverted step(s)"));
}

#[tokio::test]
async fn test_seed_data_needs_manual_cleanup() {
    let harness = Harness::new();
    harness.client.fail(
        "create_dashboard HR Overview",
        RemoteErrorKind::Rejected,
        "unknown widget",
    );
    let pending = harness
        .engine
        .submit(request("acme-prod", &hr_template()))
        .await
        .unwrap();
    let failed = harness.settle(&pending.id).await;
    assert_eq!(failed.completed_steps, 5);

    let report = harness.engine.rollback(&failed.id).await.unwrap();
    assert!(report.is_complete());

    // Newest first: seed data, workflow, field, then both modules
    let indices: Vec<usize> = report.steps.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![4, 3, 2, 1, 0]);
    assert_eq!(
        report.steps[0].outcome,
        RollbackStepOutcome::ManualCleanupRequired
    );
    assert!(report.steps[1..]
        .iter()
        .all(|s| s.outcome == RollbackStepOutcome::Reverted));
    assert_eq!(harness.client.count("seed_data hr.department"), 1);
    assert_eq!(
        harness.client.calls()[6..],
        [
            "delete_workflow Onboarding".to_string(),
            "delete_custom_field hr.employee.x_badge".to_string(),
            "uninstall_module hr_holidays".to_string(),
            "uninstall_module hr".to_string(),
        ]
    );
}
