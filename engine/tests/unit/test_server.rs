use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use deployd::deploy::remote::RemoteErrorKind;
use deployd::server::serve::router;
use deployd::server::state::ServerState;

use crate::common::{engine_with_store, wait_idle, FaultyStore, Harness, ScriptedClient};

fn app(harness: &Harness) -> Router {
    router(Arc::new(ServerState::new(harness.engine.clone())))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn submission(instance_id: &str, template_id: &str, template_type: &str) -> Value {
    json!({
        "instance_id": instance_id,
        "template_id": template_id,
        "template_type": template_type,
        "requested_by": "consultant@example.com",
    })
}

#[tokio::test]
async fn test_health() {
    let harness = Harness::new();
    let (status, body) = send(app(&harness), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "deployd");
}

#[tokio::test]
async fn test_submit_and_read_back() {
    let harness = Harness::new();

    let (status, body) = send(
        app(&harness),
        post_json("/deployments", submission("acme-prod", "hr-onboarding", "hr")),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");
    let id = body["id"].as_str().unwrap().to_string();

    harness.settle(&id).await;

    let (status, body) = send(app(&harness), get(&format!("/deployments/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["progress"], 100);

    let (status, body) = send(
        app(&harness),
        get(&format!("/deployments/{}/logs?level=info&limit=2", id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["items"][0]["message"], "Deployment completed");

    let (status, body) = send(app(&harness), get("/deployments?instance_id=acme-prod")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["limit"], 20);

    let (status, body) = send(app(&harness), get("/deployments/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["successful"], 1);

    let (status, body) = send(app(&harness), get("/deployments/active")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_submission_errors() {
    let harness = Harness::new();

    let (status, body) = send(
        app(&harness),
        post_json("/deployments", submission("acme", "hr-onboarding", "payroll")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, body) = send(
        app(&harness),
        post_json("/deployments", submission("acme", "nope", "hr")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let mut broken = submission("acme", "template-A", "custom");
    broken["customizations"] = json!({"skip_modules": ["sale"]});
    let (status, body) = send(app(&harness), post_json("/deployments", broken)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "planning_error");
    assert_eq!(body["details"]["unresolved"][0]["name"], "sale");
}

#[tokio::test]
async fn test_conflicting_submission() {
    let harness = Harness::new();
    harness
        .client
        .delay("install_module hr", std::time::Duration::from_millis(300));

    let (status, first) = send(
        app(&harness),
        post_json("/deployments", submission("acme", "hr-onboarding", "hr")),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = send(
        app(&harness),
        post_json("/deployments", submission("acme", "template-A", "custom")),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    harness.settle(first["id"].as_str().unwrap()).await;
}

#[tokio::test]
async fn test_history_validation() {
    let harness = Harness::new();
    for uri in [
        "/deployments?limit=0",
        "/deployments?limit=101",
        "/deployments?offset=-1",
        "/deployments?status=exploded",
    ] {
        let (status, body) = send(app(&harness), get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body["error"], "validation_error", "{}", uri);
    }
}

#[tokio::test]
async fn test_unknown_deployment() {
    let harness = Harness::new();

    let (status, _) = send(app(&harness), get("/deployments/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(app(&harness), post_json("/deployments/missing/rollback", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(app(&harness), post_json("/deployments/missing/cancel", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(app(&harness), get("/deployments/missing/logs")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_rollback_endpoint() {
    let harness = Harness::new();
    harness.client.fail(
        "create_custom_field sale.order.x_region",
        RemoteErrorKind::Rejected,
        "bad selection",
    );
    harness.client.fail(
        "uninstall_module sale",
        RemoteErrorKind::Unavailable,
        "worker crashed",
    );

    let (_, body) = send(
        app(&harness),
        post_json("/deployments", submission("acme", "template-A", "custom")),
    )
    .await;
    let id = body["id"].as_str().unwrap().to_string();
    harness.settle(&id).await;

    let (status, body) = send(
        app(&harness),
        post_json(&format!("/deployments/{}/rollback", id), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deployment"]["status"], "rolled_back");
    assert_eq!(body["steps"][0]["outcome"], "failed");
    assert_eq!(body["error"]["error"], "rollback_partial_failure");

    // Second rollback is refused
    let (status, body) = send(
        app(&harness),
        post_json(&format!("/deployments/{}/rollback", id), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_state");
}

#[tokio::test]
async fn test_event_stream_of_finished_deployment() {
    let harness = Harness::new();
    let (_, body) = send(
        app(&harness),
        post_json("/deployments", submission("acme", "template-A", "custom")),
    )
    .await;
    let id = body["id"].as_str().unwrap().to_string();
    harness.settle(&id).await;

    let response = app(&harness)
        .oneshot(get(&format!("/deployments/{}/events", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // A finished deployment yields its final state and closes
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("event: deployment"), "{}", text);
    assert!(text.contains("\"status\":\"success\""), "{}", text);
}

#[tokio::test]
async fn test_event_stream_ends_when_auto_rollback_cannot_start() {
    // The journal cannot be read, so the automatic rollback errors out and
    // the deployment stays failed with no further update
    let client = ScriptedClient::new();
    client.delay("create_custom_field sale.order.x_region", Duration::from_millis(100));
    client.fail(
        "create_custom_field sale.order.x_region",
        RemoteErrorKind::Rejected,
        "invalid field type",
    );
    let engine = engine_with_store(Arc::new(FaultyStore::failing_journal_reads()), client);
    let app = router(Arc::new(ServerState::new(engine.clone())));

    let mut body = submission("acme", "template-A", "custom");
    body["auto_rollback_on_failure"] = json!(true);
    let (status, body) = send(app.clone(), post_json("/deployments", body)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = body["id"].as_str().unwrap().to_string();

    let response = app
        .oneshot(get(&format!("/deployments/{}/events", id)))
        .await
        .unwrap();
    let bytes = tokio::time::timeout(
        Duration::from_secs(5),
        to_bytes(response.into_body(), usize::MAX),
    )
    .await
    .expect("event stream did not end")
    .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("\"status\":\"failed\""), "{}", text);
    assert!(!text.contains("rolled_back"), "{}", text);

    wait_idle(&engine, &id).await;
}
