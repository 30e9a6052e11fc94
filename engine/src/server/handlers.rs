//! HTTP request handlers

use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::stream::{self, Stream};
use openapi_server::models::{
    ErrorResponse, HealthResponse, HistoryQueryParams, ListResponse, LogsQueryParams,
    PageResponse, SubmitDeploymentRequest, VersionResponse,
};
use serde::Serialize;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tracing::{debug, warn};

use crate::deploy::events::DeploymentUpdate;
use crate::deploy::executor::{DeploymentEngine, SubmitRequest};
use crate::deploy::rollback::RollbackReport;
use crate::errors::EngineError;
use crate::models::deployment::{DeploymentStatus, LogSeverity, TemplateType};
use crate::models::template::Customizations;
use crate::monitor::{HistoryQuery, LogQuery};
use crate::server::errors::ApiError;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "deployd".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

fn parse<T>(field: &str, value: Option<&str>) -> Result<Option<T>, EngineError>
where
    T: FromStr<Err = String>,
{
    value
        .map(|v| {
            T::from_str(v).map_err(|e| EngineError::ValidationError(format!("{}: {}", field, e)))
        })
        .transpose()
}

/// Submit handler
pub async fn submit_handler(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<SubmitDeploymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let template_type = parse::<TemplateType>("template_type", Some(&body.template_type))?
        .ok_or_else(|| EngineError::ValidationError("template_type is required".to_string()))?;
    let customizations = match body.customizations {
        Some(value) => serde_json::from_value::<Customizations>(value).map_err(|e| {
            EngineError::ValidationError(format!("customizations: {}", e))
        })?,
        None => Customizations::default(),
    };

    let deployment = state
        .engine
        .submit(SubmitRequest {
            instance_id: body.instance_id,
            template_id: body.template_id,
            template_type,
            customizations,
            requested_by: body.requested_by,
            auto_rollback_on_failure: body.auto_rollback_on_failure,
        })
        .await?;

    Ok((StatusCode::ACCEPTED, Json(deployment)))
}

/// History handler
pub async fn history_handler(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<HistoryQueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let defaults = HistoryQuery::default();
    let query = HistoryQuery {
        instance_id: params.instance_id,
        template_type: parse::<TemplateType>("template_type", params.template_type.as_deref())?,
        status: parse::<DeploymentStatus>("status", params.status.as_deref())?,
        limit: params.limit.unwrap_or(defaults.limit),
        offset: params.offset.unwrap_or(defaults.offset),
    };

    let items = state.monitor.get_deployment_history(&query).await?;
    Ok(Json(PageResponse {
        items,
        limit: query.limit,
        offset: query.offset,
    }))
}

/// Active deployments handler
pub async fn active_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, ApiError> {
    let items = state.monitor.get_active_deployments().await?;
    let total = items.len();
    Ok(Json(ListResponse { items, total }))
}

/// Metrics handler
pub async fn metrics_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.monitor.get_deployment_metrics().await?))
}

/// Deployment status handler
pub async fn status_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.monitor.get_deployment_status(&id).await?))
}

/// Deployment logs handler
pub async fn logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Query(params): Query<LogsQueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = LogQuery {
        level: parse::<LogSeverity>("level", params.level.as_deref())?,
        limit: params.limit,
    };
    let items = state.monitor.get_deployment_logs(&id, &query).await?;
    let total = items.len();
    Ok(Json(ListResponse { items, total }))
}

/// Rollback response; `error` is set when some steps could not be reverted
#[derive(Debug, Serialize)]
pub struct RollbackResponse {
    #[serde(flatten)]
    pub report: RollbackReport,
    pub error: Option<ErrorResponse>,
}

/// Rollback handler
pub async fn rollback_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.engine.rollback(&id).await?;
    let error = report
        .ensure_complete()
        .err()
        .map(|e| ApiError(e).body());
    Ok(Json(RollbackResponse { report, error }))
}

/// Cancel handler
pub async fn cancel_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deployment = state.engine.cancel(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(deployment)))
}

/// How often a stream waiting on an automatic rollback checks that the
/// deployment task is still alive
const ROLLBACK_WAIT_POLL: Duration = Duration::from_millis(250);

struct UpdateStream {
    rx: broadcast::Receiver<DeploymentUpdate>,
    engine: DeploymentEngine,
    deployment_id: String,
    auto_rollback: bool,
    pending: Option<DeploymentUpdate>,
    awaiting_rollback: bool,
    finished: bool,
}

impl UpdateStream {
    /// Next update of this deployment, or `None` when no more can arrive
    async fn next_update(&mut self) -> Option<DeploymentUpdate> {
        loop {
            let received = if self.awaiting_rollback {
                match tokio::time::timeout(ROLLBACK_WAIT_POLL, self.rx.recv()).await {
                    Ok(received) => received,
                    Err(_) if self.engine.is_running(&self.deployment_id) => continue,
                    // The task is gone; take what it published on the way out
                    Err(_) => return self.drain(),
                }
            } else {
                self.rx.recv().await
            };

            match received {
                Ok(update) if update.deployment_id == self.deployment_id => return Some(update),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event stream for {} skipped {} update(s)", self.deployment_id, skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    fn drain(&mut self) -> Option<DeploymentUpdate> {
        loop {
            match self.rx.try_recv() {
                Ok(update) if update.deployment_id == self.deployment_id => return Some(update),
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => {
                    debug!(
                        "Deployment {} stopped without finishing its rollback",
                        self.deployment_id
                    );
                    return None;
                }
            }
        }
    }
}

/// No further updates will follow this one
fn is_final(update: &DeploymentUpdate, auto_rollback: bool) -> bool {
    match update.status {
        DeploymentStatus::Success | DeploymentStatus::RolledBack => true,
        DeploymentStatus::Failed => !auto_rollback,
        DeploymentStatus::Pending | DeploymentStatus::InProgress => false,
    }
}

/// Server-sent events of one deployment's updates
///
/// Starts with the current state and ends after the final update. A failed
/// deployment awaiting its automatic rollback ends the stream once its task
/// is gone, even if the rollback never published a result.
pub async fn events_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // Subscribe first so no update between the read and the subscription is lost
    let rx = state.engine.subscribe();
    let current = state.monitor.get_deployment_status(&id).await?;

    let initial = UpdateStream {
        rx,
        engine: state.engine.clone(),
        deployment_id: current.id.clone(),
        auto_rollback: current.auto_rollback,
        pending: Some(DeploymentUpdate::from(&current)),
        awaiting_rollback: false,
        finished: false,
    };

    let updates = stream::unfold(initial, |mut s| async move {
        if s.finished {
            return None;
        }
        let update = match s.pending.take() {
            Some(update) => update,
            None => s.next_update().await?,
        };
        s.finished = is_final(&update, s.auto_rollback);
        s.awaiting_rollback = update.status == DeploymentStatus::Failed;

        let event = Event::default()
            .event("deployment")
            .json_data(&update)
            .unwrap_or_else(|_| Event::default().comment("unserializable update"));
        Some((Ok::<_, Infallible>(event), s))
    });

    Ok(Sse::new(updates).keep_alive(KeepAlive::default()))
}
