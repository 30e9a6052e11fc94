//! Mapping of engine errors to HTTP responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use openapi_server::models::ErrorResponse;
use tracing::error;

use crate::errors::EngineError;

/// Error returned by handlers
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            EngineError::ValidationError(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Conflict(_)
            | EngineError::InvalidState(_)
            | EngineError::Cancelled(_) => StatusCode::CONFLICT,
            EngineError::Planning(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            EngineError::StepExecution(_) | EngineError::RollbackPartialFailure { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorResponse {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "Internal error".to_string()
        } else {
            self.0.to_string()
        };
        let details = match &self.0 {
            EngineError::Planning(planning) => serde_json::to_value(planning).ok(),
            _ => None,
        };
        ErrorResponse {
            error: self.0.code().to_string(),
            message,
            details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (status, Json(self.body())).into_response()
    }
}
