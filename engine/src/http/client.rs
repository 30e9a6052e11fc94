//! HTTP client for ERP instances

use std::collections::HashMap;
use std::time::Duration;

use openapi_client::models::{OperationResponse, OperationStatus};
use reqwest::{Client, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, error};
use url::Url;

use crate::deploy::remote::{RemoteError, RemoteErrorKind, RemoteOutcome, RemoteResult};
use crate::errors::EngineError;
use crate::storage::settings::ErpSettings;

/// Connection details for one instance
struct Endpoint {
    base_url: Url,
    database: Option<String>,
    api_key: SecretString,
}

/// HTTP/JSON client for the instance deployment API
///
/// Every instance is reached at `{base_url}/api/v1/instances/{instance_id}/...`
/// with its own API key.
pub struct ErpHttpClient {
    client: Client,
    endpoints: HashMap<String, Endpoint>,
}

impl ErpHttpClient {
    /// Create a client for every configured instance
    pub fn new(settings: ErpSettings) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        let mut endpoints = HashMap::new();
        for (instance_id, instance) in settings.instances {
            let base_url = Url::parse(&instance.base_url).map_err(|e| {
                EngineError::ConfigError(format!(
                    "Invalid base_url for instance {}: {}",
                    instance_id, e
                ))
            })?;
            if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
                return Err(EngineError::ConfigError(format!(
                    "base_url for instance {} must be an http(s) URL",
                    instance_id
                )));
            }
            endpoints.insert(
                instance_id,
                Endpoint {
                    base_url,
                    database: instance.database,
                    api_key: instance.api_key,
                },
            );
        }

        Ok(Self { client, endpoints })
    }

    /// Configured instance ids
    pub fn instances(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.endpoints.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// URL of an instance resource; path segments are percent-encoded
    pub fn url(&self, instance_id: &str, segments: &[&str]) -> Result<Url, RemoteError> {
        let endpoint = self.endpoint(instance_id)?;
        build_url(&endpoint.base_url, instance_id, segments)
    }

    fn endpoint(&self, instance_id: &str) -> Result<&Endpoint, RemoteError> {
        self.endpoints.get(instance_id).ok_or_else(|| {
            RemoteError::new(
                RemoteErrorKind::Rejected,
                format!("No connection settings for instance {}", instance_id),
            )
        })
    }

    pub(crate) async fn post<B: Serialize>(
        &self,
        instance_id: &str,
        segments: &[&str],
        body: &B,
    ) -> RemoteResult {
        self.send(Method::POST, instance_id, segments, Some(body)).await
    }

    /// A missing object counts as already removed
    pub(crate) async fn delete(&self, instance_id: &str, segments: &[&str]) -> RemoteResult {
        match self
            .send::<()>(Method::DELETE, instance_id, segments, None)
            .await
        {
            Err(e) if e.kind == RemoteErrorKind::NotFound => Ok(RemoteOutcome::AlreadyPresent),
            result => result,
        }
    }

    async fn send<B: Serialize>(
        &self,
        method: Method,
        instance_id: &str,
        segments: &[&str],
        body: Option<&B>,
    ) -> RemoteResult {
        let endpoint = self.endpoint(instance_id)?;
        let url = build_url(&endpoint.base_url, instance_id, segments)?;
        debug!("{} {}", method, url);

        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .bearer_auth(endpoint.api_key.expose_secret());
        if let Some(database) = &endpoint.database {
            request = request.header("X-Database", database);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::new(RemoteErrorKind::Transport, e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(RemoteOutcome::Applied);
        }
        if status.is_success() {
            let body: OperationResponse = response.json().await.map_err(|e| {
                RemoteError::new(
                    RemoteErrorKind::Rejected,
                    format!("Unexpected response body: {}", e),
                )
            })?;
            return Ok(match body.status {
                OperationStatus::Applied => RemoteOutcome::Applied,
                OperationStatus::AlreadyPresent => RemoteOutcome::AlreadyPresent,
            });
        }

        let text = response.text().await.unwrap_or_default();
        error!("{} {} failed: {}", method, url, status);
        Err(classify(status, text))
    }
}

fn build_url(base_url: &Url, instance_id: &str, segments: &[&str]) -> Result<Url, RemoteError> {
    let mut url = base_url.clone();
    url.path_segments_mut()
        .map_err(|_| {
            RemoteError::new(
                RemoteErrorKind::Rejected,
                format!("base_url of instance {} cannot carry a path", instance_id),
            )
        })?
        .pop_if_empty()
        .extend(["api", "v1", "instances", instance_id])
        .extend(segments);
    Ok(url)
}

/// Map a non-success status to an error kind
pub fn classify(status: StatusCode, body: String) -> RemoteError {
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteErrorKind::Unauthorized,
        StatusCode::NOT_FOUND => RemoteErrorKind::NotFound,
        StatusCode::CONFLICT => RemoteErrorKind::Conflict,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => RemoteErrorKind::Unavailable,
        s if s.is_server_error() => RemoteErrorKind::Unavailable,
        _ => RemoteErrorKind::Rejected,
    };
    RemoteError::new(kind, format!("{}: {}", status, body))
}
