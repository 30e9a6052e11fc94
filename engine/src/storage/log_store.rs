//! Deployment log store

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::errors::EngineError;
use crate::models::deployment::{DeploymentLogEntry, LogSeverity};

/// Append-only per-deployment log
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn append(&self, entry: DeploymentLogEntry) -> Result<(), EngineError>;

    /// Entries at or above `min_level`, newest first, at most `limit`
    async fn query(
        &self,
        deployment_id: &str,
        min_level: Option<LogSeverity>,
        limit: usize,
    ) -> Result<Vec<DeploymentLogEntry>, EngineError>;
}

/// In-memory log store
#[derive(Default)]
pub struct InMemoryLogStore {
    entries: RwLock<HashMap<String, Vec<DeploymentLogEntry>>>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn append(&self, entry: DeploymentLogEntry) -> Result<(), EngineError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(entry.deployment_id.clone())
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn query(
        &self,
        deployment_id: &str,
        min_level: Option<LogSeverity>,
        limit: usize,
    ) -> Result<Vec<DeploymentLogEntry>, EngineError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let Some(log) = entries.get(deployment_id) else {
            return Ok(Vec::new());
        };

        // Insertion order is append order, so reversing gives newest first
        // even when two entries share a timestamp.
        Ok(log
            .iter()
            .rev()
            .filter(|e| min_level.is_none_or(|level| e.level >= level))
            .take(limit)
            .cloned()
            .collect())
    }
}
