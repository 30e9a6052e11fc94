//! JSON documents on disk

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::EngineError;

/// A JSON file: the settings file or one template
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Parse the file, or `None` when it does not exist
    pub async fn read_json_opt<T: DeserializeOwned>(&self) -> Result<Option<T>, EngineError> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, EngineError> {
        self.read_json_opt()
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("File {}", self.path.display())))
    }

    /// Replace the file through a synced temporary sibling so readers never
    /// see a partial document
    pub async fn write_json<T: Serialize>(&self, value: &T) -> Result<(), EngineError> {
        let contents = serde_json::to_vec_pretty(value)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&contents).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}
