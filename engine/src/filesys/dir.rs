//! Directory helpers

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::EngineError;
use crate::filesys::file::File;

/// A directory of JSON documents
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .is_ok_and(|metadata| metadata.is_dir())
    }

    /// Create the directory and its parents
    pub async fn create(&self) -> Result<(), EngineError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Remove the directory with its contents; a missing directory is fine
    pub async fn remove(&self) -> Result<(), EngineError> {
        match fs::remove_dir_all(&self.path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// `*.json` files directly inside the directory, sorted by path
    pub async fn json_files(&self) -> Result<Vec<File>, EngineError> {
        let mut paths = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_json = path.extension().is_some_and(|ext| ext == "json");
            if is_json && entry.file_type().await?.is_file() {
                paths.push(path);
            }
        }

        paths.sort();
        Ok(paths.into_iter().map(File::new).collect())
    }

    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    /// Fresh uniquely named directory under the system temp dir
    pub async fn temp(prefix: &str) -> Result<Dir, EngineError> {
        let dir = Dir::new(std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4())));
        dir.create().await?;
        Ok(dir)
    }
}
