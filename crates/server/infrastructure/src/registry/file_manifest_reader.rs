//! Project manifest read from a JSON file on every refresh

use async_trait::async_trait;
use std::path::PathBuf;

use orch_server_domain::{DomainError, ManifestReader, ProjectManifest, Result};

#[derive(Debug, Clone)]
pub struct FileManifestReader {
    path: PathBuf,
}

impl FileManifestReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ManifestReader for FileManifestReader {
    async fn read(&self) -> Result<ProjectManifest> {
        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|e| DomainError::Manifest {
                message: format!("cannot read {}: {}", self.path.display(), e),
            })?;
        serde_json::from_slice(&raw).map_err(|e| DomainError::Manifest {
            message: format!("invalid manifest {}: {}", self.path.display(), e),
        })
    }
}
