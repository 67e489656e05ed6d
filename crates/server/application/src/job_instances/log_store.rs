//! On-disk layout of captured job logs: `{root}/{request_id}/{instance_id}`

use std::path::{Path, PathBuf};

use orch_server_domain::{DomainError, InstanceId, Result};

#[derive(Debug, Clone)]
pub struct LogStore {
    root: PathBuf,
}

impl LogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of an instance log. Both components must be plain names.
    pub fn log_path(&self, request_id: &str, instance_id: &InstanceId) -> Result<PathBuf> {
        validate_component("request_id", request_id)?;
        validate_component("instance_id", instance_id.as_str())?;
        Ok(self.root.join(request_id).join(instance_id.as_str()))
    }

    /// Create the request directory and return the log path
    pub async fn prepare(&self, request_id: &str, instance_id: &InstanceId) -> Result<PathBuf> {
        let path = self.log_path(request_id, instance_id)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| DomainError::InfrastructureError {
                    message: format!("Failed to create log directory {}: {}", dir.display(), e),
                })?;
        }
        Ok(path)
    }

    /// Path of a captured log, if one was written
    pub async fn existing_log(
        &self,
        request_id: &str,
        instance_id: &InstanceId,
    ) -> Result<Option<PathBuf>> {
        let path = self.log_path(request_id, instance_id)?;
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Ok(Some(path)),
            Ok(false) => Ok(None),
            Err(e) => Err(DomainError::InfrastructureError {
                message: format!("Failed to stat {}: {}", path.display(), e),
            }),
        }
    }
}

fn validate_component(field: &str, value: &str) -> Result<()> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0']);
    if invalid {
        return Err(DomainError::InvalidArgument {
            field: field.to_string(),
            reason: format!("'{}' is not usable as a path component", value),
        });
    }
    Ok(())
}
