//! Ports the job registry reads from

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::shared_kernel::Result;

/// Container registry listing
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// All repository names in the registry catalog
    async fn list_repositories(&self) -> Result<Vec<String>>;

    /// Tags of a single repository
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>>;

    /// Host prefix used to build image references (`{prefix}/{repository}`)
    fn image_prefix(&self) -> &str;
}

/// Project manifest mapping repository paths to logical job names
#[async_trait]
pub trait ManifestReader: Send + Sync {
    async fn read(&self) -> Result<ProjectManifest>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectManifest {
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectEntry {
    /// Repository path inside the registry, e.g. `jobs/transcode`
    pub path: String,
    /// Logical job name
    pub name: String,
    #[serde(default)]
    pub identity_name: Option<String>,
}

impl ProjectManifest {
    pub fn find_by_path(&self, repository: &str) -> Option<&ProjectEntry> {
        self.projects.iter().find(|p| p.path == repository)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_parses_optional_identity() {
        let raw = r#"{"projects":[
            {"path":"jobs/transcode","name":"transcode"},
            {"path":"jobs/index","name":"index","identity_name":"indexer-id"}
        ]}"#;
        let manifest: ProjectManifest = serde_json::from_str(raw).unwrap();

        assert_eq!(manifest.projects.len(), 2);
        assert!(manifest.find_by_path("jobs/transcode").unwrap().identity_name.is_none());
        assert_eq!(
            manifest.find_by_path("jobs/index").unwrap().identity_name.as_deref(),
            Some("indexer-id")
        );
        assert!(manifest.find_by_path("jobs/missing").is_none());
    }
}
