//! Job catalog model

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::shared_kernel::Page;

/// A deployable job as known to the registry.
///
/// Snapshots are immutable; a refresh replaces them wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_name: String,
    /// Image repository reference, without tag
    pub image: String,
    /// Available versions in registry order
    pub versions: Vec<String>,
    /// External credential binding the job runs under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_name: Option<String>,
}

impl Job {
    pub fn has_version(&self, version: &str) -> bool {
        self.versions.iter().any(|v| v == version)
    }

    /// Full image reference for one version, e.g. `registry/jobs/transcode:1.0`
    pub fn image_reference(&self, version: &str) -> String {
        format!("{}:{}", self.image, version)
    }
}

/// Read side of the job registry
#[async_trait]
pub trait JobCatalog: Send + Sync {
    /// List jobs ordered by name
    async fn get_all(&self, page: Page) -> Vec<Job>;

    async fn get_by_name(&self, job_name: &str) -> Option<Job>;

    async fn is_existing(&self, job_name: &str, version: &str) -> bool;
}
