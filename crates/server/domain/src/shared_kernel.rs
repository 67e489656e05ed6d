use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cluster::ClusterError;

/// Errores del dominio
#[derive(thiserror::Error, Debug)]
pub enum DomainError {
    #[error("Workflow not found: {workflow_id}")]
    WorkflowNotFound { workflow_id: String },

    #[error("Job not found: {job_name}")]
    JobNotFound { job_name: String },

    #[error("Job instance not found: {instance_id}")]
    JobInstanceNotFound { instance_id: String },

    #[error("Log file not found for job instance {instance_id}")]
    LogFileNotFound { instance_id: String },

    #[error("Workflow is already existing: {workflow_id}")]
    WorkflowAlreadyExists { workflow_id: String },

    #[error("Unregistered jobs: [{}]", format_refs(.missing))]
    UnregisteredJobs { missing: Vec<JobRef> },

    #[error("Configuration for {instance_id} not visible after {attempts} attempts")]
    DeploymentTimeout { instance_id: String, attempts: u32 },

    #[error("Cluster resource not found: {kind} {name}")]
    ClusterResourceNotFound { kind: String, name: String },

    #[error("Cluster error: {message}")]
    Cluster { message: String },

    #[error("Registry error: {message}")]
    Registry { message: String },

    #[error("Manifest error: {message}")]
    Manifest { message: String },

    #[error("Invalid {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("Infrastructure error: {message}")]
    InfrastructureError { message: String },
}

impl DomainError {
    /// True for every "absent" variant of the taxonomy
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DomainError::WorkflowNotFound { .. }
                | DomainError::JobNotFound { .. }
                | DomainError::JobInstanceNotFound { .. }
                | DomainError::LogFileNotFound { .. }
                | DomainError::ClusterResourceNotFound { .. }
        )
    }
}

impl From<ClusterError> for DomainError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::DeploymentTimeout {
                instance_id,
                attempts,
                ..
            } => DomainError::DeploymentTimeout {
                instance_id,
                attempts,
            },
            ClusterError::NotFound { kind, name } => DomainError::ClusterResourceNotFound {
                kind: kind.to_string(),
                name,
            },
            other => DomainError::Cluster {
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;

/// A `job:version` pair referenced by an event route
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobRef {
    pub job_name: String,
    pub job_version: String,
}

impl JobRef {
    pub fn new(job_name: impl Into<String>, job_version: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            job_version: job_version.into(),
        }
    }
}

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.job_name, self.job_version)
    }
}

fn format_refs(refs: &[JobRef]) -> String {
    refs.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Offset pagination shared by every list operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub skip: usize,
    pub limit: usize,
}

impl Page {
    pub const DEFAULT_LIMIT: usize = 10;

    /// `limit` must be at least 1
    pub fn new(skip: usize, limit: usize) -> Result<Self> {
        if limit == 0 {
            return Err(DomainError::InvalidArgument {
                field: "limit".to_string(),
                reason: "must be greater than or equal to 1".to_string(),
            });
        }
        Ok(Self { skip, limit })
    }

    /// Slice an ordered sequence to this page
    pub fn apply<T, I>(&self, items: I) -> Vec<T>
    where
        I: IntoIterator<Item = T>,
    {
        items.into_iter().skip(self.skip).take(self.limit).collect()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_unregistered_jobs_lists_pairs() {
        let err = DomainError::UnregisteredJobs {
            missing: vec![JobRef::new("transcode", "1.0"), JobRef::new("index", "2")],
        };
        assert_eq!(err.to_string(), "Unregistered jobs: [transcode:1.0, index:2]");
    }

    #[test]
    fn test_timeout_stays_distinguishable() {
        let err: DomainError = ClusterError::DeploymentTimeout {
            instance_id: "transcode-1".to_string(),
            attempts: 30,
            waited: Duration::from_secs(60),
        }
        .into();
        assert!(matches!(
            err,
            DomainError::DeploymentTimeout { attempts: 30, .. }
        ));
    }

    #[test]
    fn test_page_rejects_zero_limit() {
        assert!(Page::new(0, 0).is_err());
        let page = Page::new(2, 2).unwrap();
        assert_eq!(page.apply(1..=10), vec![3, 4]);
    }

    #[test]
    fn test_default_page() {
        let page = Page::default();
        assert_eq!(page.apply(0..100).len(), 10);
    }
}
