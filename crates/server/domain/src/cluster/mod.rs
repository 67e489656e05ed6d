//! Cluster deployment capability.
//!
//! Backend-agnostic view of the cluster: create, probe, delete and list job
//! workloads and their configuration, and drain workload logs to disk.

pub mod labels;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::events::EventMessage;
use crate::job_instances::{InstanceId, JobInstance, JobInstanceStatus};
use crate::jobs::Job;

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("Configuration {instance_id} not visible after {attempts} attempts ({waited:?})")]
    DeploymentTimeout {
        instance_id: String,
        attempts: u32,
        waited: Duration,
    },

    #[error("Identity {name} not found")]
    IdentityNotFound { name: String },

    #[error("Failed to render settings for {instance_id}: {message}")]
    Render { instance_id: String, message: String },

    #[error("Log capture failed for {instance_id}: {message}")]
    LogCapture { instance_id: String, message: String },

    #[error("Cluster API error: {0}")]
    Api(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }
}

/// Optional label filters for [`ClusterDeployer::list_instances`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceFilter {
    pub request_id: Option<String>,
    pub workflow_id: Option<String>,
}

impl InstanceFilter {
    pub fn all() -> Self {
        Self::default()
    }
}

/// What the cluster reports for one job workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedInstance {
    pub instance_id: InstanceId,
    pub request_id: String,
    pub workflow_id: String,
    pub job_name: String,
    pub job_version: String,
    pub status: JobInstanceStatus,
}

#[async_trait]
pub trait ClusterDeployer: Send + Sync {
    /// Create the instance configuration and wait until it reads back.
    ///
    /// Returns `DeploymentTimeout` when it never becomes visible.
    async fn deploy_config(
        &self,
        event: &EventMessage,
        instance: &JobInstance,
        job: &Job,
    ) -> Result<(), ClusterError>;

    /// Create the single-run workload mounting the configuration
    async fn deploy_workload(
        &self,
        event: &EventMessage,
        instance: &JobInstance,
        job: &Job,
    ) -> Result<(), ClusterError>;

    /// `false` when absent; other failures propagate
    async fn is_config_deployed(&self, instance_id: &InstanceId) -> Result<bool, ClusterError>;

    /// `false` when absent; other failures propagate
    async fn is_workload_deployed(&self, instance_id: &InstanceId) -> Result<bool, ClusterError>;

    /// `NotFound` when absent; callers treat that as done
    async fn delete_config(&self, instance_id: &InstanceId) -> Result<(), ClusterError>;

    /// `NotFound` when absent; callers treat that as done
    async fn delete_workload(&self, instance_id: &InstanceId) -> Result<(), ClusterError>;

    async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<ObservedInstance>, ClusterError>;

    /// Append the workload log to `path` until the stream ends.
    /// Returns the number of bytes written.
    async fn stream_log_to_file(
        &self,
        instance_id: &InstanceId,
        path: &Path,
    ) -> Result<u64, ClusterError>;
}
