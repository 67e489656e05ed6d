//! Test doubles for the cluster and the registry sources.
//!
//! Shared by the unit tests of this crate, its integration tests and the
//! HTTP tests of the interface crate.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock};

use orch_server_domain::{
    ClusterDeployer, ClusterError, DomainError, EventMessage, InstanceFilter, InstanceId, Job,
    JobInstance, JobInstanceStatus, ManifestReader, ObservedInstance, ProjectEntry,
    ProjectManifest, RegistryClient, Result,
};

// ============================================================================
// Fake cluster
// ============================================================================

/// Every call made against [`FakeClusterDeployer`], in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    DeployConfig(InstanceId),
    DeployWorkload(InstanceId),
    DeleteConfig(InstanceId),
    DeleteWorkload(InstanceId),
    StreamLog(InstanceId),
}

#[derive(Debug, Default)]
struct FakeClusterState {
    configs: HashSet<InstanceId>,
    workloads: BTreeMap<InstanceId, ObservedInstance>,
    calls: Vec<ClusterCall>,
    config_timeouts: HashSet<String>,
    workload_failures: HashSet<String>,
    workload_lost_replies: HashSet<String>,
    log_failures: HashSet<InstanceId>,
    delete_failures: HashSet<InstanceId>,
    workload_delete_failure: bool,
    probe_failure: bool,
    list_failure: bool,
}

/// In-memory cluster. Workloads start `Pending`; tests move them with
/// [`FakeClusterDeployer::set_phase`].
#[derive(Debug, Clone, Default)]
pub struct FakeClusterDeployer {
    state: Arc<Mutex<FakeClusterState>>,
}

impl FakeClusterDeployer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration of `job_name` never becomes visible
    pub async fn time_out_config_for(&self, job_name: &str) {
        self.state.lock().await.config_timeouts.insert(job_name.to_string());
    }

    /// Workload creation of `job_name` fails after the config was created
    pub async fn fail_workload_for(&self, job_name: &str) {
        self.state
            .lock()
            .await
            .workload_failures
            .insert(job_name.to_string());
    }

    /// Workload of `job_name` is created but the call still reports an error
    pub async fn lose_workload_reply_for(&self, job_name: &str) {
        self.state
            .lock()
            .await
            .workload_lost_replies
            .insert(job_name.to_string());
    }

    /// Every workload deletion fails with a transient API error
    pub async fn fail_workload_deletes(&self, fail: bool) {
        self.state.lock().await.workload_delete_failure = fail;
    }

    /// Existence probes fail with a transient API error
    pub async fn fail_probes(&self, fail: bool) {
        self.state.lock().await.probe_failure = fail;
    }

    pub async fn fail_log_for(&self, instance_id: &InstanceId) {
        self.state.lock().await.log_failures.insert(instance_id.clone());
    }

    /// Deletions of this instance fail with a transient API error
    pub async fn fail_deletes_for(&self, instance_id: &InstanceId) {
        self.state
            .lock()
            .await
            .delete_failures
            .insert(instance_id.clone());
    }

    pub async fn heal_deletes_for(&self, instance_id: &InstanceId) {
        self.state.lock().await.delete_failures.remove(instance_id);
    }

    pub async fn fail_listing(&self, fail: bool) {
        self.state.lock().await.list_failure = fail;
    }

    pub async fn set_phase(&self, instance_id: &InstanceId, status: JobInstanceStatus) {
        if let Some(observed) = self.state.lock().await.workloads.get_mut(instance_id) {
            observed.status = status;
        }
    }

    /// Place a workload with no configuration and no stored record
    pub async fn insert_orphan(&self, observed: ObservedInstance) {
        self.state
            .lock()
            .await
            .workloads
            .insert(observed.instance_id.clone(), observed);
    }

    pub async fn calls(&self) -> Vec<ClusterCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn has_config(&self, instance_id: &InstanceId) -> bool {
        self.state.lock().await.configs.contains(instance_id)
    }

    pub async fn has_workload(&self, instance_id: &InstanceId) -> bool {
        self.state.lock().await.workloads.contains_key(instance_id)
    }

    pub async fn workload_ids(&self) -> Vec<InstanceId> {
        self.state.lock().await.workloads.keys().cloned().collect()
    }
}

#[async_trait]
impl ClusterDeployer for FakeClusterDeployer {
    async fn deploy_config(
        &self,
        _event: &EventMessage,
        instance: &JobInstance,
        _job: &Job,
    ) -> std::result::Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(ClusterCall::DeployConfig(instance.instance_id.clone()));
        state.configs.insert(instance.instance_id.clone());
        if state.config_timeouts.contains(&instance.job_name) {
            return Err(ClusterError::DeploymentTimeout {
                instance_id: instance.instance_id.to_string(),
                attempts: 30,
                waited: Duration::from_secs(60),
            });
        }
        Ok(())
    }

    async fn deploy_workload(
        &self,
        _event: &EventMessage,
        instance: &JobInstance,
        _job: &Job,
    ) -> std::result::Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(ClusterCall::DeployWorkload(instance.instance_id.clone()));
        if state.workload_failures.contains(&instance.job_name) {
            return Err(ClusterError::Api("admission webhook denied the pod".to_string()));
        }
        state.workloads.insert(
            instance.instance_id.clone(),
            ObservedInstance {
                instance_id: instance.instance_id.clone(),
                request_id: instance.request_id.clone(),
                workflow_id: instance.workflow_id.clone(),
                job_name: instance.job_name.clone(),
                job_version: instance.job_version.clone(),
                status: JobInstanceStatus::Pending,
            },
        );
        if state.workload_lost_replies.contains(&instance.job_name) {
            return Err(ClusterError::Api("request timed out".to_string()));
        }
        Ok(())
    }

    async fn is_config_deployed(
        &self,
        instance_id: &InstanceId,
    ) -> std::result::Result<bool, ClusterError> {
        let state = self.state.lock().await;
        if state.probe_failure {
            return Err(ClusterError::Api("connection reset".to_string()));
        }
        Ok(state.configs.contains(instance_id))
    }

    async fn is_workload_deployed(
        &self,
        instance_id: &InstanceId,
    ) -> std::result::Result<bool, ClusterError> {
        let state = self.state.lock().await;
        if state.probe_failure {
            return Err(ClusterError::Api("connection reset".to_string()));
        }
        Ok(state.workloads.contains_key(instance_id))
    }

    async fn delete_config(&self, instance_id: &InstanceId) -> std::result::Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        state.calls.push(ClusterCall::DeleteConfig(instance_id.clone()));
        if state.delete_failures.contains(instance_id) {
            return Err(ClusterError::Api("etcd leader changed".to_string()));
        }
        if state.configs.remove(instance_id) {
            Ok(())
        } else {
            Err(ClusterError::NotFound {
                kind: "ConfigMap",
                name: instance_id.to_string(),
            })
        }
    }

    async fn delete_workload(
        &self,
        instance_id: &InstanceId,
    ) -> std::result::Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        state.calls.push(ClusterCall::DeleteWorkload(instance_id.clone()));
        if state.workload_delete_failure || state.delete_failures.contains(instance_id) {
            return Err(ClusterError::Api("etcd leader changed".to_string()));
        }
        match state.workloads.remove(instance_id) {
            Some(_) => Ok(()),
            None => Err(ClusterError::NotFound {
                kind: "Pod",
                name: instance_id.to_string(),
            }),
        }
    }

    async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> std::result::Result<Vec<ObservedInstance>, ClusterError> {
        let state = self.state.lock().await;
        if state.list_failure {
            return Err(ClusterError::Api("connection refused".to_string()));
        }
        Ok(state
            .workloads
            .values()
            .filter(|o| {
                filter.request_id.as_deref().is_none_or(|r| r == o.request_id)
                    && filter.workflow_id.as_deref().is_none_or(|w| w == o.workflow_id)
            })
            .cloned()
            .collect())
    }

    async fn stream_log_to_file(
        &self,
        instance_id: &InstanceId,
        path: &Path,
    ) -> std::result::Result<u64, ClusterError> {
        {
            let mut state = self.state.lock().await;
            state.calls.push(ClusterCall::StreamLog(instance_id.clone()));
            if state.log_failures.contains(instance_id) {
                return Err(ClusterError::LogCapture {
                    instance_id: instance_id.to_string(),
                    message: "stream reset".to_string(),
                });
            }
        }

        let line = format!("log output of {}\n", instance_id);
        let capture = |e: std::io::Error| ClusterError::LogCapture {
            instance_id: instance_id.to_string(),
            message: e.to_string(),
        };
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(capture)?;
        file.write_all(line.as_bytes()).await.map_err(capture)?;
        file.flush().await.map_err(capture)?;
        Ok(line.len() as u64)
    }
}

// ============================================================================
// Registry sources
// ============================================================================

/// Registry listing served from memory
#[derive(Debug, Clone)]
pub struct StaticRegistryClient {
    prefix: String,
    repositories: Arc<Mutex<BTreeMap<String, Vec<String>>>>,
    unavailable: Arc<AtomicBool>,
    gate: Arc<RwLock<()>>,
    listings: Arc<AtomicUsize>,
}

impl StaticRegistryClient {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            repositories: Arc::new(Mutex::new(BTreeMap::new())),
            unavailable: Arc::new(AtomicBool::new(false)),
            gate: Arc::new(RwLock::new(())),
            listings: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Repository listings block until the returned guard is dropped
    pub async fn hold(&self) -> OwnedRwLockWriteGuard<()> {
        Arc::clone(&self.gate).write_owned().await
    }

    /// Number of repository listings started so far
    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    pub async fn put(&self, repository: &str, tags: &[&str]) {
        self.repositories.lock().await.insert(
            repository.to_string(),
            tags.iter().map(|t| t.to_string()).collect(),
        );
    }

    pub async fn remove(&self, repository: &str) {
        self.repositories.lock().await.remove(repository);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DomainError::Registry {
                message: "registry unreachable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryClient for StaticRegistryClient {
    async fn list_repositories(&self) -> Result<Vec<String>> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        let _open = self.gate.read().await;
        self.check_available()?;
        Ok(self.repositories.lock().await.keys().cloned().collect())
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        self.check_available()?;
        self.repositories
            .lock()
            .await
            .get(repository)
            .cloned()
            .ok_or_else(|| DomainError::Registry {
                message: format!("unknown repository {}", repository),
            })
    }

    fn image_prefix(&self) -> &str {
        &self.prefix
    }
}

/// Manifest held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticManifestReader {
    manifest: Arc<Mutex<ProjectManifest>>,
}

impl StaticManifestReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_project(&self, path: &str, name: &str, identity_name: Option<&str>) {
        self.manifest.lock().await.projects.push(ProjectEntry {
            path: path.to_string(),
            name: name.to_string(),
            identity_name: identity_name.map(str::to_string),
        });
    }
}

#[async_trait]
impl ManifestReader for StaticManifestReader {
    async fn read(&self) -> Result<ProjectManifest> {
        Ok(self.manifest.lock().await.clone())
    }
}
