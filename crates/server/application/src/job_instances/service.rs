//! Read-side use cases over job instances

use std::path::PathBuf;
use std::sync::Arc;

use super::log_store::LogStore;
use orch_server_domain::{
    DomainError, InstanceId, JobInstance, JobInstanceRepository, Page, Result,
};

pub struct JobInstanceService {
    instances: Arc<dyn JobInstanceRepository>,
    log_store: LogStore,
}

impl JobInstanceService {
    pub fn new(instances: Arc<dyn JobInstanceRepository>, log_store: LogStore) -> Self {
        Self {
            instances,
            log_store,
        }
    }

    pub async fn list(&self, page: Page) -> Result<Vec<JobInstance>> {
        self.instances.find_all(page).await
    }

    pub async fn get(&self, instance_id: &InstanceId) -> Result<JobInstance> {
        self.instances
            .find_by_id(instance_id)
            .await?
            .ok_or_else(|| DomainError::JobInstanceNotFound {
                instance_id: instance_id.to_string(),
            })
    }

    pub async fn list_by_request(&self, request_id: &str, page: Page) -> Result<Vec<JobInstance>> {
        self.instances.find_by_request_id(request_id, page).await
    }

    /// Captured log of a finished instance.
    ///
    /// `JobInstanceNotFound` without a record, `LogFileNotFound` when no log
    /// was captured yet.
    pub async fn log_file(&self, instance_id: &InstanceId) -> Result<PathBuf> {
        let instance = self.get(instance_id).await?;
        self.log_store
            .existing_log(&instance.request_id, &instance.instance_id)
            .await?
            .ok_or_else(|| DomainError::LogFileNotFound {
                instance_id: instance_id.to_string(),
            })
    }
}
