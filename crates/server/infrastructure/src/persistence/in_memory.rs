//! In-memory repositories
//!
//! Used by tests and when the server runs without a database. Records are
//! kept in insertion order so listings match the Postgres ordering.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use orch_server_domain::{
    DomainError, InstanceId, JobInstance, JobInstanceRepository, JobInstanceStatus, Page, Result,
    StatusTransition, Workflow, WorkflowRepository,
};

#[derive(Clone, Default)]
pub struct InMemoryJobInstanceRepository {
    instances: Arc<RwLock<Vec<JobInstance>>>,
}

impl InMemoryJobInstanceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobInstanceRepository for InMemoryJobInstanceRepository {
    async fn register(&self, instance: &JobInstance) -> Result<()> {
        let mut instances = self.instances.write().await;
        if instances
            .iter()
            .any(|i| i.instance_id == instance.instance_id)
        {
            return Err(DomainError::InfrastructureError {
                message: format!("job instance {} already registered", instance.instance_id),
            });
        }
        instances.push(instance.clone());
        Ok(())
    }

    async fn advance_status(
        &self,
        instance_id: &InstanceId,
        status: JobInstanceStatus,
    ) -> Result<StatusTransition> {
        let mut instances = self.instances.write().await;
        Ok(instances
            .iter_mut()
            .find(|i| &i.instance_id == instance_id)
            .map_or(StatusTransition::Missing, |i| i.advance_status(status)))
    }

    async fn mark_failed(&self, instance_id: &InstanceId, details: &str) -> Result<()> {
        let mut instances = self.instances.write().await;
        let instance = instances
            .iter_mut()
            .find(|i| &i.instance_id == instance_id)
            .ok_or_else(|| DomainError::JobInstanceNotFound {
                instance_id: instance_id.to_string(),
            })?;
        instance.mark_failed(details);
        Ok(())
    }

    async fn find_by_id(&self, instance_id: &InstanceId) -> Result<Option<JobInstance>> {
        let instances = self.instances.read().await;
        Ok(instances
            .iter()
            .find(|i| &i.instance_id == instance_id)
            .cloned())
    }

    async fn find_all(&self, page: Page) -> Result<Vec<JobInstance>> {
        let instances = self.instances.read().await;
        Ok(page.apply(instances.iter().cloned()))
    }

    async fn find_by_request_id(&self, request_id: &str, page: Page) -> Result<Vec<JobInstance>> {
        let instances = self.instances.read().await;
        Ok(page.apply(
            instances
                .iter()
                .filter(|i| i.request_id == request_id)
                .cloned(),
        ))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryWorkflowRepository {
    workflows: Arc<RwLock<Vec<Workflow>>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn register(&self, workflow: &Workflow) -> Result<()> {
        let mut workflows = self.workflows.write().await;
        if workflows
            .iter()
            .any(|w| w.workflow_id == workflow.workflow_id)
        {
            return Err(DomainError::WorkflowAlreadyExists {
                workflow_id: workflow.workflow_id.clone(),
            });
        }
        workflows.push(workflow.clone());
        Ok(())
    }

    async fn find_by_id(&self, workflow_id: &str) -> Result<Option<Workflow>> {
        let workflows = self.workflows.read().await;
        Ok(workflows
            .iter()
            .find(|w| w.workflow_id == workflow_id)
            .cloned())
    }

    async fn find_all(&self, page: Page) -> Result<Vec<Workflow>> {
        let workflows = self.workflows.read().await;
        Ok(page.apply(workflows.iter().cloned()))
    }
}
