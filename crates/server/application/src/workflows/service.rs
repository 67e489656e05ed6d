//! Workflow registration and queries

use std::sync::Arc;
use tracing::info;

use orch_server_domain::{
    DomainError, JobCatalog, JobRef, Page, Result, Workflow, WorkflowRepository,
};

pub struct WorkflowService {
    workflows: Arc<dyn WorkflowRepository>,
    catalog: Arc<dyn JobCatalog>,
}

impl WorkflowService {
    pub fn new(workflows: Arc<dyn WorkflowRepository>, catalog: Arc<dyn JobCatalog>) -> Self {
        Self { workflows, catalog }
    }

    /// Register a workflow whose routes all point at registered job versions.
    ///
    /// Nothing is stored when any `job:version` pair is unknown. Returns the
    /// stored record.
    pub async fn register(&self, workflow: Workflow) -> Result<Workflow> {
        if workflow.workflow_id.trim().is_empty() {
            return Err(DomainError::InvalidArgument {
                field: "workflow_id".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        let missing = self.unregistered_jobs(&workflow).await;
        if !missing.is_empty() {
            return Err(DomainError::UnregisteredJobs { missing });
        }

        self.workflows.register(&workflow).await?;
        info!(
            workflow_id = %workflow.workflow_id,
            routes = workflow.event_routes.len(),
            "Workflow registered"
        );

        self.get(&workflow.workflow_id).await
    }

    async fn unregistered_jobs(&self, workflow: &Workflow) -> Vec<JobRef> {
        let mut missing = Vec::new();
        for job_ref in workflow.job_refs() {
            if !self
                .catalog
                .is_existing(&job_ref.job_name, &job_ref.job_version)
                .await
            {
                missing.push(job_ref);
            }
        }
        missing
    }

    pub async fn list(&self, page: Page) -> Result<Vec<Workflow>> {
        self.workflows.find_all(page).await
    }

    pub async fn get(&self, workflow_id: &str) -> Result<Workflow> {
        self.workflows
            .find_by_id(workflow_id)
            .await?
            .ok_or_else(|| DomainError::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            })
    }
}
