use async_trait::async_trait;

use super::aggregate::Workflow;
use crate::shared_kernel::{Page, Result};

/// Repository trait for Workflow persistence
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Insert a workflow.
    ///
    /// Fails with `WorkflowAlreadyExists` when the id is taken; the existing
    /// record is left untouched.
    async fn register(&self, workflow: &Workflow) -> Result<()>;

    async fn find_by_id(&self, workflow_id: &str) -> Result<Option<Workflow>>;

    /// All workflows in creation order
    async fn find_all(&self, page: Page) -> Result<Vec<Workflow>>;
}
