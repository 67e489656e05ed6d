use async_trait::async_trait;

use super::aggregate::{InstanceId, JobInstance, JobInstanceStatus, StatusTransition};
use crate::shared_kernel::{Page, Result};

/// Repository trait for JobInstance persistence.
///
/// Every operation touches a single record and is atomic for it.
#[async_trait]
pub trait JobInstanceRepository: Send + Sync {
    /// Insert a new instance. Ids are unique.
    async fn register(&self, instance: &JobInstance) -> Result<()>;

    /// Write an observed status without ever moving it backwards
    async fn advance_status(
        &self,
        instance_id: &InstanceId,
        status: JobInstanceStatus,
    ) -> Result<StatusTransition>;

    /// Mark a failed deployment with its error text
    async fn mark_failed(&self, instance_id: &InstanceId, details: &str) -> Result<()>;

    async fn find_by_id(&self, instance_id: &InstanceId) -> Result<Option<JobInstance>>;

    /// All instances in creation order
    async fn find_all(&self, page: Page) -> Result<Vec<JobInstance>>;

    /// Instances created for one request, in creation order
    async fn find_by_request_id(&self, request_id: &str, page: Page) -> Result<Vec<JobInstance>>;
}
