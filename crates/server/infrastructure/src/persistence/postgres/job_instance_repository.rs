//! PostgreSQL Job Instance Repository

use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgRow};

use orch_server_domain::{
    DomainError, InstanceId, JobInstance, JobInstanceRepository, JobInstanceStatus, Page, Result,
    StatusTransition,
};

const COLUMNS: &str = "instance_id, request_id, workflow_id, job_name, job_version, status, details";

#[derive(Clone)]
pub struct PostgresJobInstanceRepository {
    pool: PgPool,
}

impl PostgresJobInstanceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn db_error(action: &str, e: sqlx::Error) -> DomainError {
    DomainError::InfrastructureError {
        message: format!("Failed to {}: {}", action, e),
    }
}

pub(crate) fn page_params(page: Page) -> (i64, i64) {
    (
        i64::try_from(page.skip).unwrap_or(i64::MAX),
        i64::try_from(page.limit).unwrap_or(i64::MAX),
    )
}

fn map_instance(row: &PgRow) -> Result<JobInstance> {
    let decode = |e| db_error("decode job instance", e);
    let status: String = row.try_get("status").map_err(decode)?;
    Ok(JobInstance {
        instance_id: InstanceId::from(row.try_get::<String, _>("instance_id").map_err(decode)?),
        request_id: row.try_get("request_id").map_err(decode)?,
        workflow_id: row.try_get("workflow_id").map_err(decode)?,
        job_name: row.try_get("job_name").map_err(decode)?,
        job_version: row.try_get("job_version").map_err(decode)?,
        status: status.parse()?,
        details: row.try_get("details").map_err(decode)?,
    })
}

#[async_trait]
impl JobInstanceRepository for PostgresJobInstanceRepository {
    async fn register(&self, instance: &JobInstance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_instances
                (instance_id, request_id, workflow_id, job_name, job_version, status, details)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(instance.instance_id.as_str())
        .bind(&instance.request_id)
        .bind(&instance.workflow_id)
        .bind(&instance.job_name)
        .bind(&instance.job_version)
        .bind(instance.status.as_str())
        .bind(&instance.details)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("register job instance", e))?;

        Ok(())
    }

    async fn advance_status(
        &self,
        instance_id: &InstanceId,
        status: JobInstanceStatus,
    ) -> Result<StatusTransition> {
        let predecessors: Vec<String> = JobInstanceStatus::predecessors_of(status)
            .into_iter()
            .map(|s| s.as_str().to_string())
            .collect();

        // Both CTEs read the same snapshot, so `previous` is the pre-update value
        let row = sqlx::query(
            r#"
            WITH previous AS (
                SELECT status FROM job_instances WHERE instance_id = $1
            ),
            updated AS (
                UPDATE job_instances
                SET status = $2, updated_at = NOW()
                WHERE instance_id = $1 AND status = ANY($3)
                RETURNING instance_id
            )
            SELECT
                (SELECT status FROM previous) AS previous,
                EXISTS (SELECT 1 FROM updated) AS advanced
            "#,
        )
        .bind(instance_id.as_str())
        .bind(status.as_str())
        .bind(&predecessors)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("update job instance status", e))?;

        let previous: Option<String> = row
            .try_get("previous")
            .map_err(|e| db_error("decode status update", e))?;
        let advanced: bool = row
            .try_get("advanced")
            .map_err(|e| db_error("decode status update", e))?;

        let Some(previous) = previous else {
            return Ok(StatusTransition::Missing);
        };
        let previous: JobInstanceStatus = previous.parse()?;

        Ok(if advanced {
            StatusTransition::Advanced { from: previous }
        } else if previous == status {
            StatusTransition::Unchanged
        } else {
            StatusTransition::Rejected { current: previous }
        })
    }

    async fn mark_failed(&self, instance_id: &InstanceId, details: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE job_instances
            SET status = CASE
                    WHEN status IN ('Succeeded', 'Failed') THEN status
                    ELSE 'Failed'
                END,
                details = $2,
                updated_at = NOW()
            WHERE instance_id = $1
            "#,
        )
        .bind(instance_id.as_str())
        .bind(details)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("mark job instance failed", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::JobInstanceNotFound {
                instance_id: instance_id.to_string(),
            });
        }
        Ok(())
    }

    async fn find_by_id(&self, instance_id: &InstanceId) -> Result<Option<JobInstance>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM job_instances WHERE instance_id = $1"
        ))
        .bind(instance_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("fetch job instance", e))?;

        row.as_ref().map(map_instance).transpose()
    }

    async fn find_all(&self, page: Page) -> Result<Vec<JobInstance>> {
        let (offset, limit) = page_params(page);
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM job_instances ORDER BY seq OFFSET $1 LIMIT $2"
        ))
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list job instances", e))?;

        rows.iter().map(map_instance).collect()
    }

    async fn find_by_request_id(&self, request_id: &str, page: Page) -> Result<Vec<JobInstance>> {
        let (offset, limit) = page_params(page);
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM job_instances WHERE request_id = $1 ORDER BY seq OFFSET $2 LIMIT $3"
        ))
        .bind(request_id)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list job instances by request", e))?;

        rows.iter().map(map_instance).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_params_saturate() {
        assert_eq!(page_params(Page::new(20, 10).unwrap()), (20, 10));
        assert_eq!(page_params(Page::new(0, usize::MAX).unwrap()).1, i64::MAX);
    }
}
