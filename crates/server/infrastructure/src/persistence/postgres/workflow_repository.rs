//! PostgreSQL Workflow Repository
//!
//! Routes and the creator identity are stored as JSONB next to the id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;

use orch_server_domain::{
    DomainError, EventRoute, Page, Result, ServiceIdentity, Workflow, WorkflowRepository,
};

use super::job_instance_repository::{db_error, page_params};

#[derive(Clone)]
pub struct PostgresWorkflowRepository {
    pool: PgPool,
}

impl PostgresWorkflowRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_workflow(row: &PgRow) -> Result<Workflow> {
    let decode = |e| db_error("decode workflow", e);
    let Json(event_routes): Json<Vec<EventRoute>> = row.try_get("event_routes").map_err(decode)?;
    let Json(created_by): Json<ServiceIdentity> = row.try_get("created_by").map_err(decode)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;
    Ok(Workflow {
        workflow_id: row.try_get("workflow_id").map_err(decode)?,
        event_routes,
        created_by,
        created_at,
    })
}

#[async_trait]
impl WorkflowRepository for PostgresWorkflowRepository {
    async fn register(&self, workflow: &Workflow) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflows (workflow_id, event_routes, created_by, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (workflow_id) DO NOTHING
            "#,
        )
        .bind(&workflow.workflow_id)
        .bind(Json(&workflow.event_routes))
        .bind(Json(&workflow.created_by))
        .bind(workflow.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("register workflow", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::WorkflowAlreadyExists {
                workflow_id: workflow.workflow_id.clone(),
            });
        }
        Ok(())
    }

    async fn find_by_id(&self, workflow_id: &str) -> Result<Option<Workflow>> {
        let row = sqlx::query(
            r#"
            SELECT workflow_id, event_routes, created_by, created_at
            FROM workflows
            WHERE workflow_id = $1
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("fetch workflow", e))?;

        row.as_ref().map(map_workflow).transpose()
    }

    async fn find_all(&self, page: Page) -> Result<Vec<Workflow>> {
        let (offset, limit) = page_params(page);
        let rows = sqlx::query(
            r#"
            SELECT workflow_id, event_routes, created_by, created_at
            FROM workflows
            ORDER BY seq
            OFFSET $1 LIMIT $2
            "#,
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list workflows", e))?;

        rows.iter().map(map_workflow).collect()
    }
}
