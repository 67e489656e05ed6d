//! Job catalog routes

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};

use orch_server_domain::{DomainError, Job};

use super::AppState;
use super::error::ApiResult;
use super::pagination::{PageQuery, page_from};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/get-by-name/:job_name", get(get_job_by_name))
}

async fn list_jobs(
    State(state): State<AppState>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Job>>> {
    let page = page_from(query)?;
    Ok(Json(state.jobs.get_all(page).await))
}

async fn get_job_by_name(
    State(state): State<AppState>,
    Path(job_name): Path<String>,
) -> ApiResult<Json<Job>> {
    let job = state
        .jobs
        .get_by_name(&job_name)
        .await
        .ok_or_else(|| DomainError::JobNotFound {
            job_name: job_name.clone(),
        })?;
    Ok(Json(job))
}
