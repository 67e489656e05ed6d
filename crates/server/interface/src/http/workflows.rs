//! Workflow routes
//!
//! - `GET  /workflows` - list workflows
//! - `POST /workflows` - register a workflow
//! - `GET  /workflows/:workflow_id` - get one workflow

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};

use orch_server_domain::Workflow;

use super::AppState;
use super::error::{ApiError, ApiResult};
use super::pagination::{PageQuery, page_from};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/workflows", get(list_workflows).post(register_workflow))
        .route("/workflows/:workflow_id", get(get_workflow))
}

async fn list_workflows(
    State(state): State<AppState>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Workflow>>> {
    let page = page_from(query)?;
    Ok(Json(state.workflows.list(page).await?))
}

async fn get_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> ApiResult<Json<Workflow>> {
    Ok(Json(state.workflows.get(&workflow_id).await?))
}

async fn register_workflow(
    State(state): State<AppState>,
    body: Result<Json<Workflow>, JsonRejection>,
) -> ApiResult<Json<Workflow>> {
    let Json(workflow) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    Ok(Json(state.workflows.register(workflow).await?))
}
