//! HTTP query and registration surface

pub mod error;
pub mod job_instances;
pub mod jobs;
pub mod pagination;
pub mod workflows;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use orch_server_application::{JobInstanceService, WorkflowService};
use orch_server_domain::JobCatalog;

pub use error::{ApiError, ApiErrorBody, ApiResult};

/// Identity of the running process, served on `/info`
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub service_name: String,
    pub environment: String,
    pub instance_id: String,
}

#[derive(Clone)]
pub struct AppState {
    pub workflows: Arc<WorkflowService>,
    pub jobs: Arc<dyn JobCatalog>,
    pub instances: Arc<JobInstanceService>,
    pub info: Arc<ServiceInfo>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/info", get(info))
        .route("/health", get(health))
        .merge(workflows::routes())
        .merge(jobs::routes())
        .merge(job_instances::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(state.info.as_ref().clone())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
