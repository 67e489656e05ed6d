//! Job instance routes, including captured log download

use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio_util::io::ReaderStream;

use orch_server_domain::{DomainError, InstanceId, JobInstance};

use super::AppState;
use super::error::{ApiError, ApiResult};
use super::pagination::{PageQuery, page_from};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/job-instances", get(list_instances))
        .route("/job-instances/:instance_id", get(get_instance))
        .route(
            "/job-instances/label-request/:request_id",
            get(list_instances_by_request),
        )
        .route("/job-instances/logs/:instance_id", get(download_log))
}

async fn list_instances(
    State(state): State<AppState>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<JobInstance>>> {
    let page = page_from(query)?;
    Ok(Json(state.instances.list(page).await?))
}

async fn get_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> ApiResult<Json<JobInstance>> {
    let instance_id = InstanceId::from(instance_id);
    Ok(Json(state.instances.get(&instance_id).await?))
}

async fn list_instances_by_request(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<JobInstance>>> {
    let page = page_from(query)?;
    Ok(Json(
        state.instances.list_by_request(&request_id, page).await?,
    ))
}

async fn download_log(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> ApiResult<Response> {
    let instance_id = InstanceId::from(instance_id);
    let path = state.instances.log_file(&instance_id).await?;

    let file = tokio::fs::File::open(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::from(DomainError::LogFileNotFound {
                instance_id: instance_id.to_string(),
            })
        } else {
            ApiError::internal(format!("failed to open log file: {e}"))
        }
    })?;

    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", instance_id),
        ),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}
