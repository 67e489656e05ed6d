//! API error type and HTTP response mapping

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use orch_server_domain::DomainError;

pub type ApiResult<T> = Result<T, ApiError>;

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    /// Stable machine-readable code
    pub code: &'static str,
    pub message: String,
    /// `job:version` pairs a workflow referenced but the registry lacks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<Vec<String>>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    missing: Option<Vec<String>>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            missing: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::UnregisteredJobs { ref missing } => {
                let missing = missing.iter().map(ToString::to_string).collect();
                Self {
                    missing: Some(missing),
                    ..Self::new(StatusCode::NOT_FOUND, "UNREGISTERED_JOBS", err.to_string())
                }
            }
            DomainError::WorkflowAlreadyExists { .. } => Self::conflict(err.to_string()),
            DomainError::InvalidArgument { .. } => Self::bad_request(err.to_string()),
            ref e if e.is_not_found() => Self::not_found(err.to_string()),
            other => {
                error!(error = %other, "Request failed");
                Self::internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            code: self.code,
            message: self.message,
            missing: self.missing,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orch_server_domain::JobRef;

    #[test]
    fn test_domain_taxonomy_maps_to_status() {
        let cases = [
            (
                DomainError::WorkflowNotFound {
                    workflow_id: "W1".to_string(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                DomainError::LogFileNotFound {
                    instance_id: "a-1".to_string(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                DomainError::WorkflowAlreadyExists {
                    workflow_id: "W1".to_string(),
                },
                StatusCode::CONFLICT,
            ),
            (
                DomainError::InvalidArgument {
                    field: "limit".to_string(),
                    reason: "too small".to_string(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                DomainError::InfrastructureError {
                    message: "db down".to_string(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_unregistered_jobs_carry_missing_pairs() {
        let err = ApiError::from(DomainError::UnregisteredJobs {
            missing: vec![JobRef::new("transcode", "2.0")],
        });
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "UNREGISTERED_JOBS");
        assert_eq!(err.missing.as_deref(), Some(&["transcode:2.0".to_string()][..]));
    }
}
