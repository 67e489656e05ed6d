//! `skip`/`limit` query parameters shared by every list endpoint

use axum::extract::Query;
use axum::extract::rejection::QueryRejection;
use serde::Deserialize;

use orch_server_domain::Page;

use super::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

impl PageQuery {
    pub fn into_page(self) -> Result<Page, ApiError> {
        let skip = self.skip.unwrap_or(0);
        let limit = self.limit.unwrap_or(Page::DEFAULT_LIMIT as i64);
        if skip < 0 {
            return Err(ApiError::bad_request(
                "skip must be greater than or equal to 0",
            ));
        }
        if limit < 1 {
            return Err(ApiError::bad_request(
                "limit must be greater than or equal to 1",
            ));
        }
        let skip = usize::try_from(skip).map_err(|e| ApiError::bad_request(e.to_string()))?;
        let limit = usize::try_from(limit).map_err(|e| ApiError::bad_request(e.to_string()))?;
        Ok(Page::new(skip, limit)?)
    }
}

/// Page from a possibly rejected query string
pub fn page_from(query: Result<Query<PageQuery>, QueryRejection>) -> Result<Page, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    query.into_page()
}
