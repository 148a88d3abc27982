//! Control API error type (spec.md §4.11: "errors use HTTP status +
//! `{error, detail}`"), grounded on the teacher's `syncserver::error::
//! ApiError` — a stable `kind` paired with the HTTP status it renders
//! as, rather than deriving the status from the kind at render time.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiErrorKind {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    CycleInProgress(String),
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug)]
pub struct ApiError {
    kind: ApiErrorKind,
}

impl ApiError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::NotFound(what.into()),
        }
    }

    pub fn cycle_in_progress(pipeline: &str) -> Self {
        Self {
            kind: ApiErrorKind::CycleInProgress(format!("a {pipeline} cycle is already running")),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::BadRequest(detail.into()),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Internal(detail.into()),
        }
    }

    fn label(&self) -> &'static str {
        match self.kind {
            ApiErrorKind::NotFound(_) => "not_found",
            ApiErrorKind::CycleInProgress(_) => "cycle_in_progress",
            ApiErrorKind::BadRequest(_) => "bad_request",
            ApiErrorKind::Internal(_) => "internal_error",
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.kind, f)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    detail: String,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self.kind {
            ApiErrorKind::NotFound(_) => StatusCode::NOT_FOUND,
            ApiErrorKind::CycleInProgress(_) => StatusCode::CONFLICT,
            ApiErrorKind::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiErrorKind::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            warn!("control api request failed: {}", self);
        }
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.label(),
            detail: self.to_string(),
        })
    }
}

impl From<edge_store::StoreError> for ApiError {
    fn from(err: edge_store::StoreError) -> Self {
        ApiError::internal(err.to_string())
    }
}
