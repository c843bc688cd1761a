//! Error responses for the API.

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use parley_core::{PipelineError, ResultError, SubmitError};
use parley_core::ingest::Rejection;

/// Error body: `{ "error": ..., "reason": ... }`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// Per-record rejections when a whole ingest request was refused.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<Rejection>,
}

/// An error returned from a handler.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: &'static str,
    pub reason: String,
    pub retry_after: Option<Duration>,
    pub rejected: Vec<Rejection>,
}

impl ApiError {
    pub fn new(status: StatusCode, error: &'static str, reason: impl Into<String>) -> Self {
        Self {
            status,
            error,
            reason: reason.into(),
            retry_after: None,
            rejected: Vec::new(),
        }
    }

    pub fn bad_request(error: &'static str, reason: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error, reason)
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", reason)
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", reason)
    }

    pub fn capacity(reason: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(StatusCode::TOO_MANY_REQUESTS, "capacity", reason)
        }
    }

    pub fn with_rejected(mut self, rejected: Vec<Rejection>) -> Self {
        self.rejected = rejected;
        self
    }
}

/// `Retry-After` in whole seconds, rounded up, at least 1.
pub fn retry_after_secs(delay: Duration) -> u64 {
    let secs = delay.as_millis().div_ceil(1000) as u64;
    secs.max(1)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(error = self.error, reason = %self.reason, "Request failed");
        }

        let body = ErrorResponse {
            error: self.error.to_string(),
            reason: self.reason,
            retry_after_ms: self.retry_after.map(|d| d.as_millis() as u64),
            rejected: self.rejected,
        };
        let mut response = (self.status, Json(body)).into_response();

        if let Some(delay) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs(delay).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        let reason = err.to_string();
        match err {
            SubmitError::Invalid(_) => Self::bad_request("invalid", reason),
            SubmitError::Capacity(e) => Self::capacity(reason, Some(e.retry_after())),
            SubmitError::Conflict(_) => Self::new(StatusCode::CONFLICT, "conflict", reason),
            SubmitError::Internal(_) => Self::internal(reason),
        }
    }
}

impl From<ResultError> for ApiError {
    fn from(err: ResultError) -> Self {
        match err {
            ResultError::InFlight { .. } => {
                Self::new(StatusCode::CONFLICT, "conflict", err.to_string())
            }
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self::internal(err.to_string())
    }
}
