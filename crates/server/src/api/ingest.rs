//! Ingest API handler.
//!
//! The request body is decoded as it arrives; each record is admitted on its
//! own, so one request may be partly accepted.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;
use tracing::{debug, info};

use parley_core::{decoder::Framing, IngestReport};

use super::error::ApiError;
use super::middleware::TenantId;
use crate::state::AppState;

/// Ingest a JSON array or NDJSON body of transcript records.
///
/// Returns 202 with the per-record report when at least one record was
/// admitted. When none was, the request fails with the status of the
/// dominant cause: 400 for framing or validation, 409 for conflicts,
/// 429 for capacity.
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    headers: HeaderMap,
    body: Body,
) -> Result<(StatusCode, Json<IngestReport>), ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let framing = Framing::from_content_type(content_type);
    debug!(tenant_id = %tenant_id, ?framing, "Ingest request");

    let report = state
        .coordinator()
        .ingest(&tenant_id, body.into_data_stream(), framing)
        .await;

    info!(
        tenant_id = %tenant_id,
        accepted = report.accepted.len(),
        rejected = report.rejected.len(),
        broken = report.terminal_error.is_some(),
        "Ingest finished"
    );

    if report.accepted.is_empty() {
        return Err(refusal(report));
    }
    Ok((StatusCode::ACCEPTED, Json(report)))
}

/// Error for a request in which nothing was admitted.
fn refusal(report: IngestReport) -> ApiError {
    if let Some(terminal) = &report.terminal_error {
        return ApiError::bad_request("framing", terminal.clone()).with_rejected(report.rejected);
    }

    let Some(first) = report.rejected.first() else {
        return ApiError::bad_request("empty", "Request body contained no records");
    };

    let reason = first.reason.clone();
    let error = if report.rejected.iter().all(|r| r.is_capacity()) {
        ApiError::capacity(reason, report.retry_after())
    } else if report.rejected.iter().all(|r| r.is_conflict()) {
        ApiError::new(StatusCode::CONFLICT, "conflict", reason)
    } else if report.rejected.iter().any(|r| r.error == "internal") {
        ApiError::internal(reason)
    } else {
        ApiError::bad_request("invalid", reason)
    };
    error.with_rejected(report.rejected)
}
