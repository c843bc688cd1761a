//! Result API handlers.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use parley_core::ResultRecord;

use super::error::ApiError;
use super::middleware::TenantId;
use crate::state::AppState;

/// Response for listing results
#[derive(Debug, Serialize)]
pub struct ListResultsResponse {
    pub results: Vec<ResultRecord>,
    pub total: usize,
}

/// Get the result of one conversation
pub async fn get_result(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Path(conversation_id): Path<String>,
) -> Result<Json<ResultRecord>, ApiError> {
    state
        .results()
        .get(&tenant_id, &conversation_id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("No result for conversation {}", conversation_id)))
}

/// List every result of the tenant
pub async fn list_results(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
) -> Result<Json<ListResultsResponse>, ApiError> {
    let results = state.results().list(&tenant_id)?;
    Ok(Json(ListResultsResponse {
        total: results.len(),
        results,
    }))
}
