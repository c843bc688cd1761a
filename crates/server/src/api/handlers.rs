use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use parley_core::{Config, PipelineStatus};

use super::error::ApiError;
use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Effective configuration and its fingerprint.
#[derive(Serialize)]
pub struct ConfigResponse {
    pub fingerprint: String,
    pub config: Config,
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<ConfigResponse> {
    let config = state.config().clone();
    Json(ConfigResponse {
        fingerprint: config.fingerprint(),
        config,
    })
}

/// Admission, queue and worker pool status.
pub async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PipelineStatus>, ApiError> {
    Ok(Json(state.pipeline().status().await?))
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state).await;
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
