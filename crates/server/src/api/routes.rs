use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{handlers, ingest, middleware::metrics_middleware, results};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health, config and status
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/status", get(handlers::get_status))
        // Ingestion
        .route("/ingest", post(ingest::ingest))
        // Results
        .route("/results", get(results::list_results))
        .route("/results/{conversation_id}", get(results::get_result));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .route_layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
