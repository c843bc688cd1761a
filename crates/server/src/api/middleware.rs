//! Tenant extraction and metrics middleware for API routes.

use axum::{
    body::Body,
    extract::{FromRequestParts, MatchedPath},
    http::{request::Parts, Request},
    middleware::Next,
    response::Response,
};
use std::future::Future;
use std::time::Instant;

use super::error::ApiError;
use crate::metrics::{HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION};

/// Header carrying the tenant of a request.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Metrics middleware that tracks HTTP request duration and counts.
///
/// This middleware records:
/// - Request duration (histogram)
/// - Request count (counter)
/// - Requests in flight (gauge)
///
/// Paths are labelled with the matched route template so conversation ids
/// do not end up in label values.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    HTTP_REQUESTS_IN_FLIGHT.inc();

    let response = next.run(request).await;

    HTTP_REQUESTS_IN_FLIGHT.dec();

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &path, &status])
        .observe(duration);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    response
}

/// Extractor for the request tenant.
///
/// Reads the `X-Tenant-ID` header. A missing or blank header rejects the
/// request with 400.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantId(pub String);

impl<S> FromRequestParts<S> for TenantId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let tenant = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| TenantId(v.to_string()))
            .ok_or_else(|| {
                ApiError::bad_request("missing_tenant", "X-Tenant-ID header is required")
            });
        std::future::ready(tenant)
    }
}
