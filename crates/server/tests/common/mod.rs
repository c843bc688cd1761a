//! Common test utilities for E2E testing with mocks.
//!
//! This module provides a test fixture that creates an in-process server
//! with a scripted scorer injected, enabling E2E testing of the HTTP
//! boundary without a network listener.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use parley_core::{
    admission::AdmissionConfig, scorer_factory, testing::MockScorer, Config, Pipeline,
};

/// Re-export fixtures for test convenience
pub use parley_core::testing::fixtures;

/// Test fixture for E2E testing with a mock scorer.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_ingest() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.ingest("acme", "application/x-ndjson", body).await;
///
///     assert_eq!(response.status, 202);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Mock scorer shared by every worker
    pub scorer: MockScorer,
    /// The pipeline behind the router
    pub pipeline: Arc<Pipeline>,
    /// Temporary directory for SQLite-backed tests
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Value,
}

impl TestFixture {
    /// Create a new test fixture with running workers.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    /// Create a test fixture with custom configuration.
    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let mut config = Config::default();
        config.database.path = temp_dir.path().join("test.db");
        config.processor = config
            .processor
            .with_workers(2)
            .with_receive_wait_ms(20);
        if let Some(admission) = test_config.admission {
            config.admission = admission;
        }

        let scorer = MockScorer::new(0.8);
        let pipeline = Arc::new(
            Pipeline::from_config(&config, scorer_factory(scorer.clone()))
                .await
                .expect("Failed to build pipeline"),
        );
        if test_config.start_workers {
            pipeline.start().expect("Failed to start workers");
        }

        let state = Arc::new(parley_server::state::AppState::new(
            config,
            Arc::clone(&pipeline),
        ));
        let router = parley_server::api::create_router(state);

        Self {
            router,
            scorer,
            pipeline,
            temp_dir,
        }
    }

    /// Send a GET request without a tenant.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None, None, None).await
    }

    /// Send a GET request as `tenant`.
    pub async fn get_as(&self, tenant: &str, path: &str) -> TestResponse {
        self.request("GET", path, Some(tenant), None, None).await
    }

    /// POST a raw body to the ingest endpoint as `tenant`.
    pub async fn ingest(&self, tenant: &str, content_type: &str, body: &str) -> TestResponse {
        self.request(
            "POST",
            "/api/v1/ingest",
            Some(tenant),
            Some(content_type),
            Some(body.to_string()),
        )
        .await
    }

    /// POST to the ingest endpoint without a tenant header.
    pub async fn ingest_anonymous(&self, body: &str) -> TestResponse {
        self.request(
            "POST",
            "/api/v1/ingest",
            None,
            Some("application/json"),
            Some(body.to_string()),
        )
        .await
    }

    /// Raw text of the metrics endpoint.
    pub async fn metrics_text(&self) -> String {
        let request = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// Poll a result until its status is terminal.
    pub async fn wait_terminal(&self, tenant: &str, conversation_id: &str) -> Value {
        let path = format!("/api/v1/results/{}", conversation_id);
        for _ in 0..500 {
            let response = self.get_as(tenant, &path).await;
            if response.status == StatusCode::OK {
                let status = response.body["status"].as_str().unwrap_or_default();
                if status == "COMPLETED" || status == "FAILED" {
                    return response.body;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("result {} did not reach a terminal status", conversation_id);
    }

    /// Send a request to the test server.
    async fn request(
        &self,
        method: &str,
        path: &str,
        tenant: Option<&str>,
        content_type: Option<&str>,
        body: Option<String>,
    ) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);
        if let Some(tenant) = tenant {
            request_builder = request_builder.header("X-Tenant-ID", tenant);
        }
        if let Some(content_type) = content_type {
            request_builder = request_builder.header("Content-Type", content_type);
        }

        let body = body.map(Body::from).unwrap_or_else(Body::empty);
        let request = request_builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }
}

/// Configuration for test fixture.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Start the worker pool
    pub start_workers: bool,
    /// Admission limits, defaults when `None`
    pub admission: Option<AdmissionConfig>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            start_workers: true,
            admission: None,
        }
    }
}

impl TestConfig {
    /// Create config with workers left stopped, so tasks stay queued.
    pub fn without_workers() -> Self {
        Self {
            start_workers: false,
            admission: None,
        }
    }

    /// Sets the admission limits.
    pub fn with_admission(mut self, admission: AdmissionConfig) -> Self {
        self.admission = Some(admission);
        self
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}

/// Helper to assert a JSON path equals expected value.
#[macro_export]
macro_rules! assert_json_path {
    ($json:expr, $path:expr, $expected:expr) => {
        let actual = &$json[$path];
        assert_eq!(
            actual, &$expected,
            "Path '{}' expected {:?}, got {:?}",
            $path, $expected, actual
        );
    };
}
