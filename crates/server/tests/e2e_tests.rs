//! End-to-end tests with a mocked scorer.
//!
//! These tests run the full server stack in-process, from the HTTP router
//! through admission, the queue and the worker pool, down to the result store.

mod common;

use std::time::Duration;

use axum::http::{header, StatusCode};
use serde_json::json;

use common::{fixtures, TestConfig, TestFixture};
use parley_core::AdmissionConfig;

// =============================================================================
// Basic API Tests
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/health").await;
    assert_status!(response, StatusCode::OK);
    assert_json_path!(response.body, "status", json!("ok"));
}

#[tokio::test]
async fn test_config_endpoint() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/config").await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["config"]["processor"]["workers"], 2);
    assert_eq!(response.body["fingerprint"].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn test_status_endpoint() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/status").await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["workers"]["running"], true);
    assert_eq!(response.body["workers"]["workers"], 2);
    assert_eq!(response.body["admission"]["in_flight"], 0);
    assert_eq!(response.body["queue"]["ready"], 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new().await;
    // Generate at least one request with a route label.
    fixture.get("/api/v1/health").await;

    let text = fixture.metrics_text().await;
    assert!(text.contains("parley_http_requests_total"));
    assert!(text.contains("parley_queue_ready"));
    assert!(text.contains("parley_workers_live"));
}

// =============================================================================
// Ingest Tests
// =============================================================================

#[tokio::test]
async fn test_ingest_ndjson_completes() {
    let fixture = TestFixture::new().await;
    let body = fixtures::ndjson(&[
        fixtures::transcript("acme", "c1", "hello"),
        fixtures::transcript("acme", "c2", "goodbye"),
    ]);

    let response = fixture.ingest("acme", "application/x-ndjson", &body).await;

    assert_status!(response, StatusCode::ACCEPTED);
    let accepted = response.body["accepted"].as_array().unwrap();
    assert_eq!(accepted.len(), 2);
    assert_eq!(accepted[0]["conversation_id"], "c1");
    assert_eq!(accepted[0]["status"], "PENDING");
    assert!(response.body["rejected"].as_array().unwrap().is_empty());

    let result = fixture.wait_terminal("acme", "c1").await;
    assert_eq!(result["status"], "COMPLETED");
    assert_eq!(result["sentiment_score"], 0.8);
    assert_eq!(result["task_id"], accepted[0]["task_id"]);

    let result = fixture.wait_terminal("acme", "c2").await;
    assert_eq!(result["status"], "COMPLETED");
    assert_eq!(fixture.scorer.calls(), 2);
}

#[tokio::test]
async fn test_ingest_json_array() {
    let fixture = TestFixture::new().await;
    let body = fixtures::json_array(&[
        fixtures::transcript("acme", "c1", "one"),
        fixtures::transcript("acme", "c2", "two"),
        fixtures::transcript("acme", "c3", "three"),
    ]);

    let response = fixture.ingest("acme", "application/json", &body).await;

    assert_status!(response, StatusCode::ACCEPTED);
    assert_eq!(response.body["accepted"].as_array().unwrap().len(), 3);

    for id in ["c1", "c2", "c3"] {
        let result = fixture.wait_terminal("acme", id).await;
        assert_eq!(result["status"], "COMPLETED");
    }
}

#[tokio::test]
async fn test_ingest_missing_tenant_is_bad_request() {
    let fixture = TestFixture::new().await;
    let body = fixtures::json_array(&[fixtures::transcript("acme", "c1", "hi")]);

    let response = fixture.ingest_anonymous(&body).await;

    assert_status!(response, StatusCode::BAD_REQUEST);
    assert_json_path!(response.body, "error", json!("missing_tenant"));
}

#[tokio::test]
async fn test_ingest_all_invalid_is_bad_request() {
    let fixture = TestFixture::new().await;
    let body = fixtures::ndjson(&[
        json!({"conversation_id": "c1"}),
        fixtures::transcript("someone-else", "c2", "hi"),
    ]);

    let response = fixture.ingest("acme", "application/x-ndjson", &body).await;

    assert_status!(response, StatusCode::BAD_REQUEST);
    assert_json_path!(response.body, "error", json!("invalid"));
    let rejected = response.body["rejected"].as_array().unwrap();
    assert_eq!(rejected.len(), 2);
    assert_eq!(rejected[0]["index"], 0);
    assert_eq!(rejected[1]["index"], 1);
}

#[tokio::test]
async fn test_ingest_partial_acceptance() {
    let fixture = TestFixture::new().await;
    let body = [
        fixtures::transcript("acme", "c1", "fine").to_string(),
        "{not json".to_string(),
        fixtures::transcript("acme", "c3", "also fine").to_string(),
    ]
    .join("\n");

    let response = fixture.ingest("acme", "application/x-ndjson", &body).await;

    assert_status!(response, StatusCode::ACCEPTED);
    assert_eq!(response.body["accepted"].as_array().unwrap().len(), 2);
    let rejected = response.body["rejected"].as_array().unwrap();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0]["index"], 1);
    assert_eq!(rejected[0]["error"], "malformed");
}

#[tokio::test]
async fn test_ingest_broken_framing_is_bad_request() {
    let fixture = TestFixture::new().await;

    let response = fixture.ingest("acme", "application/json", "[ , ]").await;

    assert_status!(response, StatusCode::BAD_REQUEST);
    assert_json_path!(response.body, "error", json!("framing"));
}

#[tokio::test]
async fn test_ingest_broken_array_keeps_earlier_records() {
    let fixture = TestFixture::new().await;
    let body = format!(
        "[{}, {} {}]",
        fixtures::transcript("acme", "c1", "a"),
        fixtures::transcript("acme", "c2", "b"),
        fixtures::transcript("acme", "c3", "c"),
    );

    let response = fixture.ingest("acme", "application/json", &body).await;

    assert_status!(response, StatusCode::ACCEPTED);
    assert_eq!(response.body["accepted"].as_array().unwrap().len(), 2);
    assert!(response.body["terminal_error"].is_string());
}

#[tokio::test]
async fn test_ingest_empty_body_is_bad_request() {
    let fixture = TestFixture::new().await;

    let response = fixture.ingest("acme", "application/x-ndjson", "").await;

    assert_status!(response, StatusCode::BAD_REQUEST);
    assert_json_path!(response.body, "error", json!("empty"));
}

#[tokio::test]
async fn test_ingest_over_capacity_is_too_many_requests() {
    let fixture = TestFixture::with_config(
        TestConfig::without_workers()
            .with_admission(AdmissionConfig::default().with_water_marks(1, 1)),
    )
    .await;

    let first = fixtures::ndjson(&[fixtures::transcript("acme", "c1", "hi")]);
    let response = fixture.ingest("acme", "application/x-ndjson", &first).await;
    assert_status!(response, StatusCode::ACCEPTED);

    let second = fixtures::ndjson(&[fixtures::transcript("acme", "c2", "hi")]);
    let response = fixture.ingest("acme", "application/x-ndjson", &second).await;

    assert_status!(response, StatusCode::TOO_MANY_REQUESTS);
    assert_json_path!(response.body, "error", json!("capacity"));
    assert!(response.body["retry_after_ms"].as_u64().unwrap() > 0);
    let retry_after: u64 = response.headers[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after >= 1);

    // Nothing was created for the refused record.
    let response = fixture.get_as("acme", "/api/v1/results/c2").await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ingest_tenant_limit_isolates_tenants() {
    let fixture = TestFixture::with_config(
        TestConfig::without_workers()
            .with_admission(AdmissionConfig::default().with_tenant_limit(1)),
    )
    .await;

    let body = fixtures::ndjson(&[fixtures::transcript("acme", "c1", "hi")]);
    let response = fixture.ingest("acme", "application/x-ndjson", &body).await;
    assert_status!(response, StatusCode::ACCEPTED);

    let body = fixtures::ndjson(&[fixtures::transcript("acme", "c2", "hi")]);
    let response = fixture.ingest("acme", "application/x-ndjson", &body).await;
    assert_status!(response, StatusCode::TOO_MANY_REQUESTS);

    // Another tenant still has room.
    let body = fixtures::ndjson(&[fixtures::transcript("globex", "c1", "hi")]);
    let response = fixture.ingest("globex", "application/x-ndjson", &body).await;
    assert_status!(response, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_resubmission_while_processing_conflicts() {
    let fixture = TestFixture::new().await;
    fixture.scorer.set_delay(Duration::from_millis(300));

    let body = fixtures::ndjson(&[fixtures::transcript("acme", "c1", "slow")]);
    let response = fixture.ingest("acme", "application/x-ndjson", &body).await;
    assert_status!(response, StatusCode::ACCEPTED);

    let mut processing = false;
    for _ in 0..200 {
        let response = fixture.get_as("acme", "/api/v1/results/c1").await;
        if response.body["status"] == "PROCESSING" {
            processing = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(processing, "record never reached PROCESSING");

    let body = fixtures::ndjson(&[fixtures::transcript("acme", "c1", "again")]);
    let response = fixture.ingest("acme", "application/x-ndjson", &body).await;
    assert_status!(response, StatusCode::CONFLICT);
    assert_json_path!(response.body, "error", json!("conflict"));

    let result = fixture.wait_terminal("acme", "c1").await;
    assert_eq!(result["status"], "COMPLETED");
}

// =============================================================================
// Result Tests
// =============================================================================

#[tokio::test]
async fn test_result_not_found() {
    let fixture = TestFixture::new().await;

    let response = fixture.get_as("acme", "/api/v1/results/missing").await;

    assert_status!(response, StatusCode::NOT_FOUND);
    assert_json_path!(response.body, "error", json!("not_found"));
}

#[tokio::test]
async fn test_result_requires_tenant() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/results/c1").await;

    assert_status!(response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_results_are_tenant_scoped() {
    let fixture = TestFixture::new().await;
    let body = fixtures::ndjson(&[fixtures::transcript("acme", "c1", "secret")]);
    let response = fixture.ingest("acme", "application/x-ndjson", &body).await;
    assert_status!(response, StatusCode::ACCEPTED);
    fixture.wait_terminal("acme", "c1").await;

    let response = fixture.get_as("globex", "/api/v1/results/c1").await;
    assert_status!(response, StatusCode::NOT_FOUND);

    let response = fixture.get_as("globex", "/api/v1/results").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["total"], 0);
}

#[tokio::test]
async fn test_list_results() {
    let fixture = TestFixture::new().await;
    let body = fixtures::ndjson(&[
        fixtures::transcript("acme", "c1", "one"),
        fixtures::transcript("acme", "c2", "two"),
    ]);
    fixture.ingest("acme", "application/x-ndjson", &body).await;
    fixture.wait_terminal("acme", "c1").await;
    fixture.wait_terminal("acme", "c2").await;

    let response = fixture.get_as("acme", "/api/v1/results").await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["total"], 2);
    let ids: Vec<&str> = response.body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["conversation_id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"c1"));
    assert!(ids.contains(&"c2"));
}

#[tokio::test]
async fn test_scoring_failure_is_reported() {
    let fixture = TestFixture::new().await;
    fixture.scorer.fail_next(1, "model unavailable");

    let body = fixtures::ndjson(&[fixtures::transcript("acme", "c1", "hi")]);
    fixture.ingest("acme", "application/x-ndjson", &body).await;

    let result = fixture.wait_terminal("acme", "c1").await;
    assert_eq!(result["status"], "FAILED");
    assert!(result["error"]
        .as_str()
        .unwrap()
        .contains("model unavailable"));
}
