//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Ingestion (submissions, decoded records, decode errors)
//! - Admission (decisions, in-flight tasks)
//! - Worker pool (task outcomes, retries, scoring duration)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Ingestion Metrics
// =============================================================================

/// Submissions by outcome.
pub static SUBMISSIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("parley_submissions_total", "Total record submissions"),
        &["outcome"], // "accepted", "invalid", "rejected", "conflict", "error"
    )
    .unwrap()
});

/// Elements decoded from ingestion streams.
pub static RECORDS_DECODED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "parley_records_decoded_total",
        "Total elements decoded from ingestion streams",
    )
    .unwrap()
});

/// Decode errors by kind.
pub static DECODE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("parley_decode_errors_total", "Total decode errors"),
        &["kind"], // "malformed", "too_large", "framing", "io"
    )
    .unwrap()
});

// =============================================================================
// Admission Metrics
// =============================================================================

/// Admission decisions by kind.
pub static ADMISSION_DECISIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "parley_admission_decisions_total",
            "Backpressure admission decisions",
        ),
        &["decision"], // "allow", "delay", "reject"
    )
    .unwrap()
});

/// Tasks admitted and not yet completed or failed.
pub static TASKS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("parley_tasks_in_flight", "Tasks currently in flight").unwrap()
});

// =============================================================================
// Worker Metrics
// =============================================================================

/// Task outcomes.
pub static TASKS_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("parley_tasks_processed_total", "Tasks processed by workers"),
        &["outcome"], // "completed", "failed", "dead_lettered", "superseded"
    )
    .unwrap()
});

/// Redeliveries caused by worker faults.
pub static TASK_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "parley_task_retries_total",
        "Tasks returned to the queue after a worker fault",
    )
    .unwrap()
});

/// Scoring duration in seconds.
pub static SCORING_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("parley_scoring_duration_seconds", "Duration of scoring calls")
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        &["result"], // "ok", "error", "panic"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Ingestion
        Box::new(SUBMISSIONS_TOTAL.clone()),
        Box::new(RECORDS_DECODED.clone()),
        Box::new(DECODE_ERRORS.clone()),
        // Admission
        Box::new(ADMISSION_DECISIONS.clone()),
        Box::new(TASKS_IN_FLIGHT.clone()),
        // Workers
        Box::new(TASKS_PROCESSED.clone()),
        Box::new(TASK_RETRIES.clone()),
        Box::new(SCORING_DURATION.clone()),
    ]
}
