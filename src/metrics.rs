//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Inbox Metrics
    pub static ref ACTIVITIES_RECEIVED: IntCounterVec = IntCounterVec::new(
        Opts::new("vidfed_activities_received_total", "Total number of inbound activities by type"),
        &["activity_type"]
    ).expect("metric can be created");
    pub static ref ACTIVITY_PROCESSING_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "vidfed_activity_processing_seconds",
            "Inbound activity processing duration in seconds"
        ).buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["activity_type"]
    ).expect("metric can be created");
    pub static ref UNDO_OUTCOMES: IntCounterVec = IntCounterVec::new(
        Opts::new("vidfed_undo_outcomes_total", "Undo activities by undone kind and outcome"),
        &["kind", "result"]
    ).expect("metric can be created");

    // Database Metrics
    pub static ref TX_RETRIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("vidfed_tx_retries_total", "Transient transaction conflicts by unit of work"),
        &["label"]
    ).expect("metric can be created");

    // Follow Graph Metrics
    pub static ref FOLLOW_EVICTIONS_TOTAL: IntCounter = IntCounter::new(
        "vidfed_follow_evictions_total",
        "Total number of follow edges evicted for a non-positive score"
    ).expect("metric can be created");
    pub static ref SCORE_UPDATES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("vidfed_score_updates_total", "Follow score adjustments by direction"),
        &["direction"]
    ).expect("metric can be created");
    pub static ref FOLLOW_EDGES: IntGauge = IntGauge::new(
        "vidfed_follow_edges",
        "Number of follow edges at the last eviction sweep"
    ).expect("metric can be created");

    // Blocklist Metrics
    pub static ref BLOCKLIST_CHECKS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("vidfed_blocklist_checks_total", "Blocklist predicate evaluations by result"),
        &["result"]
    ).expect("metric can be created");

    // Delivery Metrics
    pub static ref DELIVERY_JOBS_ENQUEUED: IntCounterVec = IntCounterVec::new(
        Opts::new("vidfed_delivery_jobs_enqueued_total", "Delivery jobs written to the outbox by activity type"),
        &["activity_type"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("vidfed_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(ACTIVITIES_RECEIVED.clone()))
        .expect("ACTIVITIES_RECEIVED can be registered");
    REGISTRY
        .register(Box::new(ACTIVITY_PROCESSING_SECONDS.clone()))
        .expect("ACTIVITY_PROCESSING_SECONDS can be registered");
    REGISTRY
        .register(Box::new(UNDO_OUTCOMES.clone()))
        .expect("UNDO_OUTCOMES can be registered");
    REGISTRY
        .register(Box::new(TX_RETRIES_TOTAL.clone()))
        .expect("TX_RETRIES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(FOLLOW_EVICTIONS_TOTAL.clone()))
        .expect("FOLLOW_EVICTIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(SCORE_UPDATES_TOTAL.clone()))
        .expect("SCORE_UPDATES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(FOLLOW_EDGES.clone()))
        .expect("FOLLOW_EDGES can be registered");
    REGISTRY
        .register(Box::new(BLOCKLIST_CHECKS_TOTAL.clone()))
        .expect("BLOCKLIST_CHECKS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(DELIVERY_JOBS_ENQUEUED.clone()))
        .expect("DELIVERY_JOBS_ENQUEUED can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}

/// Record the outcome of an inbound activity.
pub fn observe_activity(activity_type: &str, elapsed: std::time::Duration) {
    ACTIVITIES_RECEIVED.with_label_values(&[activity_type]).inc();
    ACTIVITY_PROCESSING_SECONDS
        .with_label_values(&[activity_type])
        .observe(elapsed.as_secs_f64());
}
