//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Coalescer, dispatch queue, and admission queue depths
//! - Batch submission outcomes and confirmation latency
//! - Rate-limit backoff and nonce conflicts
//! - RBF send outcomes and fee escalations

use crate::error::DispatchResult;

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Encoder, Histogram, IntCounter,
    IntGauge, TextEncoder,
};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

lazy_static! {
    // Queue depth gauges, kept separate on purpose: callers combine them
    // however their presentation layer needs.
    pub static ref COALESCER_PENDING: IntGauge = register_int_gauge!(
        "burst_coalescer_pending_units",
        "Units recorded but not yet flushed into a batch"
    ).unwrap();

    pub static ref DISPATCH_QUEUE_DEPTH: IntGauge = register_int_gauge!(
        "burst_dispatch_queue_depth",
        "Batch jobs waiting for dispatch"
    ).unwrap();

    pub static ref ADMISSION_IN_FLIGHT: IntGauge = register_int_gauge!(
        "burst_admission_in_flight",
        "Single-action sends currently in flight"
    ).unwrap();

    pub static ref ADMISSION_QUEUE_DEPTH: IntGauge = register_int_gauge!(
        "burst_admission_queue_depth",
        "Single-action sends waiting for admission"
    ).unwrap();

    pub static ref BACKOFF_MS: IntGauge = register_int_gauge!(
        "burst_rate_limit_backoff_ms",
        "Current rate-limit backoff in milliseconds (0 = none)"
    ).unwrap();

    // Batch pipeline counters
    pub static ref UNITS_RECORDED: IntCounter = register_int_counter!(
        "burst_units_recorded_total",
        "Total units of work recorded"
    ).unwrap();

    pub static ref UNITS_SUBMITTED: IntCounter = register_int_counter!(
        "burst_units_submitted_total",
        "Total units carried by submitted batches"
    ).unwrap();

    pub static ref BATCHES_SUBMITTED: IntCounter = register_int_counter!(
        "burst_batches_submitted_total",
        "Total batch transactions submitted"
    ).unwrap();

    pub static ref BATCHES_CONFIRMED: IntCounter = register_int_counter!(
        "burst_batches_confirmed_total",
        "Total batch transactions confirmed"
    ).unwrap();

    pub static ref BATCHES_TIMED_OUT: IntCounter = register_int_counter!(
        "burst_batches_timed_out_total",
        "Total batches that exhausted the receipt poll budget"
    ).unwrap();

    pub static ref BATCHES_FAILED: IntCounter = register_int_counter!(
        "burst_batches_failed_total",
        "Total batches rejected terminally"
    ).unwrap();

    pub static ref RATE_LIMIT_HITS: IntCounter = register_int_counter!(
        "burst_rate_limit_hits_total",
        "Total provider rate-limit responses"
    ).unwrap();

    pub static ref NONCE_CONFLICTS: IntCounter = register_int_counter!(
        "burst_nonce_conflicts_total",
        "Total sequencing conflicts that invalidated the nonce cache"
    ).unwrap();

    pub static ref BATCH_CONFIRM_LATENCY: Histogram = register_histogram!(
        "burst_batch_confirm_latency_seconds",
        "Enqueue-to-receipt latency for batch jobs",
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    ).unwrap();

    // RBF counters
    pub static ref RBF_SENDS: IntCounter = register_int_counter!(
        "burst_rbf_sends_total",
        "Total single-action RBF sends started"
    ).unwrap();

    pub static ref RBF_CONFIRMED: IntCounter = register_int_counter!(
        "burst_rbf_confirmed_total",
        "Total RBF sends that observed a receipt"
    ).unwrap();

    pub static ref RBF_DEADLINE_EXCEEDED: IntCounter = register_int_counter!(
        "burst_rbf_deadline_exceeded_total",
        "Total RBF sends abandoned past their deadline"
    ).unwrap();

    pub static ref FEE_ESCALATIONS: IntCounter = register_int_counter!(
        "burst_fee_escalations_total",
        "Total replace-by-fee bumps"
    ).unwrap();

    pub static ref RBF_CONFIRM_LATENCY: Histogram = register_histogram!(
        "burst_rbf_confirm_latency_seconds",
        "Submission-to-receipt latency for RBF sends",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> DispatchResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
        axum::serve(listener, app).await.unwrap();

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

// Helper functions to record metrics

pub fn set_coalescer_pending(pending: u32) {
    COALESCER_PENDING.set(i64::from(pending));
}

pub fn set_dispatch_queue_depth(depth: usize) {
    DISPATCH_QUEUE_DEPTH.set(depth as i64);
}

pub fn set_admission_in_flight(count: usize) {
    ADMISSION_IN_FLIGHT.set(count as i64);
}

pub fn set_admission_queue_depth(depth: usize) {
    ADMISSION_QUEUE_DEPTH.set(depth as i64);
}

pub fn set_backoff_ms(backoff_ms: u64) {
    BACKOFF_MS.set(backoff_ms as i64);
}

pub fn record_unit_recorded() {
    UNITS_RECORDED.inc();
}

pub fn record_batch_submitted(unit_count: u32) {
    BATCHES_SUBMITTED.inc();
    UNITS_SUBMITTED.inc_by(u64::from(unit_count));
}

pub fn record_batch_confirmed(latency: Duration) {
    BATCHES_CONFIRMED.inc();
    BATCH_CONFIRM_LATENCY.observe(latency.as_secs_f64());
}

pub fn record_batch_timeout() {
    BATCHES_TIMED_OUT.inc();
}

pub fn record_batch_failed() {
    BATCHES_FAILED.inc();
}

pub fn record_rate_limit_hit() {
    RATE_LIMIT_HITS.inc();
}

pub fn record_nonce_conflict() {
    NONCE_CONFLICTS.inc();
}

pub fn record_rbf_send() {
    RBF_SENDS.inc();
}

pub fn record_rbf_confirmed(latency: Duration) {
    RBF_CONFIRMED.inc();
    RBF_CONFIRM_LATENCY.observe(latency.as_secs_f64());
}

pub fn record_rbf_deadline_exceeded() {
    RBF_DEADLINE_EXCEEDED.inc();
}

pub fn record_fee_escalation() {
    FEE_ESCALATIONS.inc();
}
