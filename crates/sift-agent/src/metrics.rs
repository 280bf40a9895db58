//! Prometheus metrics for the reporting pipeline.
//!
//! Tracks report submission, admission drops, loss notices and transmission
//! outcomes.
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_int_counter, register_int_gauge, CounterVec, Encoder,
    IntCounter, IntGauge, TextEncoder,
};

lazy_static! {
    /// Reports handed to the sender
    pub static ref REPORTS_SUBMITTED_TOTAL: IntCounter = register_int_counter!(
        "sift_reports_submitted_total",
        "Total number of reports submitted to the sender"
    )
    .unwrap();

    /// Reports dropped at admission because too many were in flight
    pub static ref REPORTS_DROPPED_TOTAL: IntCounter = register_int_counter!(
        "sift_reports_dropped_total",
        "Total number of reports dropped because the in-flight limit was reached"
    )
    .unwrap();

    /// Synthetic loss notices dispatched
    pub static ref LOSS_NOTICES_TOTAL: IntCounter = register_int_counter!(
        "sift_loss_notices_total",
        "Total number of report loss notices dispatched"
    )
    .unwrap();

    /// Transmission attempts by outcome
    pub static ref TRANSMISSIONS_TOTAL: CounterVec = register_counter_vec!(
        "sift_transmissions_total",
        "Total number of report transmission attempts",
        &["result"]  // result: success|error
    )
    .unwrap();

    /// Reports awaiting acknowledgment
    pub static ref REPORTS_IN_FLIGHT: IntGauge = register_int_gauge!(
        "sift_reports_in_flight",
        "Number of reports dispatched and not yet acknowledged"
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_report_submitted() {
    REPORTS_SUBMITTED_TOTAL.inc();
}

pub fn record_report_dropped() {
    REPORTS_DROPPED_TOTAL.inc();
}

pub fn record_loss_notice() {
    LOSS_NOTICES_TOTAL.inc();
}

pub fn record_transmission(success: bool) {
    let result = if success { "success" } else { "error" };
    TRANSMISSIONS_TOTAL.with_label_values(&[result]).inc();
}

pub fn set_in_flight(count: u64) {
    REPORTS_IN_FLIGHT.set(i64::try_from(count).unwrap_or(i64::MAX));
}
