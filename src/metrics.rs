//! Prometheus metrics for signature authentication.
//!
//! Metrics are exposed via a dedicated HTTP listener (default: `0.0.0.0:9090`).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `sigauth_requests_total` - Protected requests by outcome
//!   (`authenticated`, `rejected`, `throttled`)
//! - `sigauth_rejections_total` - Rejections by reason (`missing_headers`,
//!   `request_expired`, `replay_detected`, ...)
//! - `sigauth_responses_signed_total` - Signed responses by status class
//!
//! ## Histograms
//! - `sigauth_validation_duration_seconds` - Time spent validating a request
//!
//! ## Gauges
//! - `sigauth_nonce_store_entries` - Nonce store entries by state
//!   (`total`, `active`, `expired`)

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

use crate::nonce::NonceStats;

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "sigauth_requests_total";
    pub const REJECTIONS_TOTAL: &str = "sigauth_rejections_total";
    pub const RESPONSES_SIGNED_TOTAL: &str = "sigauth_responses_signed_total";
    pub const VALIDATION_DURATION_SECONDS: &str = "sigauth_validation_duration_seconds";
    pub const NONCE_STORE_ENTRIES: &str = "sigauth_nonce_store_entries";
}

/// Initialize the Prometheus metrics exporter.
///
/// # Errors
///
/// Returns a message if the exporter could not be installed (e.g. the port
/// is taken or a recorder is already set).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::REQUESTS_TOTAL,
        "Protected requests by authentication outcome"
    );
    describe_counter!(
        names::REJECTIONS_TOTAL,
        "Rejected requests by failure reason"
    );
    describe_counter!(
        names::RESPONSES_SIGNED_TOTAL,
        "Responses carrying a signature"
    );
    describe_histogram!(
        names::VALIDATION_DURATION_SECONDS,
        "Request signature validation duration in seconds"
    );
    describe_gauge!(
        names::NONCE_STORE_ENTRIES,
        "Entries held by the in-process nonce store"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

pub fn record_authenticated() {
    counter!(names::REQUESTS_TOTAL, "outcome" => "authenticated").increment(1);
}

/// Record a rejection with its [`AuthError::reason`](crate::error::AuthError::reason).
pub fn record_rejection(reason: &'static str) {
    counter!(names::REQUESTS_TOTAL, "outcome" => "rejected").increment(1);
    counter!(names::REJECTIONS_TOTAL, "reason" => reason).increment(1);
}

pub fn record_throttled() {
    counter!(names::REQUESTS_TOTAL, "outcome" => "throttled").increment(1);
}

pub fn record_response_signed(status: u16) {
    let class = match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    };
    counter!(names::RESPONSES_SIGNED_TOTAL, "status" => class).increment(1);
}

pub fn record_validation_duration(duration_secs: f64) {
    histogram!(names::VALIDATION_DURATION_SECONDS).record(duration_secs);
}

/// Publish nonce store counts. TTL-managed stores have no local counts and
/// are skipped.
pub fn set_nonce_store_stats(stats: &NonceStats) {
    if stats.ttl_managed {
        return;
    }
    gauge!(names::NONCE_STORE_ENTRIES, "state" => "total").set(stats.total_entries as f64);
    gauge!(names::NONCE_STORE_ENTRIES, "state" => "active").set(stats.active_entries as f64);
    gauge!(names::NONCE_STORE_ENTRIES, "state" => "expired").set(stats.expired_entries as f64);
}
