//! Prometheus metrics for the bridge and the ledger.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `bridge_commands_published_total{request_type}` - Commands handed to the broker
//! - `bridge_outcomes_uncorrelated_total{domain}` - Outcomes nobody was waiting for
//! - `bridge_timeouts_total{request_type}` - Requests that gave up waiting
//! - `ledger_transactions_total{direction}` - Transactions applied by the ledger
//! - `ledger_rejections_total{code}` - Commands the ledger refused
//!
//! ## Gauges
//! - `bridge_pending_requests` - Requests currently waiting on an outcome

use crate::domain::Direction;
use crate::messages::ErrorCode;
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// The exporter could not be installed.
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Register descriptions for every metric.
///
/// Call once at startup, after [`install_exporter`].
pub fn register_metrics() {
    describe_counter!(
        "bridge_commands_published_total",
        "Commands published to the broker, by request type"
    );
    describe_counter!(
        "bridge_outcomes_uncorrelated_total",
        "Outcomes that matched no waiting request, by domain"
    );
    describe_counter!(
        "bridge_timeouts_total",
        "Requests that timed out waiting for an outcome, by request type"
    );
    describe_gauge!(
        "bridge_pending_requests",
        "Requests currently waiting for an outcome"
    );

    describe_counter!(
        "ledger_transactions_total",
        "Transactions applied to a balance, by direction"
    );
    describe_counter!(
        "ledger_rejections_total",
        "Commands refused by the ledger, by error code"
    );

    tracing::info!("Metrics registered");
}

/// Serve `/metrics` for Prometheus on `addr`.
///
/// Must run inside a Tokio runtime.
///
/// # Errors
///
/// Returns [`MetricsError::Install`] if the listener cannot bind or a recorder is
/// already installed.
pub fn install_exporter(addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;
    tracing::info!(%addr, "Metrics exporter listening");
    Ok(())
}

/// Current size of the correlation table.
#[allow(clippy::cast_precision_loss)]
pub fn record_pending_requests(pending: usize) {
    metrics::gauge!("bridge_pending_requests").set(pending as f64);
}

/// A command reached the broker.
pub fn record_command_published(request_type: &str) {
    metrics::counter!("bridge_commands_published_total", "request_type" => request_type.to_string())
        .increment(1);
}

/// A caller stopped waiting.
pub fn record_timeout(request_type: &str) {
    metrics::counter!("bridge_timeouts_total", "request_type" => request_type.to_string()).increment(1);
}

/// An outcome arrived with no waiter.
pub fn record_uncorrelated(domain: &'static str) {
    metrics::counter!("bridge_outcomes_uncorrelated_total", "domain" => domain).increment(1);
}

/// The ledger applied a transaction.
pub fn record_transaction_applied(direction: Direction) {
    metrics::counter!("ledger_transactions_total", "direction" => direction.as_str()).increment(1);
}

/// The ledger refused a command.
pub fn record_rejection(code: ErrorCode) {
    metrics::counter!("ledger_rejections_total", "code" => code.as_str()).increment(1);
}
