//! Prometheus metrics for batch dispatch.
//!
//! Recording is always cheap: without an installed recorder the macros are
//! no-ops, so the exporter only runs when a metrics port is configured.
//!
//! # Example
//!
//! ```ignore
//! use sweep_runner::metrics::{MetricsConfig, init_metrics};
//!
//! init_metrics(&MetricsConfig::with_port(9090))?;
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use ::metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::dispatch::DispatchStatus;

/// Configuration for the metrics exporter.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Address to bind the metrics HTTP listener.
    pub listen_addr: SocketAddr,
    /// Histogram buckets for request latency (in seconds).
    pub latency_buckets: Vec<f64>,
}

impl MetricsConfig {
    /// Listen on all interfaces at `port`.
    #[must_use]
    pub fn with_port(port: u16) -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            // Backtests run from seconds to tens of minutes
            latency_buckets: vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0],
        }
    }
}

/// Initialize the Prometheus metrics exporter.
///
/// This starts an HTTP server that exposes metrics at `/metrics`.
///
/// # Errors
///
/// Returns an error if the metrics exporter fails to start (e.g., port already in use).
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .set_buckets(&config.latency_buckets)
        .map_err(|e| MetricsError::Configuration(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    describe_metrics();
    tracing::info!(
        addr = %config.listen_addr,
        "Prometheus metrics exporter started"
    );

    Ok(())
}

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to configure metrics exporter.
    #[error("metrics configuration error: {0}")]
    Configuration(String),
    /// Failed to install metrics exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

fn describe_metrics() {
    describe_counter!(
        "sweep_configurations_total",
        "Configurations with a recorded result, by status"
    );
    describe_counter!("sweep_attempts_total", "Backtest requests issued");
    describe_counter!("sweep_retries_total", "Requests retried after a transient failure");
    describe_histogram!(
        "sweep_request_duration_seconds",
        "Time from request to response or failure"
    );
    describe_counter!(
        "sweep_sanitized_kpis_total",
        "Non-finite KPI values replaced by empty cells"
    );
}

/// Record the final status of a configuration.
pub fn record_result(status: DispatchStatus) {
    counter!("sweep_configurations_total", "status" => status.as_str()).increment(1);
}

/// Record one request attempt and its duration.
pub fn record_attempt(duration: Duration) {
    counter!("sweep_attempts_total").increment(1);
    histogram!("sweep_request_duration_seconds").record(duration.as_secs_f64());
}

/// Record a scheduled retry.
pub fn record_retry() {
    counter!("sweep_retries_total").increment(1);
}

/// Record sanitized KPI values.
pub fn record_sanitized(fields: usize) {
    counter!("sweep_sanitized_kpis_total").increment(fields as u64);
}
