//! Prometheus metrics for the gateway.
//!
//! Everything lives in the global default registry and is served by the
//! `/metrics` route.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_counter_vec, register_histogram_vec, CounterVec, Encoder,
    HistogramVec, TextEncoder,
};

use crate::errors::GatewayError;

pub struct GatewayMetrics {
    upstream_attempts_total: CounterVec,
    upstream_duration_seconds: HistogramVec,
    credential_acquisitions_total: CounterVec,
    errors_total: CounterVec,
}

static METRICS: Lazy<GatewayMetrics> = Lazy::new(GatewayMetrics::register);

/// Outcome of a single attempt against one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Unauthorized,
    Status,
    Transport,
}

impl AttemptOutcome {
    fn as_str(self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Unauthorized => "unauthorized",
            AttemptOutcome::Status => "status",
            AttemptOutcome::Transport => "transport",
        }
    }
}

impl GatewayMetrics {
    fn register() -> Self {
        // Metric definitions are static, so registration can only fail on a
        // duplicate name within this module.
        let upstream_attempts_total = register_counter_vec!(
            opts!(
                "p0cit_gateway_upstream_attempts_total",
                "Attempts against upstream candidates"
            ),
            &["resource", "outcome"]
        )
        .expect("failed to register p0cit_gateway_upstream_attempts_total");

        let upstream_duration_seconds = register_histogram_vec!(
            histogram_opts!(
                "p0cit_gateway_upstream_duration_seconds",
                "Latency of upstream attempts in seconds",
                vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 8.0]
            ),
            &["resource"]
        )
        .expect("failed to register p0cit_gateway_upstream_duration_seconds");

        let credential_acquisitions_total = register_counter_vec!(
            opts!(
                "p0cit_gateway_credential_acquisitions_total",
                "Login exchanges performed by credential managers"
            ),
            &["kind", "result"]
        )
        .expect("failed to register p0cit_gateway_credential_acquisitions_total");

        let errors_total = register_counter_vec!(
            opts!("p0cit_gateway_errors_total", "Classified errors returned to callers"),
            &["kind"]
        )
        .expect("failed to register p0cit_gateway_errors_total");

        Self {
            upstream_attempts_total,
            upstream_duration_seconds,
            credential_acquisitions_total,
            errors_total,
        }
    }
}

pub fn record_attempt(resource: &str, outcome: AttemptOutcome, elapsed_secs: f64) {
    METRICS
        .upstream_attempts_total
        .with_label_values(&[resource, outcome.as_str()])
        .inc();
    METRICS
        .upstream_duration_seconds
        .with_label_values(&[resource])
        .observe(elapsed_secs);
}

pub fn record_acquisition(kind: &str, ok: bool) {
    METRICS
        .credential_acquisitions_total
        .with_label_values(&[kind, if ok { "ok" } else { "error" }])
        .inc();
}

pub fn record_error(err: &GatewayError) {
    METRICS.errors_total.with_label_values(&[err.code()]).inc();
}

/// Encode all registered metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    Lazy::force(&METRICS);
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_series_are_exported() {
        record_attempt("projects", AttemptOutcome::Success, 0.02);
        record_acquisition("service", true);
        record_error(&GatewayError::NotFound { upstream: None });

        let output = encode_metrics();
        assert!(output.contains("p0cit_gateway_upstream_attempts_total"));
        assert!(output.contains(r#"outcome="success""#));
        assert!(output.contains(r#"kind="not_found""#));
        assert!(output.contains("p0cit_gateway_credential_acquisitions_total"));
    }
}
