//! Prometheus metrics.
//!
//! Counters are emitted with the `metrics` macros at the call sites; this
//! module registers their descriptions and installs the exporter.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

pub const HTTP_REQUEST_DURATION: &str = "fleetdesk_http_request_duration_seconds";
pub const HTTP_REQUESTS_TOTAL: &str = "fleetdesk_http_requests_total";
pub const TICKETS_CREATED: &str = "fleetdesk_tickets_created_total";
pub const AUDIT_WRITE_FAILURES: &str = "fleetdesk_audit_write_failures_total";
pub const SUBNET_SCANS: &str = "fleetdesk_subnet_scans_total";
pub const MAINTENANCE_TICKETS_CREATED: &str = "fleetdesk_maintenance_tickets_created_total";
pub const AGENT_CHECKINS: &str = "fleetdesk_agent_checkins_total";
pub const LOGIN_ATTEMPTS: &str = "fleetdesk_login_attempts_total";
pub const OPEN_TICKETS: &str = "fleetdesk_open_tickets";

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Failed to install Prometheus recorder: {0}")]
    Install(#[from] BuildError),
}

pub fn register_metrics() {
    describe_histogram!(HTTP_REQUEST_DURATION, "HTTP request latency");
    describe_counter!(HTTP_REQUESTS_TOTAL, "HTTP requests by method and status");
    describe_counter!(TICKETS_CREATED, "Tickets created, by source");
    describe_counter!(
        AUDIT_WRITE_FAILURES,
        "Audit entries that could not be written"
    );
    describe_counter!(SUBNET_SCANS, "Subnet address scans performed");
    describe_counter!(
        MAINTENANCE_TICKETS_CREATED,
        "Tickets opened by the maintenance sweep"
    );
    describe_counter!(AGENT_CHECKINS, "Agent discovery check-ins");
    describe_counter!(LOGIN_ATTEMPTS, "Login attempts, by result");
    describe_gauge!(OPEN_TICKETS, "Open tickets at the last dashboard refresh");
}

/// Installs the global Prometheus recorder and returns the handle that
/// renders the exposition for `GET /metrics`.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(HTTP_REQUEST_DURATION.to_string()),
            &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
        )?
        .install_recorder()?;
    register_metrics();
    Ok(handle)
}

pub fn record_http_request(method: &str, status: u16, elapsed: Duration) {
    histogram!(HTTP_REQUEST_DURATION, "method" => method.to_string()).record(elapsed.as_secs_f64());
    counter!(HTTP_REQUESTS_TOTAL, "method" => method.to_string(), "status" => status.to_string())
        .increment(1);
}

pub fn record_login_attempt(success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!(LOGIN_ATTEMPTS, "result" => result).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        register_metrics();
        record_http_request("GET", 200, Duration::from_millis(3));
        record_login_attempt(false);
    }

    #[test]
    fn test_metric_names_are_namespaced() {
        for name in [
            HTTP_REQUEST_DURATION,
            TICKETS_CREATED,
            AUDIT_WRITE_FAILURES,
            SUBNET_SCANS,
            MAINTENANCE_TICKETS_CREATED,
            AGENT_CHECKINS,
            LOGIN_ATTEMPTS,
        ] {
            assert!(name.starts_with("fleetdesk_"), "{name}");
        }
    }
}
