//! # fd-observability
//!
//! Logging and Prometheus metrics for Fleetdesk.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, init_logging_with_config, LogSettings, LoggingConfig};
pub use metrics::{install_prometheus_recorder, register_metrics, MetricsError};
