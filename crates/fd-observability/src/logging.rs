//! Structured logging for Fleetdesk on top of `tracing-subscriber`.

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Crates whose output is governed by the configured level when `RUST_LOG`
/// is not set.
const FLEETDESK_TARGETS: &[&str] = &["fd_core", "fd_api", "fd_cli", "fd_observability", "fleetdesk"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: Level,
    /// JSON lines instead of human-readable output.
    pub json_format: bool,
    pub include_spans: bool,
    pub include_location: bool,
    pub include_thread_ids: bool,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            include_spans: false,
            include_location: false,
            include_thread_ids: false,
            include_target: true,
        }
    }
}

impl LoggingConfig {
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            json_format: false,
            include_spans: true,
            include_location: true,
            include_thread_ids: true,
            include_target: true,
        }
    }

    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            json_format: true,
            include_spans: false,
            include_location: false,
            include_thread_ids: false,
            include_target: true,
        }
    }

    /// Default filter directive, e.g. `fd_core=info,fd_api=info,...`.
    pub fn filter_directive(&self) -> String {
        let level = self.level.as_str().to_ascii_lowercase();
        FLEETDESK_TARGETS
            .iter()
            .map(|target| format!("{target}={level}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Settings as they appear in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// One of trace, debug, info, warn, error.
    pub level: String,
    /// `json` or `pretty`.
    pub format: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LogSettings {
    pub fn to_config(&self) -> Result<LoggingConfig, String> {
        let level = self
            .level
            .parse::<Level>()
            .map_err(|_| format!("unknown log level '{}'", self.level))?;
        let json_format = match self.format.as_str() {
            "json" => true,
            "pretty" | "text" => false,
            other => return Err(format!("unknown log format '{other}'")),
        };
        Ok(LoggingConfig {
            level,
            json_format,
            ..LoggingConfig::default()
        })
    }
}

pub fn init_logging() {
    init_logging_with_config(LoggingConfig::default());
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
pub fn init_logging_with_config(config: LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let span_events = if config.include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    if config.json_format {
        let fmt_layer = fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_thread_ids(config.include_thread_ids)
            .with_target(config.include_target);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    } else {
        let fmt_layer = fmt::layer()
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_thread_ids(config.include_thread_ids)
            .with_target(config.include_target);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }
}

/// Span for work on a single request.
#[macro_export]
macro_rules! request_span {
    ($request_id:expr) => {
        tracing::info_span!("request", request_id = %$request_id)
    };
    ($request_id:expr, $($field:tt)*) => {
        tracing::info_span!("request", request_id = %$request_id, $($field)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(LoggingConfig::default().level, Level::INFO);
        assert!(LoggingConfig::production().json_format);
        assert_eq!(LoggingConfig::development().level, Level::DEBUG);
    }

    #[test]
    fn test_filter_directive_covers_workspace_crates() {
        let directive = LoggingConfig::development().filter_directive();
        assert!(directive.contains("fd_core=debug"));
        assert!(directive.contains("fd_api=debug"));
        assert!(directive.contains("fleetdesk=debug"));
    }

    #[test]
    fn test_log_settings_conversion() {
        let settings = LogSettings {
            level: "warn".into(),
            format: "json".into(),
        };
        let config = settings.to_config().unwrap();
        assert_eq!(config.level, Level::WARN);
        assert!(config.json_format);

        let bad = LogSettings {
            level: "loud".into(),
            ..Default::default()
        };
        assert!(bad.to_config().is_err());
        let bad = LogSettings {
            format: "xml".into(),
            ..Default::default()
        };
        assert!(bad.to_config().is_err());
    }
}
