//! Startup validation of the effective configuration.

use crate::config::AppConfig;
use colored::Colorize;
use std::net::SocketAddr;

const MIN_SESSION_SECRET_LEN: usize = 32;

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Critical errors that prevent startup.
    pub errors: Vec<String>,
    /// Warnings that should be addressed but don't prevent startup.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Prints the validation result to the console.
    pub fn print(&self) {
        if !self.warnings.is_empty() {
            println!();
            println!("{}", "Configuration Warnings:".yellow().bold());
            for warning in &self.warnings {
                println!("  {} {}", "⚠".yellow(), warning);
            }
        }

        if !self.errors.is_empty() {
            println!();
            println!("{}", "Configuration Errors:".red().bold());
            for error in &self.errors {
                println!("  {} {}", "✗".red(), error);
            }
        }

        if self.errors.is_empty() && self.warnings.is_empty() {
            println!("  {} Configuration OK", "✓".green());
        }
    }
}

/// Validates application configuration before startup.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &AppConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        Self::validate_server(config, &mut result);
        Self::validate_database_url(config, &mut result);
        Self::validate_secrets(config, &mut result);
        Self::validate_sla(config, &mut result);
        Self::validate_logging(config, &mut result);

        result
    }

    fn validate_server(config: &AppConfig, result: &mut ValidationResult) {
        let server = &config.server;
        if server.port == 0 {
            result.add_error("server.port must be between 1 and 65535");
        }
        if format!("{}:{}", server.host, server.port)
            .parse::<SocketAddr>()
            .is_err()
        {
            result.add_error(format!(
                "server.host '{}' is not a valid IP address",
                server.host
            ));
        }
        if server.session_idle_minutes == 0 {
            result.add_error("server.session_idle_minutes must be positive");
        }
        if !server.session_secure {
            result.add_warning(
                "Session cookies are sent without the Secure flag. \
                 Only use this behind plain HTTP in development.",
            );
        }
    }

    fn validate_database_url(config: &AppConfig, result: &mut ValidationResult) {
        let url = &config.database.url;

        if !url.starts_with("sqlite:")
            && !url.starts_with("postgres://")
            && !url.starts_with("postgresql://")
        {
            result.add_error(format!(
                "Invalid database URL '{}'. Must start with sqlite: or postgres://",
                url
            ));
        }
    }

    fn validate_secrets(config: &AppConfig, result: &mut ValidationResult) {
        match config.session_secret() {
            None => result.add_warning(
                "session_secret not set. A random key is used and every restart \
                 signs users out. Set FLEETDESK_SESSION_SECRET for stable sessions.",
            ),
            Some(secret) if secret.len() < MIN_SESSION_SECRET_LEN => {
                result.add_warning(format!(
                    "session_secret is {} characters; use at least {}.",
                    secret.len(),
                    MIN_SESSION_SECRET_LEN
                ))
            }
            Some(_) => {}
        }

        if config.agent_secret().is_none() {
            result.add_warning(
                "agent_secret not set. Agent check-ins will be refused with 503 \
                 until FLEETDESK_AGENT_SECRET is configured.",
            );
        }
    }

    fn validate_sla(config: &AppConfig, result: &mut ValidationResult) {
        if let Err(e) = config.sla.validate() {
            result.add_error(e);
        }
    }

    fn validate_logging(config: &AppConfig, result: &mut ValidationResult) {
        if let Err(e) = config.logging.to_config() {
            result.add_error(format!("logging: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.session_secret = "x".repeat(MIN_SESSION_SECRET_LEN);
        config.agent_secret = "agent".to_string();
        config
    }

    #[test]
    fn test_validation_result_operations() {
        let mut result = ValidationResult::new();
        assert!(!result.has_errors());

        result.add_error("Test error");
        result.add_warning("Test warning");
        assert!(result.has_errors());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_valid_config_is_clean() {
        let result = ConfigValidator::validate(&valid_config());
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_defaults_warn_about_secrets() {
        let result = ConfigValidator::validate(&AppConfig::default());
        assert!(!result.has_errors());
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn test_invalid_database_url() {
        let mut config = valid_config();
        config.database.url = "mysql://localhost/fleet".to_string();

        let result = ConfigValidator::validate(&config);
        assert!(result.has_errors());
        assert!(result.errors[0].contains("mysql://"));
    }

    #[test]
    fn test_invalid_host() {
        let mut config = valid_config();
        config.server.host = "not an address".to_string();
        assert!(ConfigValidator::validate(&config).has_errors());
    }

    #[test]
    fn test_non_positive_sla_window() {
        let mut config = valid_config();
        config.sla.high_hours = 0;

        let result = ConfigValidator::validate(&config);
        assert!(result.errors.iter().any(|e| e.contains("sla.high_hours")));
    }

    #[test]
    fn test_unknown_log_format() {
        let mut config = valid_config();
        config.logging.format = "xml".to_string();
        assert!(ConfigValidator::validate(&config).has_errors());
    }

    #[test]
    fn test_short_session_secret_warns() {
        let mut config = valid_config();
        config.session_secret = "short".to_string();

        let result = ConfigValidator::validate(&config);
        assert!(!result.has_errors());
        assert_eq!(result.warnings.len(), 1);
    }
}
