//! Serve command - starts the API server.

use anyhow::{Context, Result};
use colored::Colorize;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::warn;

use fd_api::{ApiServer, ApiServerConfig, AppState};
use fd_core::db::ensure_admin_user;
use fd_observability::install_prometheus_recorder;

use super::open_database;
use crate::config::{redact_url_password, AppConfig};

/// Server configuration from CLI arguments.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub port: u16,
    pub host: String,
    pub database_url: String,
    pub enable_swagger: bool,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl ServeConfig {
    pub fn bind_address(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}

/// Runs the API server.
pub async fn run_server(config: ServeConfig, app_config: AppConfig) -> Result<()> {
    println!("{} Starting Fleetdesk...", "[server]".cyan());
    let bind_address = config.bind_address()?;

    println!("  {} Database: {}", "→".green(), redact_url_password(&config.database_url));
    let db_pool = open_database(&config.database_url).await?;
    println!("  {} Migrations complete", "✓".green());

    let seeded = ensure_admin_user(&db_pool)
        .await
        .context("Failed to seed the admin account")?;
    if let Some(password) = seeded {
        println!();
        println!("{}", "Created the initial admin account".yellow().bold());
        println!("  {} admin", "Username:".cyan());
        println!("  {} {}", "Password:".cyan(), password);
        println!("  Change it after the first login. It is not shown again.");
    }

    let mut state = AppState::new(db_pool)
        .with_sla_policy(app_config.sla)
        .with_agent_secret(app_config.agent_secret());
    match install_prometheus_recorder() {
        Ok(handle) => state = state.with_prometheus_handle(handle),
        Err(e) => warn!(error = %e, "Metrics recorder unavailable, /metrics disabled"),
    }

    let server_config = ApiServerConfig {
        bind_address,
        request_timeout: Duration::from_secs(config.timeout_secs),
        enable_swagger: config.enable_swagger,
        session_secure: app_config.server.session_secure,
        session_idle_timeout: Duration::from_secs(app_config.server.session_idle_minutes * 60),
        session_secret: app_config.session_secret(),
        ..ApiServerConfig::default()
    };

    println!();
    println!("{}", "Fleetdesk".bold());
    println!("{}", "═".repeat(40));
    println!("  {} http://{}", "Dashboard:".cyan(), bind_address);
    println!("  {} http://{}/portal", "Portal:".cyan(), bind_address);
    if config.enable_swagger {
        println!(
            "  {} http://{}/swagger-ui",
            "Swagger UI:".cyan(),
            bind_address
        );
    }
    if app_config.agent_secret().is_none() {
        println!("  {} agent check-ins disabled", "Agent:".cyan());
    }

    println!();
    println!("{}", "Endpoints:".bold());
    println!("  GET  /health                     - Health check");
    println!("  GET  /ready                      - Readiness probe");
    println!("  GET  /api/v1/assets              - List assets");
    println!("  GET  /api/v1/tickets             - List tickets with SLA state");
    println!("  POST /api/v1/subnets/:id/scan    - Scan a subnet");
    println!("  POST /api/v1/maintenance/run     - Run the maintenance sweep");
    println!("  POST /api/discovery/agent        - Agent check-in (signed)");
    println!("  GET  /metrics                    - Prometheus metrics");
    println!();
    println!("Press {} to stop", "Ctrl+C".yellow());
    println!();

    let server = ApiServer::new(state, server_config);
    server.run().await.context("Server error")?;

    println!();
    println!("{} Server stopped", "[server]".cyan());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serve_config(host: &str) -> ServeConfig {
        ServeConfig {
            port: 8080,
            host: host.to_string(),
            database_url: "sqlite::memory:".to_string(),
            enable_swagger: false,
            timeout_secs: 30,
        }
    }

    #[test]
    fn test_bind_address() {
        let addr = serve_config("127.0.0.1").bind_address().unwrap();
        assert_eq!(addr.port(), 8080);
        assert!(addr.ip().is_loopback());

        assert!(serve_config("localhost.invalid").bind_address().is_err());
    }
}
