//! Fleetdesk CLI
//!
//! Runs the server and covers the maintenance tasks that need direct
//! database access: migrations, account bootstrap, the maintenance sweep
//! and offline subnet scans.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use uuid::Uuid;

mod commands;
mod config;
mod validator;

use commands::{open_database, run_server, ServeConfig};
use config::{redact_url_password, AppConfig};
use fd_observability::{init_logging_with_config, LoggingConfig};
use validator::ConfigValidator;

#[derive(Parser)]
#[command(name = "fleetdesk")]
#[command(version)]
#[command(about = "IT asset management and service desk", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "FLEETDESK_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(long, default_value = "text")]
    format: OutputFormat,

    /// Database URL (sqlite:// or postgres://), overrides the config file
    #[arg(short, long, global = true, env = "FLEETDESK_DATABASE_URL")]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid output format: {}", s)),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server, dashboard and employee portal
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Disable Swagger UI
        #[arg(long)]
        no_swagger: bool,

        /// Validate configuration and exit without starting the server
        #[arg(long)]
        validate_only: bool,
    },

    /// Apply database migrations
    Migrate,

    /// Manage admin accounts
    User {
        #[command(subcommand)]
        action: UserCommands,
    },

    /// Manage employee portal access
    Employee {
        #[command(subcommand)]
        action: EmployeeCommands,
    },

    /// Preventive maintenance
    Maintenance {
        #[command(subcommand)]
        action: MaintenanceCommands,
    },

    /// IP address management
    Subnet {
        #[command(subcommand)]
        action: SubnetCommands,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create an admin account
    CreateAdmin {
        #[arg(short, long)]
        username: String,

        #[arg(short, long)]
        email: String,

        /// Generated and printed when omitted
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Set a new password for an account
    ResetPassword {
        #[arg(short, long)]
        username: String,

        #[arg(short, long)]
        password: String,
    },

    /// Check a password against the stored hash
    VerifyPassword {
        #[arg(short, long)]
        username: String,

        #[arg(short, long)]
        password: String,
    },
}

#[derive(Subcommand)]
enum EmployeeCommands {
    /// Set the portal password for an employee
    SetPassword {
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        password: String,
    },
}

#[derive(Subcommand)]
enum MaintenanceCommands {
    /// Open tickets for every asset due for maintenance
    Run,
}

#[derive(Subcommand)]
enum SubnetCommands {
    /// Print the address table and usage of a subnet
    Scan {
        /// Subnet ID
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show {
        /// Show secrets (redacted by default)
        #[arg(long)]
        show_secrets: bool,
    },

    /// Validate the configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone();
    let mut config = load_config(config_path.as_ref())?;
    config.apply_env_overrides();
    if let Some(url) = cli.database.clone() {
        config.database.url = url;
    }

    init_logging_with_config(logging_config(&config, cli.verbose));

    match cli.command {
        Commands::Serve {
            port,
            host,
            no_swagger,
            validate_only,
        } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            if no_swagger {
                config.server.enable_swagger = false;
            }
            cmd_serve(config, validate_only).await
        }
        Commands::Migrate => commands::run_migrate(&config.database.url).await,
        Commands::User { action } => cmd_user(action, &config, cli.format).await,
        Commands::Employee { action } => cmd_employee(action, &config).await,
        Commands::Maintenance { action } => cmd_maintenance(action, &config, cli.format).await,
        Commands::Subnet { action } => cmd_subnet(action, &config, cli.format).await,
        Commands::Config { action } => match action {
            ConfigCommands::Show { show_secrets } => cmd_config(config, show_secrets, cli.format),
            ConfigCommands::Validate => cmd_validate(&config, config_path.as_ref()),
        },
    }
}

/// An explicit `--config` must load. The default location is optional.
fn load_config(explicit: Option<&PathBuf>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        return AppConfig::load(path);
    }
    let path = default_config_path();
    if path.exists() {
        AppConfig::load(&path)
    } else {
        Ok(AppConfig::default())
    }
}

fn default_config_path() -> PathBuf {
    if let Some(dirs) = directories::ProjectDirs::from("com", "fleetdesk", "fleetdesk") {
        dirs.config_dir().join("config.yaml")
    } else {
        PathBuf::from("config/fleetdesk.yaml")
    }
}

fn logging_config(config: &AppConfig, verbose: bool) -> LoggingConfig {
    let mut logging = config.logging.to_config().unwrap_or_else(|e| {
        eprintln!("{}: {}, using defaults", "Invalid logging settings".yellow(), e);
        LoggingConfig::default()
    });
    if verbose {
        logging.level = tracing::Level::DEBUG;
    }
    logging
}

async fn cmd_serve(config: AppConfig, validate_only: bool) -> Result<()> {
    println!("{}", "Validating configuration...".cyan());

    let validation_result = ConfigValidator::validate(&config);
    validation_result.print();

    if validation_result.has_errors() {
        println!();
        bail!("Configuration validation failed. Fix the errors above and try again.");
    }

    if validate_only {
        println!();
        println!(
            "{}",
            "Configuration is valid. Server can be started."
                .green()
                .bold()
        );
        return Ok(());
    }

    println!();
    let serve_config = ServeConfig {
        port: config.server.port,
        host: config.server.host.clone(),
        database_url: config.database.url.clone(),
        enable_swagger: config.server.enable_swagger,
        timeout_secs: config.server.timeout_secs,
    };
    run_server(serve_config, config).await
}

async fn cmd_user(action: UserCommands, config: &AppConfig, format: OutputFormat) -> Result<()> {
    let pool = open_database(&config.database.url).await?;

    match action {
        UserCommands::CreateAdmin {
            username,
            email,
            password,
        } => {
            commands::create_admin(&pool, &username, &email, password).await?;
        }
        UserCommands::ResetPassword { username, password } => {
            commands::reset_password(&pool, &username, &password).await?;
        }
        UserCommands::VerifyPassword { username, password } => {
            commands::verify_password(&pool, &username, &password, format).await?;
        }
    }

    pool.close().await;
    Ok(())
}

async fn cmd_employee(action: EmployeeCommands, config: &AppConfig) -> Result<()> {
    let pool = open_database(&config.database.url).await?;

    match action {
        EmployeeCommands::SetPassword { email, password } => {
            commands::set_portal_password(&pool, &email, &password).await?;
        }
    }

    pool.close().await;
    Ok(())
}

async fn cmd_maintenance(
    action: MaintenanceCommands,
    config: &AppConfig,
    format: OutputFormat,
) -> Result<()> {
    let pool = open_database(&config.database.url).await?;

    match action {
        MaintenanceCommands::Run => {
            commands::run_maintenance(&pool, config.sla, format).await?;
        }
    }

    pool.close().await;
    Ok(())
}

async fn cmd_subnet(action: SubnetCommands, config: &AppConfig, format: OutputFormat) -> Result<()> {
    let pool = open_database(&config.database.url).await?;

    match action {
        SubnetCommands::Scan { id } => {
            commands::scan_subnet(&pool, id, format).await?;
        }
    }

    pool.close().await;
    Ok(())
}

fn cmd_config(config: AppConfig, show_secrets: bool, format: OutputFormat) -> Result<()> {
    let display_config = if show_secrets {
        config
    } else {
        config.redact_secrets()
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&display_config)?),
        OutputFormat::Text => {
            println!("{}", "Current Configuration".bold());
            println!("─────────────────────────");
            print!("{}", serde_yaml::to_string(&display_config)?);
        }
    }

    Ok(())
}

fn cmd_validate(config: &AppConfig, path: Option<&PathBuf>) -> Result<()> {
    let source = path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| default_config_path().display().to_string());
    println!("Validating configuration: {}", source.cyan());

    let validation_result = ConfigValidator::validate(config);
    validation_result.print();

    println!();
    println!("{}", "Configuration Summary".bold());
    println!("─────────────────────");
    println!("  Listen: {}:{}", config.server.host, config.server.port);
    println!("  Database: {}", redact_url_password(&config.database.url));
    println!(
        "  SLA hours (critical/high/medium/low): {}/{}/{}/{}",
        config.sla.critical_hours, config.sla.high_hours, config.sla.medium_hours, config.sla.low_hours
    );
    println!(
        "  Agent endpoints: {}",
        if config.agent_secret().is_some() {
            "enabled".green()
        } else {
            "disabled".yellow()
        }
    );

    if validation_result.has_errors() {
        println!();
        bail!("Configuration validation failed. Fix the errors above.");
    }

    println!();
    if validation_result.warnings.is_empty() {
        println!("{}", "Configuration is valid.".green().bold());
    } else {
        println!(
            "{}",
            "Configuration is valid with warnings. Review the warnings above."
                .yellow()
                .bold()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_output_format_parsing() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from([
            "fleetdesk",
            "user",
            "create-admin",
            "--username",
            "ops",
            "--email",
            "ops@example.com",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::User {
                action: UserCommands::CreateAdmin { password: None, .. }
            }
        ));

        let cli = Cli::try_parse_from([
            "fleetdesk",
            "subnet",
            "scan",
            "--database",
            "sqlite::memory:",
            "6f1c1a0e-59a4-4a53-9a6b-4b5bbf6c0e7d",
        ])
        .unwrap();
        assert_eq!(cli.database.as_deref(), Some("sqlite::memory:"));
        assert!(matches!(cli.command, Commands::Subnet { .. }));

        assert!(Cli::try_parse_from(["fleetdesk", "subnet", "scan", "not-a-uuid"]).is_err());
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yaml");
        assert!(load_config(Some(&missing)).is_err());

        let present = dir.path().join("fleetdesk.yaml");
        std::fs::write(&present, "server:\n  port: 9000\n").unwrap();
        assert_eq!(load_config(Some(&present)).unwrap().server.port, 9000);
    }

    #[test]
    fn test_verbose_forces_debug() {
        let config = AppConfig::default();
        assert_eq!(logging_config(&config, true).level, tracing::Level::DEBUG);
        assert_eq!(logging_config(&config, false).level, tracing::Level::INFO);
    }
}
