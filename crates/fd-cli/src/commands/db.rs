//! Database connection and the `migrate` command.

use anyhow::{Context, Result};
use colored::Colorize;
use tracing::info;

use fd_core::db::{create_pool, run_migrations, DbPool};

/// Connects and brings the schema up to date.
pub async fn open_database(database_url: &str) -> Result<DbPool> {
    let pool = create_pool(database_url)
        .await
        .context("Failed to create database connection pool")?;

    run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    info!(backend = pool.db_type(), "Database ready");
    Ok(pool)
}

pub async fn run_migrate(database_url: &str) -> Result<()> {
    println!("  {} Database: {}", "→".green(), database_url);
    println!("  {} Running migrations...", "→".green());

    let pool = open_database(database_url).await?;
    pool.close().await;

    println!("  {} Migrations complete", "✓".green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrate_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("fleet.db").display());

        run_migrate(&url).await.unwrap();
        run_migrate(&url).await.unwrap();

        let pool = open_database(&url).await.unwrap();
        assert!(pool.is_healthy().await);
    }

    #[tokio::test]
    async fn test_bad_url_is_reported() {
        let err = open_database("mysql://localhost/fleet").await.unwrap_err();
        assert!(err.to_string().contains("connection pool"));
    }
}
