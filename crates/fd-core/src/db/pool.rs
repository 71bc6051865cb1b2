//! Connection pool over SQLite or PostgreSQL.

use super::DbError;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Pool, Postgres, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Escapes `%`, `_` and `\` so user input matches literally in
/// `LIKE ... ESCAPE '\'`.
///
/// ```
/// assert_eq!(fd_core::db::escape_like_pattern("50%_off"), r"50\%\_off");
/// ```
pub fn escape_like_pattern(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len() + 4);
    for c in pattern.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Substring pattern for a free-text search box.
pub fn make_like_pattern(search: &str) -> String {
    format!("%{}%", escape_like_pattern(search.trim()))
}

/// Pool for whichever backend the URL names.
#[derive(Clone, Debug)]
pub enum DbPool {
    Sqlite(Pool<Sqlite>),
    Postgres(Pool<Postgres>),
}

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 20),
            min_connections: env_or("DATABASE_MIN_CONNECTIONS", 1),
            acquire_timeout: Duration::from_secs(env_or("DATABASE_ACQUIRE_TIMEOUT_SECS", 30)),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }
}

impl PoolOptions {
    /// Single shared connection with no idle reaping, required for
    /// `mode=memory&cache=shared` databases.
    pub fn single_connection() -> Self {
        Self {
            max_connections: 1,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: None,
        }
    }
}

/// Connects using [`PoolOptions::default`].
///
/// `sqlite:` URLs select SQLite (the file is created if missing);
/// `postgres://` and `postgresql://` select PostgreSQL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, DbError> {
    create_pool_with_options(database_url, PoolOptions::default()).await
}

pub async fn create_pool_with_options(
    database_url: &str,
    options: PoolOptions,
) -> Result<DbPool, DbError> {
    if database_url.starts_with("sqlite:") {
        info!(max_connections = options.max_connections, "Opening SQLite pool");
        let connect = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .min_connections(options.min_connections)
            .acquire_timeout(options.acquire_timeout)
            .idle_timeout(options.idle_timeout)
            .connect_with(connect)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;
        Ok(DbPool::Sqlite(pool))
    } else if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        info!(max_connections = options.max_connections, "Opening PostgreSQL pool");
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(options.max_connections)
            .min_connections(options.min_connections)
            .acquire_timeout(options.acquire_timeout)
            .idle_timeout(options.idle_timeout)
            .connect(database_url)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;
        Ok(DbPool::Postgres(pool))
    } else {
        Err(DbError::Configuration(format!(
            "unsupported database URL scheme '{}', expected sqlite: or postgres://",
            database_url.split(':').next().unwrap_or_default()
        )))
    }
}

impl DbPool {
    pub fn db_type(&self) -> &'static str {
        match self {
            DbPool::Sqlite(_) => "sqlite",
            DbPool::Postgres(_) => "postgres",
        }
    }

    pub async fn is_healthy(&self) -> bool {
        match self {
            DbPool::Sqlite(pool) => sqlx::query("SELECT 1").execute(pool).await.is_ok(),
            DbPool::Postgres(pool) => sqlx::query("SELECT 1").execute(pool).await.is_ok(),
        }
    }

    pub fn size(&self) -> u32 {
        match self {
            DbPool::Sqlite(pool) => pool.size(),
            DbPool::Postgres(pool) => pool.size(),
        }
    }

    pub async fn close(&self) {
        match self {
            DbPool::Sqlite(pool) => pool.close().await,
            DbPool::Postgres(pool) => pool.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like_pattern() {
        assert_eq!(escape_like_pattern("laptop"), "laptop");
        assert_eq!(escape_like_pattern("100%"), r"100\%");
        assert_eq!(escape_like_pattern("host_01"), r"host\_01");
        assert_eq!(escape_like_pattern(r"C:\temp"), r"C:\\temp");
    }

    #[test]
    fn test_make_like_pattern_trims() {
        assert_eq!(make_like_pattern("  dell "), "%dell%");
        assert_eq!(make_like_pattern("a_b"), r"%a\_b%");
    }

    #[tokio::test]
    async fn test_unknown_scheme_rejected() {
        let err = create_pool("mysql://localhost/db").await.err().unwrap();
        assert!(matches!(err, DbError::Configuration(ref m) if m.contains("mysql")));
    }

    #[tokio::test]
    async fn test_sqlite_memory_pool_is_healthy() {
        let url = format!(
            "sqlite:file:pool_{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4()
        );
        let pool = create_pool_with_options(&url, PoolOptions::single_connection())
            .await
            .unwrap();
        assert_eq!(pool.db_type(), "sqlite");
        assert!(pool.is_healthy().await);
    }
}
