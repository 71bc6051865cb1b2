//! First-run seeding of the admin account.

use super::{create_user_repository, DbError, DbPool};
use crate::auth::{Role, User};
use crate::password::{generate_password, hash_password, PasswordError};
use thiserror::Error;
use tracing::{info, warn};

/// Environment variable holding the initial admin password.
pub const ADMIN_PASSWORD_ENV: &str = "FLEETDESK_ADMIN_PASSWORD";

const GENERATED_PASSWORD_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum SeedError {
    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Password(#[from] PasswordError),
}

/// Creates the `admin` account when the users table is empty.
///
/// The password comes from `FLEETDESK_ADMIN_PASSWORD`, or is generated.
/// Returns `Some(password)` only when an account was created.
pub async fn ensure_admin_user(pool: &DbPool) -> Result<Option<String>, SeedError> {
    let configured = std::env::var(ADMIN_PASSWORD_ENV)
        .ok()
        .filter(|p| !p.is_empty());
    ensure_admin_user_with(pool, configured).await
}

pub async fn ensure_admin_user_with(
    pool: &DbPool,
    password: Option<String>,
) -> Result<Option<String>, SeedError> {
    let repo = create_user_repository(pool);
    if repo.any_exist().await? {
        info!("Users already exist, skipping admin seed");
        return Ok(None);
    }

    let password = password.unwrap_or_else(|| {
        warn!("{} not set, generated a random admin password", ADMIN_PASSWORD_ENV);
        generate_password(GENERATED_PASSWORD_LEN)
    });

    let admin = User::new("admin", "admin@localhost", hash_password(&password)?, Role::Admin);
    repo.create(&admin).await?;
    info!(user_id = %admin.id, "Created default admin user: admin");

    Ok(Some(password))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::password::verify_password;

    #[tokio::test]
    async fn test_seeds_once() {
        let pool = test_pool().await;

        let password = ensure_admin_user_with(&pool, None).await.unwrap().unwrap();
        assert_eq!(password.len(), GENERATED_PASSWORD_LEN);

        let admin = create_user_repository(&pool)
            .get_by_username("admin")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(admin.role, Role::Admin);
        assert!(verify_password(&password, &admin.password_hash).unwrap());

        assert!(ensure_admin_user_with(&pool, Some("Another1".into()))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_configured_password_is_used() {
        let pool = test_pool().await;
        let password = ensure_admin_user_with(&pool, Some("Configured9".into()))
            .await
            .unwrap();
        assert_eq!(password.as_deref(), Some("Configured9"));
    }
}
