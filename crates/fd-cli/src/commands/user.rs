//! Admin account maintenance: bootstrap, password reset and verification.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use tracing::info;

use fd_core::db::{create_user_repository, DbPool};
use fd_core::{
    generate_password, hash_new_password, Actor, AuditAction, AuditEntry, AuditRecorder,
    ChangeSet, EntityType, Role, User,
};

use crate::OutputFormat;

const GENERATED_PASSWORD_LEN: usize = 16;

/// Creates an admin account. Without `password` a random one is generated
/// and printed once.
pub async fn create_admin(
    pool: &DbPool,
    username: &str,
    email: &str,
    password: Option<String>,
) -> Result<User> {
    let repo = create_user_repository(pool);
    let username = username.trim().to_lowercase();
    if username.is_empty() {
        bail!("Username must not be empty");
    }
    if repo.get_by_username(&username).await?.is_some() {
        bail!("Username '{}' is already taken", username);
    }

    let generated = password.is_none();
    let password = password.unwrap_or_else(|| generate_password(GENERATED_PASSWORD_LEN));
    let hash = hash_new_password(&password).context("Password does not meet the policy")?;

    let user = repo
        .create(&User::new(username, email.trim(), hash, Role::Admin))
        .await
        .context("Failed to create user")?;
    info!(user_id = %user.id, "Admin user created from CLI");

    AuditRecorder::new(pool)
        .record(
            AuditEntry::new(&Actor::system(), AuditAction::Create, EntityType::User)
                .entity(user.id, &user.username)
                .with_changes(ChangeSet::created(&user)),
        )
        .await;

    println!("{} Created admin user {}", "✓".green(), user.username.cyan());
    if generated {
        println!("  {} {}", "Password:".yellow().bold(), password);
        println!("  Store it now; it is not shown again.");
    }

    Ok(user)
}

pub async fn reset_password(pool: &DbPool, username: &str, password: &str) -> Result<()> {
    let repo = create_user_repository(pool);
    let user = repo
        .get_by_username(&username.trim().to_lowercase())
        .await?
        .with_context(|| format!("No user named '{}'", username))?;

    let hash = hash_new_password(password).context("Password does not meet the policy")?;
    repo.update_password(user.id, &hash).await?;
    info!(user_id = %user.id, "Password reset from CLI");

    AuditRecorder::new(pool)
        .record(
            AuditEntry::new(&Actor::system(), AuditAction::PasswordReset, EntityType::User)
                .entity(user.id, &user.username),
        )
        .await;

    println!("{} Password updated for {}", "✓".green(), user.username.cyan());
    Ok(())
}

/// Reports whether `password` matches the stored hash. A mismatch is not
/// an error.
pub async fn verify_password(
    pool: &DbPool,
    username: &str,
    password: &str,
    format: OutputFormat,
) -> Result<bool> {
    let user = create_user_repository(pool)
        .get_by_username(&username.trim().to_lowercase())
        .await?
        .with_context(|| format!("No user named '{}'", username))?;

    let matches = fd_core::verify_password(password, &user.password_hash)
        .context("Stored password hash could not be checked")?;

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({ "username": user.username, "matches": matches })
        ),
        OutputFormat::Text if matches => println!("{}", "match".green()),
        OutputFormat::Text => println!("{}", "no match".red()),
    }

    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::scratch_database;
    use fd_core::db::create_audit_repository;
    use fd_core::db::Pagination;
    use fd_core::AuditFilter;

    #[tokio::test]
    async fn test_create_admin_and_verify() {
        let (_dir, pool) = scratch_database().await;

        let user = create_admin(&pool, "  Ops ", "ops@example.com", Some("Fleetdesk9".into()))
            .await
            .unwrap();
        assert_eq!(user.username, "ops");
        assert_eq!(user.role, Role::Admin);

        assert!(verify_password(&pool, "ops", "Fleetdesk9", OutputFormat::Text)
            .await
            .unwrap());
        assert!(!verify_password(&pool, "ops", "wrong", OutputFormat::Json)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_create_admin_rejects_duplicates_and_weak_passwords() {
        let (_dir, pool) = scratch_database().await;

        create_admin(&pool, "ops", "ops@example.com", None).await.unwrap();
        assert!(create_admin(&pool, "OPS", "other@example.com", None)
            .await
            .is_err());
        assert!(create_admin(&pool, "second", "s@example.com", Some("short".into()))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_reset_password_is_audited() {
        let (_dir, pool) = scratch_database().await;
        create_admin(&pool, "ops", "ops@example.com", Some("Fleetdesk9".into()))
            .await
            .unwrap();

        reset_password(&pool, "ops", "Rotated2024").await.unwrap();
        assert!(verify_password(&pool, "ops", "Rotated2024", OutputFormat::Text)
            .await
            .unwrap());

        let filter = AuditFilter {
            entity_type: Some(EntityType::User),
            ..Default::default()
        };
        let entries = create_audit_repository(&pool)
            .list(&filter, &Pagination::default())
            .await
            .unwrap()
            .items;
        assert!(entries
            .iter()
            .any(|e| e.action == AuditAction::PasswordReset && e.actor_name == "system"));
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let (_dir, pool) = scratch_database().await;
        assert!(reset_password(&pool, "ghost", "Rotated2024").await.is_err());
        assert!(verify_password(&pool, "ghost", "x", OutputFormat::Text)
            .await
            .is_err());
    }
}
