//! Portal access bootstrap for employees.

use anyhow::{Context, Result};
use colored::Colorize;
use tracing::info;

use fd_core::db::{create_employee_repository, DbPool};
use fd_core::{hash_new_password, Actor, AuditAction, AuditEntry, AuditRecorder, EntityType};

/// Sets the portal password for the employee with `email`.
pub async fn set_portal_password(pool: &DbPool, email: &str, password: &str) -> Result<()> {
    let email = email.trim().to_lowercase();
    let repo = create_employee_repository(pool);
    let employee = repo
        .get_by_email(&email)
        .await?
        .with_context(|| format!("No employee with email '{}'", email))?;

    let hash = hash_new_password(password).context("Password does not meet the policy")?;
    repo.set_portal_password(employee.id, Some(&hash)).await?;
    info!(employee_id = %employee.id, "Portal password set from CLI");

    AuditRecorder::new(pool)
        .record(
            AuditEntry::new(&Actor::system(), AuditAction::PasswordReset, EntityType::Employee)
                .entity(employee.id, employee.full_name()),
        )
        .await;

    println!(
        "{} Portal password set for {}",
        "✓".green(),
        employee.email.cyan()
    );
    if !employee.active {
        println!(
            "  {} Employee is inactive and cannot sign in until reactivated",
            "⚠".yellow()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::scratch_database;
    use fd_core::{verify_password, Employee};

    #[tokio::test]
    async fn test_enables_portal_login() {
        let (_dir, pool) = scratch_database().await;
        let repo = create_employee_repository(&pool);
        let employee = repo
            .create(&Employee::new("E-100", "Grace", "Hopper", "grace@example.com"))
            .await
            .unwrap();
        assert!(!employee.can_use_portal());

        set_portal_password(&pool, " Grace@Example.com ", "Portal2024")
            .await
            .unwrap();

        let stored = repo.get(employee.id).await.unwrap().unwrap();
        assert!(stored.can_use_portal());
        let hash = stored.portal_password_hash.unwrap();
        assert!(verify_password("Portal2024", &hash).unwrap());
    }

    #[tokio::test]
    async fn test_rejects_weak_password_and_unknown_email() {
        let (_dir, pool) = scratch_database().await;
        create_employee_repository(&pool)
            .create(&Employee::new("E-101", "Alan", "Turing", "alan@example.com"))
            .await
            .unwrap();

        assert!(set_portal_password(&pool, "alan@example.com", "weak")
            .await
            .is_err());
        assert!(set_portal_password(&pool, "nobody@example.com", "Portal2024")
            .await
            .is_err());
    }
}
