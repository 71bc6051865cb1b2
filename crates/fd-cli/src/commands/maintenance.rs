//! One-shot maintenance sweep.

use anyhow::{Context, Result};
use chrono::Utc;
use colored::Colorize;
use tracing::info;

use fd_core::db::DbPool;
use fd_core::{
    Actor, AuditAction, AuditEntry, AuditRecorder, ChangeSet, EntityType, MaintenanceReport,
    MaintenanceSweep, SlaPolicy,
};

use crate::OutputFormat;

pub async fn run_maintenance(
    pool: &DbPool,
    policy: SlaPolicy,
    format: OutputFormat,
) -> Result<MaintenanceReport> {
    let today = Utc::now().date_naive();
    let report = MaintenanceSweep::new(pool, policy)
        .run(today)
        .await
        .context("Maintenance sweep failed")?;
    info!(
        examined = report.examined,
        created = report.tickets_created,
        "Maintenance sweep run from CLI"
    );

    AuditRecorder::new(pool)
        .record(
            AuditEntry::new(&Actor::system(), AuditAction::RunMaintenance, EntityType::System)
                .entity("maintenance", today.to_string())
                .with_changes(ChangeSet::detail(serde_json::to_value(&report)?)),
        )
        .await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!("{}", "Maintenance Sweep".bold());
            println!("─────────────────");
            println!("  Due assets examined: {}", report.examined);
            println!("  Tickets created:     {}", report.tickets_created.to_string().green());
            println!("  Already claimed:     {}", report.skipped);
            if report.errors > 0 {
                println!("  Errors:              {}", report.errors.to_string().red());
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::scratch_database;
    use chrono::Duration;
    use fd_core::db::create_asset_repository;
    use fd_core::{Asset, AssetType};

    #[tokio::test]
    async fn test_second_run_creates_nothing() {
        let (_dir, pool) = scratch_database().await;
        let mut asset = Asset::new("SRV-001", "Build server", AssetType::Server);
        asset.maintenance_interval_days = Some(90);
        asset.next_maintenance_date = Some(Utc::now().date_naive() - Duration::days(1));
        create_asset_repository(&pool).create(&asset).await.unwrap();

        let first = run_maintenance(&pool, SlaPolicy::default(), OutputFormat::Text)
            .await
            .unwrap();
        assert_eq!(first.examined, 1);
        assert_eq!(first.tickets_created, 1);

        let second = run_maintenance(&pool, SlaPolicy::default(), OutputFormat::Json)
            .await
            .unwrap();
        assert_eq!(second.tickets_created, 0);
    }
}
