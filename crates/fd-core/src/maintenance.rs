//! Scheduled-maintenance sweep.
//!
//! Finds in-service assets whose maintenance date has come and opens one
//! maintenance ticket for each. The sweep is run on demand (API or CLI).
//! Each asset's schedule is claimed with a compare-and-set in the same
//! transaction that inserts its ticket, so overlapping or repeated sweeps
//! open at most one ticket per due date and a failed insert leaves the
//! schedule where it was.

use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::{create_asset_repository, AssetRepository, DbError, DbPool};
use crate::models::{Asset, Ticket, TicketPriority, TicketSource};
use crate::sla::SlaPolicy;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// Due assets looked at.
    pub examined: u32,
    pub tickets_created: u32,
    /// Assets whose schedule another sweep claimed first.
    pub skipped: u32,
    pub errors: u32,
}

pub struct MaintenanceSweep {
    assets: Box<dyn AssetRepository>,
    policy: SlaPolicy,
}

impl MaintenanceSweep {
    pub fn new(pool: &DbPool, policy: SlaPolicy) -> Self {
        Self {
            assets: create_asset_repository(pool),
            policy,
        }
    }

    /// Sweeps every asset due on or before `today`. Failures on one asset
    /// are logged and counted; only failing to list due assets is an error.
    pub async fn run(&self, today: NaiveDate) -> Result<MaintenanceReport, DbError> {
        let due = self.assets.list_maintenance_due(today).await?;
        let mut report = MaintenanceReport::default();

        for asset in &due {
            report.examined += 1;
            match self.process(asset).await {
                Ok(true) => report.tickets_created += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    report.errors += 1;
                    warn!(asset_id = %asset.id, asset_tag = %asset.asset_tag, error = %e, "Maintenance sweep failed for asset");
                }
            }
        }

        info!(
            examined = report.examined,
            tickets_created = report.tickets_created,
            skipped = report.skipped,
            errors = report.errors,
            "Maintenance sweep finished"
        );
        Ok(report)
    }

    async fn process(&self, asset: &Asset) -> Result<bool, DbError> {
        let Some(observed) = asset.next_maintenance_date else {
            return Ok(false);
        };
        // Assets without an interval get their date cleared by the claim.
        let next = asset
            .maintenance_interval_days
            .filter(|days| *days > 0)
            .map(|days| observed + Duration::days(i64::from(days)));

        let mut ticket = Ticket::new(
            format!("Scheduled maintenance: {} ({})", asset.name, asset.asset_tag),
            TicketPriority::Medium,
            TicketSource::Maintenance,
        );
        ticket.description = Some(format!(
            "Maintenance for {} was due on {}.",
            asset.asset_tag, observed
        ));
        ticket.asset_id = Some(asset.id);
        ticket.requester_id = asset.assigned_employee_id;
        ticket.created_at = Utc::now();
        ticket.updated_at = ticket.created_at;
        ticket.apply_sla(&self.policy, None);

        let Some(created) = self
            .assets
            .claim_maintenance(asset.id, observed, next, &ticket)
            .await?
        else {
            debug!(asset_id = %asset.id, "Maintenance already claimed");
            return Ok(false);
        };
        metrics::counter!("fleetdesk_maintenance_tickets_created_total").increment(1);
        info!(
            asset_id = %asset.id,
            ticket = %created.reference(),
            next_maintenance = ?next,
            "Created maintenance ticket"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_asset_repository, create_ticket_repository, test_pool, Pagination};
    use crate::models::{AssetStatus, AssetType, TicketFilter};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_two_sweeps_create_one_ticket_per_due_asset() {
        let pool = test_pool().await;
        let assets = create_asset_repository(&pool);

        let mut recurring = Asset::new("SRV-10", "file server", AssetType::Server);
        recurring.next_maintenance_date = Some(date(2024, 6, 1));
        recurring.maintenance_interval_days = Some(90);
        assets.create(&recurring).await.unwrap();

        let mut once = Asset::new("PR-1", "printer", AssetType::Printer);
        once.next_maintenance_date = Some(date(2024, 5, 20));
        assets.create(&once).await.unwrap();

        let mut retired = Asset::new("LT-old", "old laptop", AssetType::Laptop);
        retired.status = AssetStatus::Retired;
        retired.next_maintenance_date = Some(date(2024, 1, 1));
        assets.create(&retired).await.unwrap();

        let mut later = Asset::new("LT-new", "new laptop", AssetType::Laptop);
        later.next_maintenance_date = Some(date(2024, 12, 1));
        assets.create(&later).await.unwrap();

        let sweep = MaintenanceSweep::new(&pool, SlaPolicy::default());
        let today = date(2024, 6, 2);
        let first = sweep.run(today).await.unwrap();
        let second = sweep.run(today).await.unwrap();

        assert_eq!(first.examined, 2);
        assert_eq!(first.tickets_created, 2);
        assert_eq!(first.errors, 0);
        assert_eq!(second.tickets_created, 0);

        let tickets = create_ticket_repository(&pool)
            .list(
                &TicketFilter {
                    source: Some(TicketSource::Maintenance),
                    ..Default::default()
                },
                &Pagination::default(),
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(tickets.total, 2);
        assert!(tickets.items.iter().all(|t| t.priority == TicketPriority::Medium));
        assert!(tickets.items.iter().all(|t| t.sla_breach_at.is_some()));

        let recurring = assets.get(recurring.id).await.unwrap().unwrap();
        assert_eq!(recurring.next_maintenance_date, Some(date(2024, 8, 30)));
        let once = assets.get(once.id).await.unwrap().unwrap();
        assert_eq!(once.next_maintenance_date, None);
    }

    #[tokio::test]
    async fn test_concurrent_sweeps_do_not_duplicate() {
        let pool = test_pool().await;
        let assets = create_asset_repository(&pool);
        let mut asset = Asset::new("NET-1", "core switch", AssetType::NetworkDevice);
        asset.next_maintenance_date = Some(date(2024, 3, 1));
        asset.maintenance_interval_days = Some(30);
        assets.create(&asset).await.unwrap();

        let a = MaintenanceSweep::new(&pool, SlaPolicy::default());
        let b = MaintenanceSweep::new(&pool, SlaPolicy::default());
        let today = date(2024, 3, 1);
        let (ra, rb) = tokio::join!(a.run(today), b.run(today));
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        assert_eq!(ra.tickets_created + rb.tickets_created, 1);
    }

    #[tokio::test]
    async fn test_failed_ticket_insert_keeps_schedule() {
        let pool = test_pool().await;
        let assets = create_asset_repository(&pool);
        let mut asset = Asset::new("SRV-20", "backup server", AssetType::Server);
        asset.next_maintenance_date = Some(date(2024, 6, 1));
        asset.maintenance_interval_days = Some(90);
        assets.create(&asset).await.unwrap();

        let DbPool::Sqlite(sqlite) = &pool else {
            unreachable!("test pool is SQLite");
        };
        sqlx::query(
            "CREATE TRIGGER reject_tickets BEFORE INSERT ON tickets BEGIN SELECT RAISE(ABORT, 'tickets unavailable'); END",
        )
        .execute(sqlite)
        .await
        .unwrap();

        let sweep = MaintenanceSweep::new(&pool, SlaPolicy::default());
        let report = sweep.run(date(2024, 6, 2)).await.unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.tickets_created, 0);
        assert_eq!(report.errors, 1);

        let stored = assets.get(asset.id).await.unwrap().unwrap();
        assert_eq!(stored.next_maintenance_date, Some(date(2024, 6, 1)));

        sqlx::query("DROP TRIGGER reject_tickets")
            .execute(sqlite)
            .await
            .unwrap();
        let retry = sweep.run(date(2024, 6, 2)).await.unwrap();
        assert_eq!(retry.tickets_created, 1);
        let stored = assets.get(asset.id).await.unwrap().unwrap();
        assert_eq!(stored.next_maintenance_date, Some(date(2024, 8, 30)));
    }
}
