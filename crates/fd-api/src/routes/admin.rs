//! JSON backup and additive restore of reference data.

use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use tracing::{info, warn};
use uuid::Uuid;

use fd_core::db::{
    create_asset_repository, create_booking_repository, create_catalog_repository,
    create_employee_repository, create_knowledge_repository, create_organization_repository,
    create_subnet_repository, DbError, Pagination, MAX_PAGE_SIZE,
};
use fd_core::{
    Actor, Asset, AssetFilter, AssetStatus, AuditAction, AuditEntry, ChangeSet, Department, Employee,
    EmployeeFilter, EntityType, KnowledgeCategory, Location, Room, ServiceCategory, Subnet,
};

use crate::auth::CanManageBackups;
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::middleware::ClientMeta;
use crate::response::{ok, ApiResult};
use crate::state::AppState;

pub const BACKUP_FORMAT_VERSION: u32 = 1;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/backup", get(backup))
        .route("/restore", post(restore))
}

/// Reference data snapshot. Tickets, bookings, visits and the audit log are
/// not part of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backup {
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub departments: Vec<Department>,
    #[serde(default)]
    pub locations: Vec<Location>,
    #[serde(default)]
    pub employees: Vec<Employee>,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub subnets: Vec<Subnet>,
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub knowledge_categories: Vec<KnowledgeCategory>,
    #[serde(default)]
    pub service_categories: Vec<ServiceCategory>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct KindCount {
    pub restored: u32,
    pub skipped: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreReport {
    pub restored: u32,
    pub skipped: u32,
    pub by_kind: BTreeMap<&'static str, KindCount>,
}

impl RestoreReport {
    fn record(&mut self, kind: &'static str, restored: bool) {
        let count = self.by_kind.entry(kind).or_default();
        if restored {
            count.restored += 1;
            self.restored += 1;
        } else {
            count.skipped += 1;
            self.skipped += 1;
        }
    }
}

/// Inserts a record whose id is new. A unique or foreign-key collision with
/// existing data counts as skipped instead of failing the restore.
async fn insert_new<T>(
    kind: &'static str,
    id: Uuid,
    insert: impl Future<Output = Result<T, DbError>>,
) -> Result<bool, ApiError> {
    match insert.await {
        Ok(_) => Ok(true),
        Err(DbError::Constraint(reason)) => {
            warn!(kind, %id, %reason, "Backup record collides with existing data, skipped");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

async fn all_employees(state: &AppState) -> Result<Vec<Employee>, ApiError> {
    let repo = create_employee_repository(&state.db);
    let filter = EmployeeFilter::default();
    let mut employees = Vec::new();
    let mut page = 1;
    loop {
        let batch = repo
            .list(&filter, &Pagination::new(page, MAX_PAGE_SIZE))
            .await?;
        let more = batch.has_next_page();
        employees.extend(batch.items);
        if !more {
            return Ok(employees);
        }
        page += 1;
    }
}

async fn all_assets(state: &AppState) -> Result<Vec<Asset>, ApiError> {
    let repo = create_asset_repository(&state.db);
    let filter = AssetFilter::default();
    let mut assets = Vec::new();
    let mut page = 1;
    loop {
        let batch = repo
            .list(&filter, &Pagination::new(page, MAX_PAGE_SIZE))
            .await?;
        let more = batch.has_next_page();
        assets.extend(batch.items);
        if !more {
            return Ok(assets);
        }
        page += 1;
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/backup",
    responses(
        (status = 200, description = "Reference data snapshot"),
        (status = 403, description = "Caller lacks manage_backups", body = crate::error::ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn backup(
    State(state): State<AppState>,
    CanManageBackups(user): CanManageBackups,
) -> ApiResult<Backup> {
    let org = create_organization_repository(&state.db);
    let snapshot = Backup {
        format_version: BACKUP_FORMAT_VERSION,
        created_at: Utc::now(),
        departments: org.list_departments().await?,
        locations: org.list_locations().await?,
        employees: all_employees(&state).await?,
        assets: all_assets(&state).await?,
        subnets: create_subnet_repository(&state.db).list().await?,
        rooms: create_booking_repository(&state.db).list_rooms().await?,
        knowledge_categories: create_knowledge_repository(&state.db)
            .list_categories()
            .await?,
        service_categories: create_catalog_repository(&state.db)
            .list_categories()
            .await?,
    };
    info!(
        user = %user.username,
        employees = snapshot.employees.len(),
        assets = snapshot.assets.len(),
        "Backup exported"
    );
    ok(snapshot)
}

/// Restores a snapshot without touching existing rows: any record whose id
/// already exists, or whose unique keys (email, tag, CIDR, name) collide with
/// an existing row, is skipped. Employee managers are linked in a second
/// pass so the snapshot order does not matter.
#[utoipa::path(
    post,
    path = "/api/v1/admin/restore",
    responses(
        (status = 200, description = "Restored and skipped counts per kind"),
        (status = 422, description = "Unsupported format version", body = crate::error::ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn restore(
    State(state): State<AppState>,
    CanManageBackups(user): CanManageBackups,
    ClientMeta(meta): ClientMeta,
    ApiJson(snapshot): ApiJson<Backup>,
) -> ApiResult<RestoreReport> {
    if snapshot.format_version != BACKUP_FORMAT_VERSION {
        return Err(ApiError::UnprocessableEntity(format!(
            "Unsupported backup format version {}",
            snapshot.format_version
        )));
    }

    let mut report = RestoreReport::default();

    let org = create_organization_repository(&state.db);
    for department in &snapshot.departments {
        let restored = org.get_department(department.id).await?.is_none()
            && insert_new("departments", department.id, org.create_department(department)).await?;
        report.record("departments", restored);
    }
    for location in &snapshot.locations {
        let restored = org.get_location(location.id).await?.is_none()
            && insert_new("locations", location.id, org.create_location(location)).await?;
        report.record("locations", restored);
    }

    let employees = create_employee_repository(&state.db);
    let mut restored_employees = Vec::new();
    for employee in &snapshot.employees {
        let mut first_pass = employee.clone();
        first_pass.manager_id = None;
        let restored = employees.get(employee.id).await?.is_none()
            && insert_new("employees", employee.id, employees.create(&first_pass)).await?;
        if restored {
            restored_employees.push(employee);
        }
        report.record("employees", restored);
    }
    for employee in restored_employees {
        let Some(manager_id) = employee.manager_id else {
            continue;
        };
        if employees.get(manager_id).await?.is_none() {
            warn!(employee_id = %employee.id, %manager_id, "Manager missing from backup, left unset");
            continue;
        }
        employees.save(employee).await?;
    }

    let assets = create_asset_repository(&state.db);
    for asset in &snapshot.assets {
        let mut asset = asset.clone();
        let missing = assets.get(asset.id).await?.is_none();
        if missing {
            if let Some(holder) = asset.assigned_employee_id {
                if employees.get(holder).await?.is_none() {
                    warn!(asset_id = %asset.id, "Assigned employee missing from backup, restored in stock");
                    asset.assigned_employee_id = None;
                    asset.status = AssetStatus::InStock;
                }
            }
        }
        let restored = missing && insert_new("assets", asset.id, assets.create(&asset)).await?;
        report.record("assets", restored);
    }

    let subnets = create_subnet_repository(&state.db);
    for subnet in &snapshot.subnets {
        let restored = subnets.get(subnet.id).await?.is_none()
            && insert_new("subnets", subnet.id, subnets.create(subnet)).await?;
        report.record("subnets", restored);
    }

    let bookings = create_booking_repository(&state.db);
    for room in &snapshot.rooms {
        let restored = bookings.get_room(room.id).await?.is_none()
            && insert_new("rooms", room.id, bookings.create_room(room)).await?;
        report.record("rooms", restored);
    }

    let knowledge = create_knowledge_repository(&state.db);
    for category in &snapshot.knowledge_categories {
        let restored = knowledge.get_category(category.id).await?.is_none()
            && insert_new(
                "knowledge_categories",
                category.id,
                knowledge.create_category(category),
            )
            .await?;
        report.record("knowledge_categories", restored);
    }

    let catalog = create_catalog_repository(&state.db);
    for category in &snapshot.service_categories {
        let restored = catalog.get_category(category.id).await?.is_none()
            && insert_new(
                "service_categories",
                category.id,
                catalog.create_category(category),
            )
            .await?;
        report.record("service_categories", restored);
    }

    info!(
        restored = report.restored,
        skipped = report.skipped,
        user = %user.username,
        "Backup restored"
    );

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Restore, EntityType::System)
                .entity("backup", snapshot.created_at.to_rfc3339())
                .with_changes(ChangeSet::detail(serde_json::to_value(&report)?))
                .with_meta(&meta),
        )
        .await;

    ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_report_tallies_per_kind() {
        let mut report = RestoreReport::default();
        report.record("assets", true);
        report.record("assets", false);
        report.record("rooms", true);
        assert_eq!(report.restored, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(
            report.by_kind["assets"],
            KindCount {
                restored: 1,
                skipped: 1
            }
        );
    }

    #[test]
    fn test_backup_sections_default_to_empty() {
        let backup: Backup = serde_json::from_value(serde_json::json!({
            "format_version": 1,
            "created_at": "2026-01-05T10:00:00Z",
            "rooms": []
        }))
        .unwrap();
        assert!(backup.employees.is_empty());
        assert!(backup.service_categories.is_empty());
    }
}
