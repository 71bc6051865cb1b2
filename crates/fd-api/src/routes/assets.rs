//! Asset endpoints: inventory CRUD, assignment to employees and agent commands.

use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use fd_core::db::{
    create_agent_command_repository, create_asset_repository, create_custody_repository,
    create_employee_repository, create_notification_repository, PaginatedResult, Pagination,
};
use fd_core::ipam::parse_ipv4;
use fd_core::{
    Actor, AgentCommand, Asset, AssetFilter, AssetStatus, AssetType, AuditAction, AuditEntry,
    ChangeSet, CustodyItem, EntityType, Notification,
};

use crate::auth::{AuthenticatedUser, CanManageAssets};
use crate::error::ApiError;
use crate::extract::{clean, double_option, patch, patch_text, ApiJson, ApiPath, ApiQuery};
use crate::middleware::ClientMeta;
use crate::response::{created, ok, ApiResult, Created, Done};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_assets).post(create_asset))
        .route(
            "/:id",
            get(get_asset).put(update_asset).delete(delete_asset),
        )
        .route("/:id/assign", post(assign_asset))
        .route("/:id/unassign", post(unassign_asset))
        .route("/:id/commands", get(list_commands).post(queue_command))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListAssetsQuery {
    pub status: Option<AssetStatus>,
    #[serde(rename = "type")]
    pub asset_type: Option<AssetType>,
    pub employee_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    /// Matches tag, name, serial number and hostname.
    pub search: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateAssetRequest {
    /// Generated as `AUTO-XXXXXXXX` when omitted.
    #[validate(length(min = 1, max = 64))]
    pub asset_tag: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[schema(value_type = String, example = "laptop")]
    pub asset_type: AssetType,
    #[schema(value_type = Option<String>)]
    pub status: Option<AssetStatus>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub hostname: Option<String>,
    pub ip_address: Option<String>,
    pub mac_address: Option<String>,
    pub location_id: Option<Uuid>,
    pub purchase_date: Option<NaiveDate>,
    /// Minor currency units.
    #[validate(range(min = 0))]
    pub purchase_cost: Option<i64>,
    pub warranty_expires: Option<NaiveDate>,
    #[validate(range(min = 1, max = 3650))]
    pub maintenance_interval_days: Option<i32>,
    pub next_maintenance_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Absent fields are left unchanged; `null` clears nullable references and
/// blank strings clear text.
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateAssetRequest {
    #[validate(length(min = 1, max = 64))]
    pub asset_tag: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[schema(value_type = Option<String>)]
    pub asset_type: Option<AssetType>,
    #[schema(value_type = Option<String>)]
    pub status: Option<AssetStatus>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub hostname: Option<String>,
    pub ip_address: Option<String>,
    pub mac_address: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<Uuid>)]
    pub location_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<NaiveDate>)]
    pub purchase_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<i64>)]
    pub purchase_cost: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<NaiveDate>)]
    pub warranty_expires: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<i32>)]
    pub maintenance_interval_days: Option<Option<i32>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<NaiveDate>)]
    pub next_maintenance_date: Option<Option<NaiveDate>>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AssignAssetRequest {
    pub employee_id: Uuid,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct QueueCommandRequest {
    #[validate(length(min = 1, max = 4000))]
    pub command: String,
}

fn validated_ip(ip: Option<String>) -> Result<Option<String>, ApiError> {
    match clean(ip) {
        Some(ip) => {
            let parsed = parse_ipv4(&ip).map_err(|e| {
                ApiError::validation_field("ip_address", "invalid_ip", &e.to_string())
            })?;
            Ok(Some(parsed.to_string()))
        }
        None => Ok(None),
    }
}

fn check_maintenance_interval(days: Option<i32>) -> Result<(), ApiError> {
    match days {
        Some(d) if !(1..=3650).contains(&d) => Err(ApiError::validation_field(
            "maintenance_interval_days",
            "range",
            "Interval must be between 1 and 3650 days",
        )),
        _ => Ok(()),
    }
}

pub(crate) async fn load_asset(state: &AppState, id: Uuid) -> Result<Asset, ApiError> {
    create_asset_repository(&state.db)
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Asset", id))
}

#[utoipa::path(
    get,
    path = "/api/v1/assets",
    params(
        ("status" = Option<String>, Query, description = "Asset status"),
        ("type" = Option<String>, Query, description = "Asset type"),
        ("search" = Option<String>, Query, description = "Tag, name, serial or hostname"),
        ("page" = Option<u32>, Query, description = "1-indexed page")
    ),
    responses(
        (status = 200, description = "Paginated assets"),
        (status = 401, description = "Not signed in", body = crate::error::ErrorResponse)
    ),
    tag = "Assets"
)]
pub async fn list_assets(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiQuery(query): ApiQuery<ListAssetsQuery>,
) -> ApiResult<PaginatedResult<Asset>> {
    let filter = AssetFilter {
        status: query.status,
        asset_type: query.asset_type,
        employee_id: query.employee_id,
        location_id: query.location_id,
        search: clean(query.search),
    };
    let pagination = Pagination::from_query(query.page, query.per_page);
    ok(create_asset_repository(&state.db).list(&filter, &pagination).await?)
}

#[utoipa::path(
    get,
    path = "/api/v1/assets/{id}",
    params(("id" = Uuid, Path, description = "Asset ID")),
    responses(
        (status = 200, description = "Asset"),
        (status = 404, description = "Not found", body = crate::error::ErrorResponse)
    ),
    tag = "Assets"
)]
pub async fn get_asset(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Asset> {
    ok(load_asset(&state, id).await?)
}

#[utoipa::path(
    post,
    path = "/api/v1/assets",
    request_body = CreateAssetRequest,
    responses(
        (status = 201, description = "Asset created"),
        (status = 403, description = "Missing manage_assets", body = crate::error::ErrorResponse),
        (status = 409, description = "Asset tag already in use", body = crate::error::ErrorResponse),
        (status = 422, description = "Validation failed", body = crate::error::ErrorResponse)
    ),
    tag = "Assets"
)]
pub async fn create_asset(
    State(state): State<AppState>,
    CanManageAssets(user): CanManageAssets,
    ClientMeta(meta): ClientMeta,
    ApiJson(request): ApiJson<CreateAssetRequest>,
) -> Created<Asset> {
    request.validate()?;
    let repo = create_asset_repository(&state.db);

    let tag = clean(request.asset_tag).unwrap_or_else(Asset::generate_auto_tag);
    if repo.get_by_tag(&tag).await?.is_some() {
        return Err(ApiError::Conflict(format!("Asset tag '{}' already in use", tag)));
    }

    let mut asset = Asset::new(tag, request.name.trim(), request.asset_type);
    if let Some(status) = request.status {
        if status == AssetStatus::Assigned {
            return Err(ApiError::validation_field(
                "status",
                "invalid_status",
                "Use the assign operation to hand an asset to an employee",
            ));
        }
        asset.status = status;
    }
    asset.serial_number = clean(request.serial_number);
    asset.manufacturer = clean(request.manufacturer);
    asset.model = clean(request.model);
    asset.hostname = clean(request.hostname);
    asset.ip_address = validated_ip(request.ip_address)?;
    asset.mac_address = clean(request.mac_address);
    asset.location_id = request.location_id;
    asset.purchase_date = request.purchase_date;
    asset.purchase_cost = request.purchase_cost;
    asset.warranty_expires = request.warranty_expires;
    asset.maintenance_interval_days = request.maintenance_interval_days;
    asset.next_maintenance_date = request.next_maintenance_date;
    asset.notes = clean(request.notes);

    let asset = repo.create(&asset).await?;
    info!(asset_id = %asset.id, asset_tag = %asset.asset_tag, user = %user.username, "Asset created");

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Create, EntityType::Asset)
                .entity(asset.id, &asset.asset_tag)
                .with_changes(ChangeSet::created(&asset))
                .with_meta(&meta),
        )
        .await;

    created(asset)
}

#[utoipa::path(
    put,
    path = "/api/v1/assets/{id}",
    params(("id" = Uuid, Path, description = "Asset ID")),
    request_body = UpdateAssetRequest,
    responses(
        (status = 200, description = "Asset updated"),
        (status = 404, description = "Not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Asset tag already in use", body = crate::error::ErrorResponse)
    ),
    tag = "Assets"
)]
pub async fn update_asset(
    State(state): State<AppState>,
    CanManageAssets(user): CanManageAssets,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<UpdateAssetRequest>,
) -> ApiResult<Asset> {
    request.validate()?;
    let repo = create_asset_repository(&state.db);
    let old = load_asset(&state, id).await?;
    let mut asset = old.clone();

    if let Some(tag) = clean(request.asset_tag) {
        if tag != asset.asset_tag && repo.get_by_tag(&tag).await?.is_some() {
            return Err(ApiError::Conflict(format!("Asset tag '{}' already in use", tag)));
        }
        asset.asset_tag = tag;
    }
    if let Some(name) = clean(request.name) {
        asset.name = name;
    }
    if let Some(asset_type) = request.asset_type {
        asset.asset_type = asset_type;
    }
    if let Some(status) = request.status {
        // Assignment state is owned by assign/unassign.
        if (status == AssetStatus::Assigned) != asset.assigned_employee_id.is_some() {
            return Err(ApiError::validation_field(
                "status",
                "invalid_status",
                "Use assign/unassign to change assignment",
            ));
        }
        asset.status = status;
    }
    patch_text(&mut asset.serial_number, request.serial_number);
    patch_text(&mut asset.manufacturer, request.manufacturer);
    patch_text(&mut asset.model, request.model);
    patch_text(&mut asset.hostname, request.hostname);
    if let Some(ip) = request.ip_address {
        asset.ip_address = validated_ip(Some(ip))?;
    }
    patch_text(&mut asset.mac_address, request.mac_address);
    patch(&mut asset.location_id, request.location_id);
    patch(&mut asset.purchase_date, request.purchase_date);
    patch(&mut asset.purchase_cost, request.purchase_cost);
    patch(&mut asset.warranty_expires, request.warranty_expires);
    patch(
        &mut asset.maintenance_interval_days,
        request.maintenance_interval_days,
    );
    check_maintenance_interval(asset.maintenance_interval_days)?;
    patch(&mut asset.next_maintenance_date, request.next_maintenance_date);
    patch_text(&mut asset.notes, request.notes);
    asset.updated_at = Utc::now();

    let asset = repo.save(&asset).await?;

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Update, EntityType::Asset)
                .entity(asset.id, &asset.asset_tag)
                .with_changes(ChangeSet::between(&old, &asset))
                .with_meta(&meta),
        )
        .await;

    ok(asset)
}

#[utoipa::path(
    delete,
    path = "/api/v1/assets/{id}",
    params(("id" = Uuid, Path, description = "Asset ID")),
    responses(
        (status = 200, description = "Asset deleted"),
        (status = 404, description = "Not found", body = crate::error::ErrorResponse)
    ),
    tag = "Assets"
)]
pub async fn delete_asset(
    State(state): State<AppState>,
    CanManageAssets(user): CanManageAssets,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Done> {
    let asset = load_asset(&state, id).await?;
    if !create_asset_repository(&state.db).delete(id).await? {
        return Err(ApiError::not_found("Asset", id));
    }
    info!(asset_id = %id, user = %user.username, "Asset deleted");

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Delete, EntityType::Asset)
                .entity(asset.id, &asset.asset_tag)
                .with_changes(ChangeSet::deleted(&asset))
                .with_meta(&meta),
        )
        .await;

    ok(Done { id })
}

/// Hands the asset to an employee. Any open custody record is closed and a
/// new one is issued that the employee acknowledges in the portal.
#[utoipa::path(
    post,
    path = "/api/v1/assets/{id}/assign",
    params(("id" = Uuid, Path, description = "Asset ID")),
    request_body = AssignAssetRequest,
    responses(
        (status = 200, description = "Asset assigned, custody item issued"),
        (status = 404, description = "Asset or employee not found", body = crate::error::ErrorResponse),
        (status = 422, description = "Asset out of service or employee inactive", body = crate::error::ErrorResponse)
    ),
    tag = "Assets"
)]
pub async fn assign_asset(
    State(state): State<AppState>,
    CanManageAssets(user): CanManageAssets,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<AssignAssetRequest>,
) -> ApiResult<CustodyItem> {
    request.validate()?;
    let old = load_asset(&state, id).await?;
    if !old.status.in_service() {
        return Err(ApiError::UnprocessableEntity(format!(
            "Asset {} is {} and cannot be assigned",
            old.asset_tag, old.status
        )));
    }

    let employee = create_employee_repository(&state.db)
        .get(request.employee_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Employee", request.employee_id))?;
    if !employee.active {
        return Err(ApiError::UnprocessableEntity(format!(
            "Employee {} is inactive",
            employee.full_name()
        )));
    }

    let now = Utc::now();
    let custody = create_custody_repository(&state.db);
    if let Some(mut open) = custody.open_for_asset(id).await? {
        open.mark_returned(now).map_err(ApiError::UnprocessableEntity)?;
        custody.save(&open).await?;
    }

    let mut asset = old.clone();
    asset.assigned_employee_id = Some(employee.id);
    asset.status = AssetStatus::Assigned;
    asset.updated_at = now;
    let asset = create_asset_repository(&state.db).save(&asset).await?;

    let mut item = CustodyItem::issue(asset.id, employee.id, Some(user.id));
    item.notes = clean(request.notes);
    let item = custody.create(&item).await?;

    let notification = Notification::for_employee(
        employee.id,
        format!("{} ({}) has been assigned to you", asset.name, asset.asset_tag),
    )
    .with_body("Please acknowledge receipt in the portal.")
    .with_link("/portal");
    create_notification_repository(&state.db)
        .create(&notification)
        .await?;

    info!(
        asset_id = %asset.id,
        employee_id = %employee.id,
        custody_id = %item.id,
        "Asset assigned"
    );

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Assign, EntityType::Asset)
                .entity(asset.id, &asset.asset_tag)
                .with_changes(ChangeSet::between(&old, &asset))
                .with_meta(&meta),
        )
        .await;

    ok(item)
}

/// Takes the asset back into stock and closes its open custody record.
#[utoipa::path(
    post,
    path = "/api/v1/assets/{id}/unassign",
    params(("id" = Uuid, Path, description = "Asset ID")),
    responses(
        (status = 200, description = "Asset returned to stock"),
        (status = 422, description = "Asset is not assigned", body = crate::error::ErrorResponse)
    ),
    tag = "Assets"
)]
pub async fn unassign_asset(
    State(state): State<AppState>,
    CanManageAssets(user): CanManageAssets,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Asset> {
    let old = load_asset(&state, id).await?;
    if old.assigned_employee_id.is_none() {
        return Err(ApiError::UnprocessableEntity(format!(
            "Asset {} is not assigned",
            old.asset_tag
        )));
    }

    let now = Utc::now();
    let custody = create_custody_repository(&state.db);
    if let Some(mut open) = custody.open_for_asset(id).await? {
        open.mark_returned(now).map_err(ApiError::UnprocessableEntity)?;
        custody.save(&open).await?;
    }

    let mut asset = old.clone();
    asset.assigned_employee_id = None;
    asset.status = AssetStatus::InStock;
    asset.updated_at = now;
    let asset = create_asset_repository(&state.db).save(&asset).await?;

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Return, EntityType::Asset)
                .entity(asset.id, &asset.asset_tag)
                .with_changes(ChangeSet::between(&old, &asset))
                .with_meta(&meta),
        )
        .await;

    ok(asset)
}

#[utoipa::path(
    get,
    path = "/api/v1/assets/{id}/commands",
    params(("id" = Uuid, Path, description = "Asset ID")),
    responses((status = 200, description = "Commands, newest first")),
    tag = "Assets"
)]
pub async fn list_commands(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Vec<AgentCommand>> {
    load_asset(&state, id).await?;
    ok(create_agent_command_repository(&state.db)
        .list_for_asset(id)
        .await?)
}

/// Queues a command for the asset's agent to pick up on its next poll.
#[utoipa::path(
    post,
    path = "/api/v1/assets/{id}/commands",
    params(("id" = Uuid, Path, description = "Asset ID")),
    request_body = QueueCommandRequest,
    responses((status = 201, description = "Command queued")),
    tag = "Assets"
)]
pub async fn queue_command(
    State(state): State<AppState>,
    CanManageAssets(user): CanManageAssets,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<QueueCommandRequest>,
) -> Created<AgentCommand> {
    request.validate()?;
    let asset = load_asset(&state, id).await?;
    let command = AgentCommand::new(asset.id, request.command.trim(), Some(user.id));
    let command = create_agent_command_repository(&state.db)
        .create(&command)
        .await?;
    info!(asset_id = %asset.id, command_id = %command.id, "Agent command queued");

    state
        .audit(
            AuditEntry::new(
                &Actor::user(&user),
                AuditAction::Create,
                EntityType::AgentCommand,
            )
            .entity(command.id, &asset.asset_tag)
            .with_changes(ChangeSet::created(&command))
            .with_meta(&meta),
        )
        .await;

    created(command)
}
