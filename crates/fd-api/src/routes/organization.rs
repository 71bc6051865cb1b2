//! Departments and locations.

use axum::{extract::State, routing::get, Router};
use chrono::Utc;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use fd_core::db::create_organization_repository;
use fd_core::{Actor, AuditAction, AuditEntry, ChangeSet, Department, EntityType, Location};

use crate::auth::{AuthenticatedUser, CanManageOrganization};
use crate::error::ApiError;
use crate::extract::{clean, patch_text, ApiJson, ApiPath};
use crate::middleware::ClientMeta;
use crate::response::{created, ok, ApiResult, Created, Done};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/departments",
            get(list_departments).post(create_department),
        )
        .route(
            "/departments/:id",
            get(get_department)
                .put(update_department)
                .delete(delete_department),
        )
        .route("/locations", get(list_locations).post(create_location))
        .route(
            "/locations/:id",
            get(get_location)
                .put(update_location)
                .delete(delete_location),
        )
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct DepartmentRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LocationRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub address: Option<String>,
    pub floor: Option<String>,
}

pub async fn list_departments(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> ApiResult<Vec<Department>> {
    ok(create_organization_repository(&state.db)
        .list_departments()
        .await?)
}

pub async fn get_department(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Department> {
    let department = create_organization_repository(&state.db)
        .get_department(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Department", id))?;
    ok(department)
}

#[utoipa::path(
    post,
    path = "/api/v1/departments",
    request_body = DepartmentRequest,
    responses(
        (status = 201, description = "Department created"),
        (status = 409, description = "Name already in use", body = crate::error::ErrorResponse)
    ),
    tag = "Organization"
)]
pub async fn create_department(
    State(state): State<AppState>,
    CanManageOrganization(user): CanManageOrganization,
    ClientMeta(meta): ClientMeta,
    ApiJson(request): ApiJson<DepartmentRequest>,
) -> Created<Department> {
    request.validate()?;
    let mut department = Department::new(request.name.trim());
    department.description = clean(request.description);
    let department = create_organization_repository(&state.db)
        .create_department(&department)
        .await?;

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Create, EntityType::Department)
                .entity(department.id, &department.name)
                .with_changes(ChangeSet::created(&department))
                .with_meta(&meta),
        )
        .await;

    created(department)
}

pub async fn update_department(
    State(state): State<AppState>,
    CanManageOrganization(user): CanManageOrganization,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<DepartmentRequest>,
) -> ApiResult<Department> {
    request.validate()?;
    let repo = create_organization_repository(&state.db);
    let old = repo
        .get_department(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Department", id))?;

    let mut department = old.clone();
    department.name = request.name.trim().to_string();
    patch_text(&mut department.description, request.description);
    department.updated_at = Utc::now();
    let department = repo.save_department(&department).await?;

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Update, EntityType::Department)
                .entity(department.id, &department.name)
                .with_changes(ChangeSet::between(&old, &department))
                .with_meta(&meta),
        )
        .await;

    ok(department)
}

pub async fn delete_department(
    State(state): State<AppState>,
    CanManageOrganization(user): CanManageOrganization,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Done> {
    let repo = create_organization_repository(&state.db);
    let department = repo
        .get_department(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Department", id))?;
    repo.delete_department(id).await?;

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Delete, EntityType::Department)
                .entity(department.id, &department.name)
                .with_changes(ChangeSet::deleted(&department))
                .with_meta(&meta),
        )
        .await;

    ok(Done { id })
}

pub async fn list_locations(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> ApiResult<Vec<Location>> {
    ok(create_organization_repository(&state.db)
        .list_locations()
        .await?)
}

pub async fn get_location(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Location> {
    let location = create_organization_repository(&state.db)
        .get_location(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Location", id))?;
    ok(location)
}

#[utoipa::path(
    post,
    path = "/api/v1/locations",
    request_body = LocationRequest,
    responses((status = 201, description = "Location created")),
    tag = "Organization"
)]
pub async fn create_location(
    State(state): State<AppState>,
    CanManageOrganization(user): CanManageOrganization,
    ClientMeta(meta): ClientMeta,
    ApiJson(request): ApiJson<LocationRequest>,
) -> Created<Location> {
    request.validate()?;
    let mut location = Location::new(request.name.trim());
    location.address = clean(request.address);
    location.floor = clean(request.floor);
    let location = create_organization_repository(&state.db)
        .create_location(&location)
        .await?;

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Create, EntityType::Location)
                .entity(location.id, &location.name)
                .with_changes(ChangeSet::created(&location))
                .with_meta(&meta),
        )
        .await;

    created(location)
}

pub async fn update_location(
    State(state): State<AppState>,
    CanManageOrganization(user): CanManageOrganization,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<LocationRequest>,
) -> ApiResult<Location> {
    request.validate()?;
    let repo = create_organization_repository(&state.db);
    let old = repo
        .get_location(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Location", id))?;

    let mut location = old.clone();
    location.name = request.name.trim().to_string();
    patch_text(&mut location.address, request.address);
    patch_text(&mut location.floor, request.floor);
    location.updated_at = Utc::now();
    let location = repo.save_location(&location).await?;

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Update, EntityType::Location)
                .entity(location.id, &location.name)
                .with_changes(ChangeSet::between(&old, &location))
                .with_meta(&meta),
        )
        .await;

    ok(location)
}

pub async fn delete_location(
    State(state): State<AppState>,
    CanManageOrganization(user): CanManageOrganization,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Done> {
    let repo = create_organization_repository(&state.db);
    let location = repo
        .get_location(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Location", id))?;
    repo.delete_location(id).await?;

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Delete, EntityType::Location)
                .entity(location.id, &location.name)
                .with_changes(ChangeSet::deleted(&location))
                .with_meta(&meta),
        )
        .await;

    ok(Done { id })
}
