//! Service catalogue: categories and the requestable items inside them.

use axum::{extract::State, routing::get, Router};
use chrono::Utc;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use fd_core::db::create_catalog_repository;
use fd_core::{
    Actor, AuditAction, AuditEntry, ChangeSet, EntityType, ServiceCategory, ServiceItem,
    TicketPriority,
};

use crate::auth::{AuthenticatedUser, CanManageCatalog};
use crate::error::ApiError;
use crate::extract::{clean, double_option, patch, patch_text, ApiJson, ApiPath, ApiQuery};
use crate::middleware::ClientMeta;
use crate::response::{created, ok, ApiResult, Created, Done};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/categories", get(list_categories).post(create_category))
        .route(
            "/categories/:id",
            get(get_category)
                .put(update_category)
                .delete(delete_category),
        )
        .route("/items", get(list_items).post(create_item))
        .route(
            "/items/:id",
            get(get_item).put(update_item).delete(delete_item),
        )
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CategoryRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListItemsQuery {
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateItemRequest {
    pub category_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub description: Option<String>,
    #[schema(value_type = Option<String>)]
    pub default_priority: Option<TicketPriority>,
    /// Overrides the priority-based resolution window.
    #[validate(range(min = 1, max = 8760))]
    pub sla_hours: Option<i32>,
    pub active: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateItemRequest {
    pub category_id: Option<Uuid>,
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    pub description: Option<String>,
    #[schema(value_type = Option<String>)]
    pub default_priority: Option<TicketPriority>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<i32>)]
    pub sla_hours: Option<Option<i32>>,
    pub active: Option<bool>,
}

fn check_sla_hours(hours: Option<i32>) -> Result<(), ApiError> {
    match hours {
        Some(h) if !(1..=8760).contains(&h) => Err(ApiError::validation_field(
            "sla_hours",
            "range",
            "SLA hours must be between 1 and 8760",
        )),
        _ => Ok(()),
    }
}

async fn load_category(state: &AppState, id: Uuid) -> Result<ServiceCategory, ApiError> {
    create_catalog_repository(&state.db)
        .get_category(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Service category", id))
}

async fn load_item(state: &AppState, id: Uuid) -> Result<ServiceItem, ApiError> {
    create_catalog_repository(&state.db)
        .get_item(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Service item", id))
}

pub async fn list_categories(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> ApiResult<Vec<ServiceCategory>> {
    ok(create_catalog_repository(&state.db)
        .list_categories()
        .await?)
}

pub async fn get_category(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<ServiceCategory> {
    ok(load_category(&state, id).await?)
}

#[utoipa::path(
    post,
    path = "/api/v1/catalog/categories",
    request_body = CategoryRequest,
    responses((status = 201, description = "Category created")),
    tag = "Catalog"
)]
pub async fn create_category(
    State(state): State<AppState>,
    CanManageCatalog(user): CanManageCatalog,
    ClientMeta(meta): ClientMeta,
    ApiJson(request): ApiJson<CategoryRequest>,
) -> Created<ServiceCategory> {
    request.validate()?;
    let mut category = ServiceCategory::new(request.name.trim());
    category.description = clean(request.description);
    let category = create_catalog_repository(&state.db)
        .create_category(&category)
        .await?;

    state
        .audit(
            AuditEntry::new(
                &Actor::user(&user),
                AuditAction::Create,
                EntityType::ServiceCategory,
            )
            .entity(category.id, &category.name)
            .with_changes(ChangeSet::created(&category))
            .with_meta(&meta),
        )
        .await;

    created(category)
}

pub async fn update_category(
    State(state): State<AppState>,
    CanManageCatalog(user): CanManageCatalog,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<CategoryRequest>,
) -> ApiResult<ServiceCategory> {
    request.validate()?;
    let old = load_category(&state, id).await?;
    let mut category = old.clone();
    category.name = request.name.trim().to_string();
    patch_text(&mut category.description, request.description);
    category.updated_at = Utc::now();
    let category = create_catalog_repository(&state.db)
        .save_category(&category)
        .await?;

    state
        .audit(
            AuditEntry::new(
                &Actor::user(&user),
                AuditAction::Update,
                EntityType::ServiceCategory,
            )
            .entity(category.id, &category.name)
            .with_changes(ChangeSet::between(&old, &category))
            .with_meta(&meta),
        )
        .await;

    ok(category)
}

/// Deletes the category together with its items.
pub async fn delete_category(
    State(state): State<AppState>,
    CanManageCatalog(user): CanManageCatalog,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Done> {
    let category = load_category(&state, id).await?;
    create_catalog_repository(&state.db)
        .delete_category(id)
        .await?;

    state
        .audit(
            AuditEntry::new(
                &Actor::user(&user),
                AuditAction::Delete,
                EntityType::ServiceCategory,
            )
            .entity(category.id, &category.name)
            .with_changes(ChangeSet::deleted(&category))
            .with_meta(&meta),
        )
        .await;

    ok(Done { id })
}

pub async fn list_items(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiQuery(query): ApiQuery<ListItemsQuery>,
) -> ApiResult<Vec<ServiceItem>> {
    ok(create_catalog_repository(&state.db)
        .list_items(query.category_id, query.active_only)
        .await?)
}

pub async fn get_item(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<ServiceItem> {
    ok(load_item(&state, id).await?)
}

#[utoipa::path(
    post,
    path = "/api/v1/catalog/items",
    request_body = CreateItemRequest,
    responses(
        (status = 201, description = "Item created"),
        (status = 404, description = "Category not found", body = crate::error::ErrorResponse)
    ),
    tag = "Catalog"
)]
pub async fn create_item(
    State(state): State<AppState>,
    CanManageCatalog(user): CanManageCatalog,
    ClientMeta(meta): ClientMeta,
    ApiJson(request): ApiJson<CreateItemRequest>,
) -> Created<ServiceItem> {
    request.validate()?;
    load_category(&state, request.category_id).await?;

    let mut item = ServiceItem::new(request.category_id, request.name.trim());
    item.description = clean(request.description);
    if let Some(priority) = request.default_priority {
        item.default_priority = priority;
    }
    item.sla_hours = request.sla_hours;
    item.active = request.active.unwrap_or(true);
    let item = create_catalog_repository(&state.db)
        .create_item(&item)
        .await?;

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Create, EntityType::ServiceItem)
                .entity(item.id, &item.name)
                .with_changes(ChangeSet::created(&item))
                .with_meta(&meta),
        )
        .await;

    created(item)
}

pub async fn update_item(
    State(state): State<AppState>,
    CanManageCatalog(user): CanManageCatalog,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<UpdateItemRequest>,
) -> ApiResult<ServiceItem> {
    request.validate()?;
    let old = load_item(&state, id).await?;
    let mut item = old.clone();

    if let Some(category_id) = request.category_id {
        load_category(&state, category_id).await?;
        item.category_id = category_id;
    }
    if let Some(name) = clean(request.name) {
        item.name = name;
    }
    patch_text(&mut item.description, request.description);
    if let Some(priority) = request.default_priority {
        item.default_priority = priority;
    }
    patch(&mut item.sla_hours, request.sla_hours);
    check_sla_hours(item.sla_hours)?;
    if let Some(active) = request.active {
        item.active = active;
    }
    item.updated_at = Utc::now();
    let item = create_catalog_repository(&state.db).save_item(&item).await?;

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Update, EntityType::ServiceItem)
                .entity(item.id, &item.name)
                .with_changes(ChangeSet::between(&old, &item))
                .with_meta(&meta),
        )
        .await;

    ok(item)
}

pub async fn delete_item(
    State(state): State<AppState>,
    CanManageCatalog(user): CanManageCatalog,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Done> {
    let item = load_item(&state, id).await?;
    create_catalog_repository(&state.db).delete_item(id).await?;

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Delete, EntityType::ServiceItem)
                .entity(item.id, &item.name)
                .with_changes(ChangeSet::deleted(&item))
                .with_meta(&meta),
        )
        .await;

    ok(Done { id })
}
