//! Custody records: asset hand-offs awaiting or past acknowledgment.

use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use fd_core::db::{create_asset_repository, create_custody_repository};
use fd_core::{
    Actor, AssetStatus, AuditAction, AuditEntry, ChangeSet, CustodyFilter, CustodyItem,
    CustodyStatus, EntityType,
};

use crate::auth::{AuthenticatedUser, CanManageCustody};
use crate::error::ApiError;
use crate::extract::{ApiPath, ApiQuery};
use crate::middleware::ClientMeta;
use crate::response::{ok, ApiResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_custody))
        .route("/:id", get(get_custody))
        .route("/:id/return", post(return_custody))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListCustodyQuery {
    pub employee_id: Option<Uuid>,
    pub asset_id: Option<Uuid>,
    pub status: Option<CustodyStatus>,
}

#[utoipa::path(
    get,
    path = "/api/v1/custody",
    params(
        ("employee_id" = Option<Uuid>, Query, description = "Holder"),
        ("status" = Option<String>, Query, description = "pending_acknowledgment, acknowledged or returned")
    ),
    responses((status = 200, description = "Custody items, newest first")),
    tag = "Custody"
)]
pub async fn list_custody(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiQuery(query): ApiQuery<ListCustodyQuery>,
) -> ApiResult<Vec<CustodyItem>> {
    let filter = CustodyFilter {
        employee_id: query.employee_id,
        asset_id: query.asset_id,
        status: query.status,
    };
    ok(create_custody_repository(&state.db).list(&filter).await?)
}

pub async fn get_custody(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<CustodyItem> {
    let item = create_custody_repository(&state.db)
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Custody item", id))?;
    ok(item)
}

/// Records the asset as returned. If the asset is still assigned to the
/// holder it goes back into stock.
#[utoipa::path(
    post,
    path = "/api/v1/custody/{id}/return",
    params(("id" = Uuid, Path, description = "Custody item ID")),
    responses(
        (status = 200, description = "Custody closed"),
        (status = 422, description = "Already returned", body = crate::error::ErrorResponse)
    ),
    tag = "Custody"
)]
pub async fn return_custody(
    State(state): State<AppState>,
    CanManageCustody(user): CanManageCustody,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<CustodyItem> {
    let repo = create_custody_repository(&state.db);
    let old = repo
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Custody item", id))?;

    let now = Utc::now();
    let mut item = old.clone();
    item.mark_returned(now)
        .map_err(ApiError::UnprocessableEntity)?;
    let item = repo.save(&item).await?;

    let assets = create_asset_repository(&state.db);
    if let Some(mut asset) = assets.get(item.asset_id).await? {
        if asset.assigned_employee_id == Some(item.employee_id) {
            asset.assigned_employee_id = None;
            asset.status = AssetStatus::InStock;
            asset.updated_at = now;
            assets.save(&asset).await?;
            info!(asset_id = %asset.id, "Asset back in stock");
        }
    }

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Return, EntityType::CustodyItem)
                .entity(item.id, item.asset_id.to_string())
                .with_changes(ChangeSet::between(&old, &item))
                .with_meta(&meta),
        )
        .await;

    ok(item)
}
