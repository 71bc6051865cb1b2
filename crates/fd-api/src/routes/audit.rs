//! Read access to the audit trail.

use axum::{extract::State, routing::get, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fd_core::db::{create_audit_repository, PaginatedResult, Pagination};
use fd_core::{compare_versions, AuditAction, AuditEntry, AuditFilter, EntityType, FieldChange};

use crate::auth::CanViewAudit;
use crate::error::ApiError;
use crate::extract::{clean, ApiPath, ApiQuery};
use crate::response::{ok, ApiResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_audit))
        .route("/compare", get(compare_entries))
        .route("/:id", get(get_audit_entry))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListAuditQuery {
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<String>,
    pub actor_id: Option<Uuid>,
    pub action: Option<AuditAction>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl From<ListAuditQuery> for AuditFilter {
    fn from(query: ListAuditQuery) -> Self {
        AuditFilter {
            entity_type: query.entity_type,
            entity_id: clean(query.entity_id),
            actor_id: query.actor_id,
            action: query.action,
            since: query.since,
            until: query.until,
        }
    }
}

/// An entry with its changes flattened per field.
#[derive(Debug, Serialize)]
pub struct AuditEntryDetail {
    #[serde(flatten)]
    pub entry: AuditEntry,
    pub field_changes: Vec<FieldChange>,
}

#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    pub left: Uuid,
    pub right: Uuid,
}

#[derive(Debug, Serialize)]
pub struct Comparison {
    pub left: AuditEntry,
    pub right: AuditEntry,
    pub differences: Vec<FieldChange>,
}

async fn load_entry(state: &AppState, id: Uuid) -> Result<AuditEntry, ApiError> {
    create_audit_repository(&state.db)
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Audit entry", id))
}

#[utoipa::path(
    get,
    path = "/api/v1/audit",
    params(
        ("entity_type" = Option<String>, Query, description = "e.g. asset, ticket, user"),
        ("entity_id" = Option<String>, Query, description = "Entity identifier"),
        ("actor_id" = Option<Uuid>, Query, description = "Acting user or employee"),
        ("action" = Option<String>, Query, description = "e.g. create, login_failed"),
        ("since" = Option<String>, Query, description = "RFC 3339 lower bound"),
        ("until" = Option<String>, Query, description = "RFC 3339 upper bound"),
        ("page" = Option<u32>, Query, description = "Page, from 1")
    ),
    responses(
        (status = 200, description = "Audit entries, newest first"),
        (status = 403, description = "Caller lacks view_audit", body = crate::error::ErrorResponse)
    ),
    tag = "Audit"
)]
pub async fn list_audit(
    State(state): State<AppState>,
    CanViewAudit(_user): CanViewAudit,
    ApiQuery(query): ApiQuery<ListAuditQuery>,
) -> ApiResult<PaginatedResult<AuditEntry>> {
    let pagination = Pagination::from_query(query.page, query.per_page);
    let filter = AuditFilter::from(query);
    ok(create_audit_repository(&state.db)
        .list(&filter, &pagination)
        .await?)
}

pub async fn get_audit_entry(
    State(state): State<AppState>,
    CanViewAudit(_user): CanViewAudit,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<AuditEntryDetail> {
    let entry = load_entry(&state, id).await?;
    let field_changes = entry.field_changes();
    ok(AuditEntryDetail {
        entry,
        field_changes,
    })
}

/// Diffs the state captured by two entries, e.g. two updates of the same
/// asset. Entries without a snapshot compare as `null`.
#[utoipa::path(
    get,
    path = "/api/v1/audit/compare",
    params(
        ("left" = Uuid, Query, description = "Older entry"),
        ("right" = Uuid, Query, description = "Newer entry")
    ),
    responses(
        (status = 200, description = "Differing fields, sorted by name"),
        (status = 404, description = "Entry not found", body = crate::error::ErrorResponse)
    ),
    tag = "Audit"
)]
pub async fn compare_entries(
    State(state): State<AppState>,
    CanViewAudit(_user): CanViewAudit,
    ApiQuery(query): ApiQuery<CompareQuery>,
) -> ApiResult<Comparison> {
    let left = load_entry(&state, query.left).await?;
    let right = load_entry(&state, query.right).await?;
    let null = serde_json::Value::Null;
    let differences = compare_versions(
        left.snapshot().unwrap_or(&null),
        right.snapshot().unwrap_or(&null),
    );
    ok(Comparison {
        left,
        right,
        differences,
    })
}
