//! Visitor registration and front-desk check-in.

use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use fd_core::db::{
    create_employee_repository, create_notification_repository, create_visit_repository,
    PaginatedResult, Pagination,
};
use fd_core::{
    Actor, AuditAction, AuditEntry, ChangeSet, EntityType, Notification, RequestMeta, User,
    Visit, VisitFilter, VisitStatus,
};

use crate::auth::{AuthenticatedUser, CanManageVisitors};
use crate::error::ApiError;
use crate::extract::{clean, ApiJson, ApiPath, ApiQuery};
use crate::middleware::ClientMeta;
use crate::response::{created, ok, ApiResult, Created};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_visits).post(register_visit))
        .route("/:id", get(get_visit))
        .route("/:id/check-in", post(check_in))
        .route("/:id/check-out", post(check_out))
        .route("/:id/cancel", post(cancel_visit))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListVisitsQuery {
    pub status: Option<VisitStatus>,
    /// Expected on this UTC day, `YYYY-MM-DD`.
    pub date: Option<NaiveDate>,
    pub host_employee_id: Option<Uuid>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterVisitRequest {
    #[validate(length(min = 1, max = 200))]
    pub visitor_name: String,
    pub company: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub phone: Option<String>,
    pub host_employee_id: Uuid,
    pub purpose: Option<String>,
    pub expected_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct CheckInRequest {
    #[validate(length(min = 1, max = 32))]
    pub badge_number: Option<String>,
}

async fn load_visit(state: &AppState, id: Uuid) -> Result<Visit, ApiError> {
    create_visit_repository(&state.db)
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Visit", id))
}

async fn save_transition(
    state: &AppState,
    user: &User,
    meta: &RequestMeta,
    old: &Visit,
    visit: Visit,
    action: AuditAction,
) -> Result<Visit, ApiError> {
    let visit = create_visit_repository(&state.db).save(&visit).await?;
    state
        .audit(
            AuditEntry::new(&Actor::user(user), action, EntityType::Visit)
                .entity(visit.id, &visit.visitor_name)
                .with_changes(ChangeSet::between(old, &visit))
                .with_meta(meta),
        )
        .await;
    Ok(visit)
}

#[utoipa::path(
    get,
    path = "/api/v1/visits",
    params(
        ("status" = Option<String>, Query, description = "Visit status"),
        ("date" = Option<String>, Query, description = "Expected day, YYYY-MM-DD")
    ),
    responses((status = 200, description = "Paginated visits by expected arrival")),
    tag = "Visitors"
)]
pub async fn list_visits(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiQuery(query): ApiQuery<ListVisitsQuery>,
) -> ApiResult<PaginatedResult<Visit>> {
    let filter = VisitFilter {
        status: query.status,
        date: query.date,
        host_employee_id: query.host_employee_id,
    };
    let pagination = Pagination::from_query(query.page, query.per_page);
    ok(create_visit_repository(&state.db)
        .list(&filter, &pagination)
        .await?)
}

pub async fn get_visit(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Visit> {
    ok(load_visit(&state, id).await?)
}

#[utoipa::path(
    post,
    path = "/api/v1/visits",
    request_body = RegisterVisitRequest,
    responses(
        (status = 201, description = "Visit registered"),
        (status = 404, description = "Host not found", body = crate::error::ErrorResponse)
    ),
    tag = "Visitors"
)]
pub async fn register_visit(
    State(state): State<AppState>,
    CanManageVisitors(user): CanManageVisitors,
    ClientMeta(meta): ClientMeta,
    ApiJson(request): ApiJson<RegisterVisitRequest>,
) -> Created<Visit> {
    request.validate()?;
    let host = create_employee_repository(&state.db)
        .get(request.host_employee_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Employee", request.host_employee_id))?;
    if !host.active {
        return Err(ApiError::UnprocessableEntity(format!(
            "Host {} is inactive",
            host.full_name()
        )));
    }

    let mut visit = Visit::new(request.visitor_name.trim(), host.id, request.expected_at);
    visit.company = clean(request.company);
    visit.email = clean(request.email);
    visit.phone = clean(request.phone);
    visit.purpose = clean(request.purpose);
    let visit = create_visit_repository(&state.db).create(&visit).await?;
    info!(visit_id = %visit.id, host = %host.full_name(), "Visit registered");

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Create, EntityType::Visit)
                .entity(visit.id, &visit.visitor_name)
                .with_changes(ChangeSet::created(&visit))
                .with_meta(&meta),
        )
        .await;

    created(visit)
}

/// Checks the visitor in and tells the host they have arrived.
#[utoipa::path(
    post,
    path = "/api/v1/visits/{id}/check-in",
    params(("id" = Uuid, Path, description = "Visit ID")),
    request_body(content = CheckInRequest, description = "Optional badge number"),
    responses(
        (status = 200, description = "Visitor checked in, host notified"),
        (status = 422, description = "Visit is not expected", body = crate::error::ErrorResponse)
    ),
    tag = "Visitors"
)]
pub async fn check_in(
    State(state): State<AppState>,
    CanManageVisitors(user): CanManageVisitors,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
    body: Option<ApiJson<CheckInRequest>>,
) -> ApiResult<Visit> {
    let request = body.map(|ApiJson(r)| r).unwrap_or_default();
    request.validate()?;
    let old = load_visit(&state, id).await?;
    let mut visit = old.clone();
    visit
        .check_in(clean(request.badge_number), Utc::now())
        .map_err(ApiError::UnprocessableEntity)?;
    let visit = save_transition(&state, &user, &meta, &old, visit, AuditAction::CheckIn).await?;

    let title = match &visit.company {
        Some(company) => format!("{} ({}) has arrived", visit.visitor_name, company),
        None => format!("{} has arrived", visit.visitor_name),
    };
    let mut notification = Notification::for_employee(visit.host_employee_id, title);
    if let Some(badge) = &visit.badge_number {
        notification = notification.with_body(format!("Badge {}", badge));
    }
    create_notification_repository(&state.db)
        .create(&notification)
        .await?;
    info!(visit_id = %visit.id, "Visitor checked in");

    ok(visit)
}

pub async fn check_out(
    State(state): State<AppState>,
    CanManageVisitors(user): CanManageVisitors,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Visit> {
    let old = load_visit(&state, id).await?;
    let mut visit = old.clone();
    visit
        .check_out(Utc::now())
        .map_err(ApiError::UnprocessableEntity)?;
    ok(save_transition(&state, &user, &meta, &old, visit, AuditAction::CheckOut).await?)
}

pub async fn cancel_visit(
    State(state): State<AppState>,
    CanManageVisitors(user): CanManageVisitors,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Visit> {
    let old = load_visit(&state, id).await?;
    let mut visit = old.clone();
    visit
        .cancel(Utc::now())
        .map_err(ApiError::UnprocessableEntity)?;
    ok(save_transition(&state, &user, &meta, &old, visit, AuditAction::Cancel).await?)
}
