//! Employee self-service portal: login, home page and a small JSON API
//! scoped to the signed-in employee.

use axum::{
    extract::State,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use fd_core::auth::EmployeeSessionData;
use fd_core::db::{
    create_asset_repository, create_catalog_repository, create_custody_repository,
    create_employee_repository, create_knowledge_repository, create_notification_repository,
    create_ticket_repository, PaginatedResult, Pagination,
};
use fd_core::{
    verify_password, Actor, ArticleFilter, Asset, AuditAction, AuditEntry, ChangeSet,
    CustodyFilter, CustodyItem, CustodyStatus, Employee, EntityType, KnowledgeArticle,
    Notification, RecipientType, RequestMeta, ServiceCategory, ServiceItem, Ticket, TicketFilter,
    TicketPriority, TicketSource,
};
use fd_observability::metrics::record_login_attempt;

use crate::auth::{
    clear_employee_session, get_employee_session, issue_login_csrf, set_employee_session, take_login_csrf,
    CurrentEmployee,
};
use crate::error::ApiError;
use crate::extract::{clean, ApiJson, ApiPath, ApiQuery};
use crate::middleware::ClientMeta;
use crate::response::{created, ok, ApiResult, Created, Done};
use crate::routes::tickets::{load_service_item, open_ticket, TicketView};
use crate::state::AppState;
use crate::web::templates::{PortalHomeTemplate, PortalLoginTemplate, TicketRow};
use crate::web::HtmlTemplate;

const NOTIFICATION_LIMIT: i64 = 50;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(home))
        .route("/login", get(login_page).post(login_submit))
        .route("/logout", post(logout))
        .route("/api/profile", get(profile))
        .route("/api/assets", get(my_assets))
        .route("/api/requests", get(my_requests).post(submit_request))
        .route("/api/custody", get(my_custody))
        .route("/api/custody/:id/acknowledge", post(acknowledge_custody))
        .route("/api/notifications", get(my_notifications))
        .route("/api/notifications/:id/read", post(mark_notification_read))
        .route("/api/knowledge", get(knowledge))
        .route("/api/catalog", get(catalog))
}

// ---- pages ----

#[derive(Debug, Deserialize)]
pub struct PortalLoginForm {
    pub email: String,
    pub password: String,
    pub csrf_token: String,
}

pub async fn login_page(session: Session) -> Response {
    if get_employee_session(&session).await.is_some() {
        return Redirect::to("/portal").into_response();
    }
    render_login(&session, None).await
}

pub async fn login_submit(
    State(state): State<AppState>,
    ClientMeta(meta): ClientMeta,
    session: Session,
    Form(form): Form<PortalLoginForm>,
) -> Response {
    if !take_login_csrf(&session, &form.csrf_token).await {
        return render_login(&session, Some("Session expired. Please try again.")).await;
    }

    let email = form.email.trim().to_lowercase();
    let employee = match create_employee_repository(&state.db).get_by_email(&email).await {
        Ok(employee) => employee,
        Err(e) => {
            warn!(error = %e, "Employee lookup failed during portal login");
            return render_login(&session, Some("An error occurred. Please try again.")).await;
        }
    };

    let verified = match &employee {
        Some(employee) if employee.can_use_portal() => employee
            .portal_password_hash
            .as_deref()
            .map(|hash| verify_password(&form.password, hash))
            .transpose(),
        _ => Ok(None),
    };

    match (employee, verified) {
        (Some(employee), Ok(Some(true))) => {
            if let Err(e) = session.cycle_id().await {
                warn!(error = %e, "Failed to cycle session id");
            }
            let data = EmployeeSessionData::new(employee.id, &employee.email);
            if let Err(e) = set_employee_session(&session, data).await {
                warn!(error = %e, "Failed to store portal session");
                return render_login(&session, Some("An error occurred. Please try again.")).await;
            }
            record_login_attempt(true);
            state
                .audit(
                    AuditEntry::new(
                        &Actor::employee(&employee),
                        AuditAction::Login,
                        EntityType::Employee,
                    )
                    .entity(employee.id, employee.full_name())
                    .with_meta(&meta),
                )
                .await;
            info!(employee_id = %employee.id, "Employee signed in to portal");
            Redirect::to("/portal").into_response()
        }
        (_, Err(e)) => {
            warn!(error = %e, "Portal password verification error");
            render_login(&session, Some("An error occurred. Please try again.")).await
        }
        _ => {
            record_login_attempt(false);
            state
                .audit(
                    AuditEntry::new(
                        &Actor::anonymous(&email),
                        AuditAction::LoginFailed,
                        EntityType::Employee,
                    )
                    .entity(&email, &email)
                    .with_meta(&meta),
                )
                .await;
            warn!(email = %email, "Portal login failed");
            render_login(&session, Some("Invalid email or password.")).await
        }
    }
}

pub async fn logout(session: Session) -> Redirect {
    if let Err(e) = clear_employee_session(&session).await {
        warn!(error = %e, "Failed to clear portal session");
    }
    Redirect::to("/portal/login")
}

async fn render_login(session: &Session, error: Option<&str>) -> Response {
    let csrf_token = issue_login_csrf(session).await.unwrap_or_else(|e| {
        warn!(error = %e, "Failed to store login token");
        String::new()
    });
    HtmlTemplate(PortalLoginTemplate {
        error: error.map(str::to_string),
        csrf_token,
    })
    .into_response()
}

pub async fn home(
    State(state): State<AppState>,
    employee: Result<CurrentEmployee, ApiError>,
) -> Result<Response, ApiError> {
    let Ok(CurrentEmployee(employee)) = employee else {
        return Ok(Redirect::to("/portal/login").into_response());
    };

    let now = Utc::now();
    let assets = create_asset_repository(&state.db)
        .list_for_employee(employee.id)
        .await?;
    let requests = requests_for(&state, &employee, &Pagination::new(1, 10)).await?;
    let pending_custody = create_custody_repository(&state.db)
        .list(&CustodyFilter {
            employee_id: Some(employee.id),
            status: Some(CustodyStatus::PendingAcknowledgment),
            ..Default::default()
        })
        .await?
        .len();
    let unread = create_notification_repository(&state.db)
        .count_unread(RecipientType::Employee, employee.id)
        .await?;

    Ok(HtmlTemplate(PortalHomeTemplate {
        employee_name: employee.full_name(),
        assets: assets.iter().map(|a| (a.asset_tag.clone(), a.name.clone())).collect(),
        requests: requests
            .items
            .into_iter()
            .map(|t| TicketRow::from_ticket(&t, now))
            .collect(),
        pending_custody,
        unread,
    })
    .into_response())
}

// ---- JSON API ----

#[derive(Debug, Serialize)]
pub struct PortalProfile {
    #[serde(flatten)]
    pub employee: Employee,
    pub full_name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PortalPageQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PortalRequestBody {
    /// Required unless a service item is chosen; defaults to the item name.
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[validate(length(max = 10000))]
    pub description: Option<String>,
    pub service_item_id: Option<Uuid>,
    /// One of the employee's own assets.
    pub asset_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct PortalCatalog {
    pub categories: Vec<ServiceCategory>,
    pub items: Vec<ServiceItem>,
}

async fn requests_for(
    state: &AppState,
    employee: &Employee,
    pagination: &Pagination,
) -> Result<PaginatedResult<Ticket>, ApiError> {
    let filter = TicketFilter {
        requester_id: Some(employee.id),
        ..Default::default()
    };
    Ok(create_ticket_repository(&state.db)
        .list(&filter, pagination, Utc::now())
        .await?)
}

pub async fn profile(CurrentEmployee(employee): CurrentEmployee) -> ApiResult<PortalProfile> {
    let full_name = employee.full_name();
    ok(PortalProfile {
        employee,
        full_name,
    })
}

pub async fn my_assets(
    State(state): State<AppState>,
    CurrentEmployee(employee): CurrentEmployee,
) -> ApiResult<Vec<Asset>> {
    ok(create_asset_repository(&state.db)
        .list_for_employee(employee.id)
        .await?)
}

pub async fn my_requests(
    State(state): State<AppState>,
    CurrentEmployee(employee): CurrentEmployee,
    ApiQuery(query): ApiQuery<PortalPageQuery>,
) -> ApiResult<PaginatedResult<TicketView>> {
    let now = Utc::now();
    let pagination = Pagination::from_query(query.page, query.per_page);
    let page = requests_for(&state, &employee, &pagination).await?;
    ok(page.map(|t| TicketView::new(t, now)))
}

/// Opens a ticket on behalf of the employee, from a catalogue item or free
/// text.
#[utoipa::path(
    post,
    path = "/portal/api/requests",
    request_body = PortalRequestBody,
    responses(
        (status = 201, description = "Request opened"),
        (status = 401, description = "Portal login required", body = crate::error::ErrorResponse),
        (status = 422, description = "No title and no service item", body = crate::error::ErrorResponse)
    ),
    tag = "Portal"
)]
pub async fn submit_request(
    State(state): State<AppState>,
    CurrentEmployee(employee): CurrentEmployee,
    ClientMeta(meta): ClientMeta,
    ApiJson(request): ApiJson<PortalRequestBody>,
) -> Created<TicketView> {
    request.validate()?;

    let item = match request.service_item_id {
        Some(id) => {
            let item = load_service_item(&state, id).await?;
            if !item.active {
                return Err(ApiError::UnprocessableEntity(format!(
                    "{} is no longer offered",
                    item.name
                )));
            }
            Some(item)
        }
        None => None,
    };

    let title = match (clean(request.title), &item) {
        (Some(title), _) => title,
        (None, Some(item)) => item.name.clone(),
        (None, None) => {
            return Err(ApiError::validation_field(
                "title",
                "required",
                "Describe the request or pick a catalogue item",
            ))
        }
    };

    if let Some(asset_id) = request.asset_id {
        let owns = create_asset_repository(&state.db)
            .get(asset_id)
            .await?
            .map(|a| a.assigned_employee_id == Some(employee.id))
            .unwrap_or(false);
        if !owns {
            return Err(ApiError::not_found("Asset", asset_id));
        }
    }

    let priority = item
        .as_ref()
        .map(|i| i.default_priority)
        .unwrap_or(TicketPriority::Medium);
    let mut ticket = Ticket::new(title, priority, TicketSource::Portal);
    ticket.description = clean(request.description);
    ticket.requester_id = Some(employee.id);
    ticket.asset_id = request.asset_id;
    ticket.service_item_id = item.as_ref().map(|i| i.id);
    let ticket = open_ticket(&state, ticket, item.as_ref()).await?;

    state
        .audit(
            AuditEntry::new(&Actor::employee(&employee), AuditAction::Create, EntityType::Ticket)
                .entity(ticket.id, ticket.reference())
                .with_changes(ChangeSet::created(&ticket))
                .with_meta(&meta),
        )
        .await;

    created(TicketView::new(ticket, Utc::now()))
}

pub async fn my_custody(
    State(state): State<AppState>,
    CurrentEmployee(employee): CurrentEmployee,
) -> ApiResult<Vec<CustodyItem>> {
    let filter = CustodyFilter {
        employee_id: Some(employee.id),
        ..Default::default()
    };
    ok(create_custody_repository(&state.db).list(&filter).await?)
}

/// Confirms receipt of an asset. Items held by someone else read as not
/// found.
#[utoipa::path(
    post,
    path = "/portal/api/custody/{id}/acknowledge",
    params(("id" = Uuid, Path, description = "Custody item ID")),
    responses(
        (status = 200, description = "Acknowledged"),
        (status = 404, description = "No such item for this employee", body = crate::error::ErrorResponse),
        (status = 422, description = "Already acknowledged or returned", body = crate::error::ErrorResponse)
    ),
    tag = "Portal"
)]
pub async fn acknowledge_custody(
    State(state): State<AppState>,
    CurrentEmployee(employee): CurrentEmployee,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<CustodyItem> {
    let repo = create_custody_repository(&state.db);
    let old = repo
        .get(id)
        .await?
        .filter(|item| item.employee_id == employee.id)
        .ok_or_else(|| ApiError::not_found("Custody item", id))?;

    let mut item = old.clone();
    item.acknowledge(Utc::now())
        .map_err(ApiError::UnprocessableEntity)?;
    let item = repo.save(&item).await?;

    record_acknowledgement(&state, &employee, &meta, &old, &item).await;
    ok(item)
}

async fn record_acknowledgement(
    state: &AppState,
    employee: &Employee,
    meta: &RequestMeta,
    old: &CustodyItem,
    item: &CustodyItem,
) {
    state
        .audit(
            AuditEntry::new(
                &Actor::employee(employee),
                AuditAction::Acknowledge,
                EntityType::CustodyItem,
            )
            .entity(item.id, item.asset_id.to_string())
            .with_changes(ChangeSet::between(old, item))
            .with_meta(meta),
        )
        .await;
    info!(custody_id = %item.id, employee_id = %employee.id, "Custody acknowledged");
}

pub async fn my_notifications(
    State(state): State<AppState>,
    CurrentEmployee(employee): CurrentEmployee,
) -> ApiResult<Vec<Notification>> {
    ok(create_notification_repository(&state.db)
        .list_for(RecipientType::Employee, employee.id, false, NOTIFICATION_LIMIT)
        .await?)
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    CurrentEmployee(employee): CurrentEmployee,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Done> {
    let marked = create_notification_repository(&state.db)
        .mark_read(id, RecipientType::Employee, employee.id)
        .await?;
    if !marked {
        return Err(ApiError::not_found("Notification", id));
    }
    ok(Done { id })
}

/// Published articles only.
pub async fn knowledge(
    State(state): State<AppState>,
    _employee: CurrentEmployee,
    ApiQuery(query): ApiQuery<PortalPageQuery>,
) -> ApiResult<PaginatedResult<KnowledgeArticle>> {
    let filter = ArticleFilter {
        published: Some(true),
        search: clean(query.search),
        ..Default::default()
    };
    let pagination = Pagination::from_query(query.page, query.per_page);
    ok(create_knowledge_repository(&state.db)
        .list_articles(&filter, &pagination)
        .await?)
}

pub async fn catalog(
    State(state): State<AppState>,
    _employee: CurrentEmployee,
) -> ApiResult<PortalCatalog> {
    let repo = create_catalog_repository(&state.db);
    ok(PortalCatalog {
        categories: repo.list_categories().await?,
        items: repo.list_items(None, true).await?,
    })
}
