//! Server-rendered admin dashboard.
//!
//! Pages redirect to `/login` without a session. Partials under
//! `/web/partials` are fetched by htmx and answer 401 instead.

pub mod templates;

use axum::{
    extract::State,
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use fd_core::db::{
    create_asset_repository, create_audit_repository, create_subnet_repository,
    create_ticket_repository, Pagination,
};
use fd_core::{
    AssetFilter, AssetStatus, AuditFilter, EntityType, Permission, SubnetScanner, TicketFilter,
    TicketStatus, User,
};

use crate::auth::{require_permission, AuthenticatedUser, OptionalUser};
use crate::error::ApiError;
use crate::extract::{clean, ApiPath, ApiQuery};
use crate::routes::stats::collect_stats;
use crate::routes::tickets::load_ticket;
use crate::state::AppState;

use templates::*;

const URGENT_TICKET_COUNT: usize = 10;
const PAGE_SIZE: u32 = 25;

pub fn create_web_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/assets", get(assets_page))
        .route("/tickets", get(tickets_page))
        .route("/ipam", get(ipam_page))
        .route("/ipam/:id", get(ipam_detail))
        .route("/audit", get(audit_page))
        // Partials for htmx
        .route("/web/partials/tickets/:id/sla", get(partial_ticket_sla))
        .with_state(state)
}

/// Unwraps the session user or produces the login redirect.
fn signed_in(user: OptionalUser) -> Result<User, Response> {
    user.0.ok_or_else(|| Redirect::to("/login").into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub status: Option<String>,
    pub q: Option<String>,
    pub entity_type: Option<String>,
    #[serde(default)]
    pub breached: bool,
}

impl PageQuery {
    fn pagination(&self) -> Pagination {
        Pagination::new(self.page.unwrap_or(1), PAGE_SIZE)
    }
}

async fn dashboard(State(state): State<AppState>, user: OptionalUser) -> Result<Response, ApiError> {
    let user = match signed_in(user) {
        Ok(user) => user,
        Err(redirect) => return Ok(redirect),
    };

    let stats = collect_stats(&state).await?;

    let now = Utc::now();
    let open = TicketFilter {
        open_only: true,
        ..Default::default()
    };
    let mut urgent: Vec<_> = create_ticket_repository(&state.db)
        .list(&open, &Pagination::new(1, fd_core::db::MAX_PAGE_SIZE), now)
        .await?
        .items
        .into_iter()
        .filter(|t| t.sla_breach_at.is_some())
        .collect();
    urgent.sort_by_key(|t| t.sla_breach_at);
    urgent.truncate(URGENT_TICKET_COUNT);

    Ok(HtmlTemplate(DashboardTemplate {
        active_nav: "dashboard".to_string(),
        current_user: Some(CurrentUserInfo::from(&user)),
        total_assets: stats.total_assets,
        assets_by_status: stats
            .assets_by_status
            .iter()
            .map(|(status, count)| (status.to_string(), *count))
            .collect(),
        open_tickets: stats.open_tickets,
        breached_tickets: stats.breached_tickets,
        visitors_on_site: stats.visitors_on_site,
        tickets: urgent
            .iter()
            .map(|t| TicketRow::from_ticket(t, now))
            .collect(),
    })
    .into_response())
}

async fn assets_page(
    State(state): State<AppState>,
    user: OptionalUser,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Response, ApiError> {
    let user = match signed_in(user) {
        Ok(user) => user,
        Err(redirect) => return Ok(redirect),
    };

    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<AssetStatus>)
        .transpose()
        .map_err(|e| ApiError::validation_field("status", "invalid_status", &e.to_string()))?;
    let filter = AssetFilter {
        status,
        search: clean(query.q.clone()),
        ..Default::default()
    };
    let page = create_asset_repository(&state.db)
        .list(&filter, &query.pagination())
        .await?;

    let now = Utc::now();
    let status_filter = status.map(|s| s.to_string()).unwrap_or_default();
    Ok(HtmlTemplate(AssetsTemplate {
        active_nav: "assets".to_string(),
        current_user: Some(CurrentUserInfo::from(&user)),
        assets: page.items.iter().map(|a| AssetRow::from_asset(a, now)).collect(),
        total_count: page.total as i64,
        status_filter: status_filter.clone(),
        status_options: SelectOption::list(AssetStatus::ALL, &status_filter),
        query: query.q.unwrap_or_default(),
        page: page.page,
        total_pages: page.total_pages,
    })
    .into_response())
}

async fn tickets_page(
    State(state): State<AppState>,
    user: OptionalUser,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Response, ApiError> {
    let user = match signed_in(user) {
        Ok(user) => user,
        Err(redirect) => return Ok(redirect),
    };

    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<TicketStatus>)
        .transpose()
        .map_err(|e| ApiError::validation_field("status", "invalid_status", &e.to_string()))?;
    let filter = TicketFilter {
        status,
        breached_only: query.breached,
        ..Default::default()
    };
    let now = Utc::now();
    let page = create_ticket_repository(&state.db)
        .list(&filter, &query.pagination(), now)
        .await?;

    let status_filter = status.map(|s| s.to_string()).unwrap_or_default();
    Ok(HtmlTemplate(TicketsTemplate {
        active_nav: "tickets".to_string(),
        current_user: Some(CurrentUserInfo::from(&user)),
        tickets: page
            .items
            .iter()
            .map(|t| TicketRow::from_ticket(t, now))
            .collect(),
        total_count: page.total as i64,
        status_filter: status_filter.clone(),
        status_options: SelectOption::list(TicketStatus::ALL, &status_filter),
        breached_only: query.breached,
        page: page.page,
        total_pages: page.total_pages,
    })
    .into_response())
}

async fn ipam_page(State(state): State<AppState>, user: OptionalUser) -> Result<Response, ApiError> {
    let user = match signed_in(user) {
        Ok(user) => user,
        Err(redirect) => return Ok(redirect),
    };
    let subnets = create_subnet_repository(&state.db).list().await?;
    Ok(HtmlTemplate(IpamTemplate {
        active_nav: "ipam".to_string(),
        current_user: Some(CurrentUserInfo::from(&user)),
        subnets: subnets.iter().map(SubnetRow::from).collect(),
    })
    .into_response())
}

/// Address grid for one subnet. Viewing the grid is not audited; only the
/// API scan endpoint is.
async fn ipam_detail(
    State(state): State<AppState>,
    user: OptionalUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Response, ApiError> {
    let user = match signed_in(user) {
        Ok(user) => user,
        Err(redirect) => return Ok(redirect),
    };
    let report = SubnetScanner::new(&state.db).scan(id).await?;
    Ok(HtmlTemplate(IpamDetailTemplate::new(
        Some(CurrentUserInfo::from(&user)),
        &report,
    ))
    .into_response())
}

async fn audit_page(
    State(state): State<AppState>,
    user: OptionalUser,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Response, ApiError> {
    let user = match signed_in(user) {
        Ok(user) => user,
        Err(redirect) => return Ok(redirect),
    };
    require_permission(&user, Permission::ViewAudit)?;

    let entity_type = query
        .entity_type
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<EntityType>)
        .transpose()
        .map_err(|e| ApiError::validation_field("entity_type", "invalid_entity_type", &e.to_string()))?;
    let filter = AuditFilter {
        entity_type,
        ..Default::default()
    };
    let page = create_audit_repository(&state.db)
        .list(&filter, &query.pagination())
        .await?;

    let entity_filter = entity_type.map(|e| e.to_string()).unwrap_or_default();
    Ok(HtmlTemplate(AuditTemplate {
        active_nav: "audit".to_string(),
        current_user: Some(CurrentUserInfo::from(&user)),
        entries: page.items.iter().map(AuditRow::from).collect(),
        entity_options: SelectOption::list(EntityType::ALL, &entity_filter),
        entity_filter,
        page: page.page,
        total_pages: page.total_pages,
    })
    .into_response())
}

/// Badge fragment that re-requests itself every minute.
async fn partial_ticket_sla(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let ticket = load_ticket(&state, id).await?;
    let row = TicketRow::from_ticket(&ticket, Utc::now());
    Ok(HtmlTemplate(SlaBadgeTemplate {
        ticket_id: ticket.id,
        badge: row.sla,
    }))
}

// ============================================
// Template Response Wrapper
// ============================================

pub struct HtmlTemplate<T>(pub T);

impl<T> IntoResponse for HtmlTemplate<T>
where
    T: askama::Template,
{
    fn into_response(self) -> Response {
        use axum::response::Html;

        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => {
                tracing::error!("Template rendering error: {}", err);
                ApiError::Internal("Template rendering failed".to_string()).into_response()
            }
        }
    }
}
