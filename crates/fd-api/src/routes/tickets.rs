//! Helpdesk ticket endpoints. Every ticket in a response carries its
//! reference and current SLA state.

use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use fd_core::db::{
    create_asset_repository, create_catalog_repository, create_employee_repository,
    create_notification_repository, create_ticket_repository, create_user_repository,
    PaginatedResult, Pagination,
};
use fd_core::{
    Actor, AuditAction, AuditEntry, ChangeSet, EntityType, Notification, ServiceItem, SlaSummary,
    Ticket, TicketFilter, TicketPriority, TicketSource, TicketStatus,
};
use fd_observability::metrics::TICKETS_CREATED;

use crate::auth::{AuthenticatedUser, CanManageTickets};
use crate::error::ApiError;
use crate::extract::{clean, double_option, patch_text, ApiJson, ApiPath, ApiQuery};
use crate::middleware::ClientMeta;
use crate::response::{created, ok, ApiResult, Created, Done};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tickets).post(create_ticket))
        .route(
            "/:id",
            get(get_ticket).put(update_ticket).delete(delete_ticket),
        )
        .route("/:id/status", post(change_status))
}

/// A ticket as returned by the API.
#[derive(Debug, Clone, Serialize)]
pub struct TicketView {
    #[serde(flatten)]
    pub ticket: Ticket,
    /// e.g. `TCK-000042`.
    pub reference: String,
    /// `None` for tickets without a breach point.
    pub sla: Option<SlaSummary>,
}

impl TicketView {
    pub fn new(ticket: Ticket, now: DateTime<Utc>) -> Self {
        let sla = match (ticket.sla_state(now), ticket.sla_breach_at) {
            (Some(state), Some(breach_at)) => Some(state.summary(breach_at)),
            _ => None,
        };
        Self {
            reference: ticket.reference(),
            ticket,
            sla,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListTicketsQuery {
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub assignee_id: Option<Uuid>,
    pub requester_id: Option<Uuid>,
    pub source: Option<TicketSource>,
    #[serde(default)]
    pub breached_only: bool,
    #[serde(default)]
    pub open_only: bool,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateTicketRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 10000))]
    pub description: Option<String>,
    /// Defaults to the service item's priority, else medium.
    #[schema(value_type = Option<String>, example = "high")]
    pub priority: Option<TicketPriority>,
    #[schema(value_type = Option<String>)]
    pub source: Option<TicketSource>,
    pub requester_id: Option<Uuid>,
    pub assignee_id: Option<Uuid>,
    pub asset_id: Option<Uuid>,
    pub service_item_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateTicketRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[validate(length(max = 10000))]
    pub description: Option<String>,
    #[schema(value_type = Option<String>)]
    pub priority: Option<TicketPriority>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<Uuid>)]
    pub assignee_id: Option<Option<Uuid>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangeStatusRequest {
    #[schema(value_type = String, example = "resolved")]
    pub status: TicketStatus,
}

pub(crate) async fn load_ticket(state: &AppState, id: Uuid) -> Result<Ticket, ApiError> {
    create_ticket_repository(&state.db)
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Ticket", id))
}

pub(crate) async fn load_service_item(state: &AppState, id: Uuid) -> Result<ServiceItem, ApiError> {
    create_catalog_repository(&state.db)
        .get_item(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Service item", id))
}

async fn check_assignee(state: &AppState, assignee_id: Uuid) -> Result<(), ApiError> {
    match create_user_repository(&state.db).get(assignee_id).await? {
        Some(user) if user.enabled => Ok(()),
        Some(_) => Err(ApiError::validation_field(
            "assignee_id",
            "disabled",
            "Assignee account is disabled",
        )),
        None => Err(ApiError::not_found("User", assignee_id)),
    }
}

async fn notify_assignee(state: &AppState, ticket: &Ticket) -> Result<(), ApiError> {
    if let Some(assignee_id) = ticket.assignee_id {
        let notification = Notification::for_user(
            assignee_id,
            format!("{} assigned to you", ticket.reference()),
        )
        .with_body(ticket.title.clone())
        .with_link(format!("/tickets#{}", ticket.id));
        create_notification_repository(&state.db)
            .create(&notification)
            .await?;
    }
    Ok(())
}

/// Stamps the SLA breach point, persists the ticket and counts it.
pub(crate) async fn open_ticket(
    state: &AppState,
    mut ticket: Ticket,
    item: Option<&ServiceItem>,
) -> Result<Ticket, ApiError> {
    let now = Utc::now();
    ticket.created_at = now;
    ticket.updated_at = now;
    ticket.apply_sla(&state.sla_policy, item.and_then(|i| i.sla_hours));

    let ticket = create_ticket_repository(&state.db).create(&ticket).await?;
    metrics::counter!(TICKETS_CREATED, "source" => ticket.source.as_db_str()).increment(1);
    info!(
        ticket = %ticket.reference(),
        priority = %ticket.priority,
        source = %ticket.source,
        sla_breach_at = ?ticket.sla_breach_at,
        "Ticket opened"
    );
    Ok(ticket)
}

#[utoipa::path(
    get,
    path = "/api/v1/tickets",
    params(
        ("status" = Option<String>, Query, description = "Ticket status"),
        ("priority" = Option<String>, Query, description = "Priority"),
        ("assignee_id" = Option<Uuid>, Query, description = "Assigned user"),
        ("requester_id" = Option<Uuid>, Query, description = "Requesting employee"),
        ("breached_only" = Option<bool>, Query, description = "Only tickets past their SLA")
    ),
    responses((status = 200, description = "Paginated tickets with SLA state")),
    tag = "Tickets"
)]
pub async fn list_tickets(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiQuery(query): ApiQuery<ListTicketsQuery>,
) -> ApiResult<PaginatedResult<TicketView>> {
    let now = Utc::now();
    let filter = TicketFilter {
        status: query.status,
        priority: query.priority,
        assignee_id: query.assignee_id,
        requester_id: query.requester_id,
        source: query.source,
        breached_only: query.breached_only,
        open_only: query.open_only,
    };
    let pagination = Pagination::from_query(query.page, query.per_page);
    let page = create_ticket_repository(&state.db)
        .list(&filter, &pagination, now)
        .await?;
    ok(page.map(|t| TicketView::new(t, now)))
}

#[utoipa::path(
    get,
    path = "/api/v1/tickets/{id}",
    params(("id" = Uuid, Path, description = "Ticket ID")),
    responses(
        (status = 200, description = "Ticket with SLA state"),
        (status = 404, description = "Not found", body = crate::error::ErrorResponse)
    ),
    tag = "Tickets"
)]
pub async fn get_ticket(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<TicketView> {
    let ticket = load_ticket(&state, id).await?;
    ok(TicketView::new(ticket, Utc::now()))
}

#[utoipa::path(
    post,
    path = "/api/v1/tickets",
    request_body = CreateTicketRequest,
    responses(
        (status = 201, description = "Ticket created with its SLA breach point"),
        (status = 404, description = "Referenced record not found", body = crate::error::ErrorResponse)
    ),
    tag = "Tickets"
)]
pub async fn create_ticket(
    State(state): State<AppState>,
    CanManageTickets(user): CanManageTickets,
    ClientMeta(meta): ClientMeta,
    ApiJson(request): ApiJson<CreateTicketRequest>,
) -> Created<TicketView> {
    request.validate()?;

    let item = match request.service_item_id {
        Some(id) => Some(load_service_item(&state, id).await?),
        None => None,
    };
    if let Some(requester_id) = request.requester_id {
        create_employee_repository(&state.db)
            .get(requester_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Employee", requester_id))?;
    }
    if let Some(asset_id) = request.asset_id {
        create_asset_repository(&state.db)
            .get(asset_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Asset", asset_id))?;
    }
    if let Some(assignee_id) = request.assignee_id {
        check_assignee(&state, assignee_id).await?;
    }

    let priority = request
        .priority
        .or_else(|| item.as_ref().map(|i| i.default_priority))
        .unwrap_or(TicketPriority::Medium);
    let mut ticket = Ticket::new(
        request.title.trim(),
        priority,
        request.source.unwrap_or(TicketSource::Helpdesk),
    );
    ticket.description = clean(request.description);
    ticket.requester_id = request.requester_id;
    ticket.assignee_id = request.assignee_id;
    ticket.asset_id = request.asset_id;
    ticket.service_item_id = item.as_ref().map(|i| i.id);

    let ticket = open_ticket(&state, ticket, item.as_ref()).await?;
    notify_assignee(&state, &ticket).await?;

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Create, EntityType::Ticket)
                .entity(ticket.id, ticket.reference())
                .with_changes(ChangeSet::created(&ticket))
                .with_meta(&meta),
        )
        .await;

    created(TicketView::new(ticket, Utc::now()))
}

/// Edits title, description, priority or assignee. A priority change
/// recomputes the breach point from the creation time.
#[utoipa::path(
    put,
    path = "/api/v1/tickets/{id}",
    params(("id" = Uuid, Path, description = "Ticket ID")),
    request_body = UpdateTicketRequest,
    responses((status = 200, description = "Ticket updated")),
    tag = "Tickets"
)]
pub async fn update_ticket(
    State(state): State<AppState>,
    CanManageTickets(user): CanManageTickets,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<UpdateTicketRequest>,
) -> ApiResult<TicketView> {
    request.validate()?;
    let old = load_ticket(&state, id).await?;
    let mut ticket = old.clone();

    if let Some(title) = clean(request.title) {
        ticket.title = title;
    }
    patch_text(&mut ticket.description, request.description);

    if let Some(priority) = request.priority {
        if priority != ticket.priority {
            ticket.priority = priority;
            let override_hours = match ticket.service_item_id {
                Some(item_id) => create_catalog_repository(&state.db)
                    .get_item(item_id)
                    .await?
                    .and_then(|i| i.sla_hours),
                None => None,
            };
            ticket.apply_sla(&state.sla_policy, override_hours);
        }
    }

    let mut reassigned = false;
    if let Some(assignee_id) = request.assignee_id {
        if let Some(new_assignee) = assignee_id {
            check_assignee(&state, new_assignee).await?;
        }
        reassigned = assignee_id != ticket.assignee_id;
        ticket.assignee_id = assignee_id;
    }
    ticket.updated_at = Utc::now();

    let ticket = create_ticket_repository(&state.db).save(&ticket).await?;
    if reassigned {
        notify_assignee(&state, &ticket).await?;
    }

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Update, EntityType::Ticket)
                .entity(ticket.id, ticket.reference())
                .with_changes(ChangeSet::between(&old, &ticket))
                .with_meta(&meta),
        )
        .await;

    ok(TicketView::new(ticket, Utc::now()))
}

/// Moves the ticket to a new status and tells the requester.
#[utoipa::path(
    post,
    path = "/api/v1/tickets/{id}/status",
    params(("id" = Uuid, Path, description = "Ticket ID")),
    request_body = ChangeStatusRequest,
    responses((status = 200, description = "Status changed")),
    tag = "Tickets"
)]
pub async fn change_status(
    State(state): State<AppState>,
    CanManageTickets(user): CanManageTickets,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<ChangeStatusRequest>,
) -> ApiResult<TicketView> {
    let old = load_ticket(&state, id).await?;
    if old.status == request.status {
        return ok(TicketView::new(old, Utc::now()));
    }

    let now = Utc::now();
    let mut ticket = old.clone();
    ticket.transition(request.status, now);
    let ticket = create_ticket_repository(&state.db).save(&ticket).await?;
    info!(ticket = %ticket.reference(), from = %old.status, to = %ticket.status, "Ticket status changed");

    if let Some(requester_id) = ticket.requester_id {
        let notification = Notification::for_employee(
            requester_id,
            format!("{} is now {}", ticket.reference(), ticket.status),
        )
        .with_body(ticket.title.clone())
        .with_link("/portal");
        create_notification_repository(&state.db)
            .create(&notification)
            .await?;
    }

    let action = if ticket.status == TicketStatus::Cancelled {
        AuditAction::Cancel
    } else if ticket.status.is_terminal() {
        AuditAction::Complete
    } else {
        AuditAction::Update
    };
    state
        .audit(
            AuditEntry::new(&Actor::user(&user), action, EntityType::Ticket)
                .entity(ticket.id, ticket.reference())
                .with_changes(ChangeSet::between(&old, &ticket))
                .with_meta(&meta),
        )
        .await;

    ok(TicketView::new(ticket, now))
}

#[utoipa::path(
    delete,
    path = "/api/v1/tickets/{id}",
    params(("id" = Uuid, Path, description = "Ticket ID")),
    responses((status = 200, description = "Ticket deleted")),
    tag = "Tickets"
)]
pub async fn delete_ticket(
    State(state): State<AppState>,
    CanManageTickets(user): CanManageTickets,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Done> {
    let ticket = load_ticket(&state, id).await?;
    if !create_ticket_repository(&state.db).delete(id).await? {
        return Err(ApiError::not_found("Ticket", id));
    }

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Delete, EntityType::Ticket)
                .entity(ticket.id, ticket.reference())
                .with_changes(ChangeSet::deleted(&ticket))
                .with_meta(&meta),
        )
        .await;

    ok(Done { id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use fd_core::SlaPolicy;

    #[test]
    fn test_view_carries_reference_and_sla() {
        let now = Utc::now();
        let mut ticket = Ticket::new("Printer jam", TicketPriority::Critical, TicketSource::Helpdesk);
        ticket.number = 42;
        ticket.created_at = now - Duration::hours(5);
        ticket.apply_sla(&SlaPolicy::default(), None);

        let view = TicketView::new(ticket, now);
        assert_eq!(view.reference, "TCK-000042");
        let sla = view.sla.unwrap();
        assert_eq!(sla.state, "breached");
        assert!(sla.overdue_seconds.unwrap() > 0);

        let json = serde_json::to_value(TicketView::new(
            Ticket::new("x", TicketPriority::Low, TicketSource::Portal),
            now,
        ))
        .unwrap();
        assert_eq!(json["reference"], "TCK-000000");
        assert!(json["sla"].is_null());
        assert_eq!(json["title"], "x");
    }
}
