//! Meeting rooms and room bookings.

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
    create_booking_repository, create_employee_repository, PaginatedResult, Pagination,
};
use fd_core::{
    Actor, AuditAction, AuditEntry, Booking, BookingFilter, BookingStatus, ChangeSet, EntityType,
    Room, SlaSummary,
};

use crate::auth::{AuthenticatedUser, CanManageBookings};
use crate::error::ApiError;
use crate::extract::{clean, double_option, patch, ApiJson, ApiPath, ApiQuery};
use crate::middleware::ClientMeta;
use crate::response::{created, ok, ApiResult, Created, Done};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/rooms", get(list_rooms).post(create_room))
        .route(
            "/rooms/:id",
            get(get_room).put(update_room).delete(delete_room),
        )
        .route("/bookings", get(list_bookings).post(create_booking))
        .route("/bookings/:id", get(get_booking))
        .route("/bookings/:id/cancel", post(cancel_booking))
        .route("/bookings/:id/complete", post(complete_booking))
}

/// A booking with its SLA state; the breach point is the start time.
#[derive(Debug, Clone, Serialize)]
pub struct BookingView {
    #[serde(flatten)]
    pub booking: Booking,
    pub sla: SlaSummary,
}

impl BookingView {
    pub fn new(booking: Booking, now: DateTime<Utc>) -> Self {
        let sla = booking.sla_state(now).summary(booking.start_at);
        Self { booking, sla }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateRoomRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(range(min = 1, max = 10000))]
    pub capacity: i32,
    pub location_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateRoomRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(range(min = 1, max = 10000))]
    pub capacity: Option<i32>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<Uuid>)]
    pub location_id: Option<Option<Uuid>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListBookingsQuery {
    pub room_id: Option<Uuid>,
    pub organizer_id: Option<Uuid>,
    pub status: Option<BookingStatus>,
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateBookingRequest {
    pub room_id: Uuid,
    /// Employee the booking is for.
    pub organizer_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

async fn load_room(state: &AppState, id: Uuid) -> Result<Room, ApiError> {
    create_booking_repository(&state.db)
        .get_room(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Room", id))
}

async fn load_booking(state: &AppState, id: Uuid) -> Result<Booking, ApiError> {
    create_booking_repository(&state.db)
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Booking", id))
}

pub async fn list_rooms(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> ApiResult<Vec<Room>> {
    ok(create_booking_repository(&state.db).list_rooms().await?)
}

pub async fn get_room(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Room> {
    ok(load_room(&state, id).await?)
}

pub async fn create_room(
    State(state): State<AppState>,
    CanManageBookings(user): CanManageBookings,
    ClientMeta(meta): ClientMeta,
    ApiJson(request): ApiJson<CreateRoomRequest>,
) -> Created<Room> {
    request.validate()?;
    let mut room = Room::new(request.name.trim(), request.capacity);
    room.location_id = request.location_id;
    let room = create_booking_repository(&state.db)
        .create_room(&room)
        .await?;

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Create, EntityType::Room)
                .entity(room.id, &room.name)
                .with_changes(ChangeSet::created(&room))
                .with_meta(&meta),
        )
        .await;

    created(room)
}

pub async fn update_room(
    State(state): State<AppState>,
    CanManageBookings(user): CanManageBookings,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<UpdateRoomRequest>,
) -> ApiResult<Room> {
    request.validate()?;
    let old = load_room(&state, id).await?;
    let mut room = old.clone();
    if let Some(name) = clean(request.name) {
        room.name = name;
    }
    if let Some(capacity) = request.capacity {
        room.capacity = capacity;
    }
    patch(&mut room.location_id, request.location_id);
    room.updated_at = Utc::now();
    let room = create_booking_repository(&state.db).save_room(&room).await?;

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Update, EntityType::Room)
                .entity(room.id, &room.name)
                .with_changes(ChangeSet::between(&old, &room))
                .with_meta(&meta),
        )
        .await;

    ok(room)
}

pub async fn delete_room(
    State(state): State<AppState>,
    CanManageBookings(user): CanManageBookings,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Done> {
    let room = load_room(&state, id).await?;
    create_booking_repository(&state.db).delete_room(id).await?;

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Delete, EntityType::Room)
                .entity(room.id, &room.name)
                .with_changes(ChangeSet::deleted(&room))
                .with_meta(&meta),
        )
        .await;

    ok(Done { id })
}

#[utoipa::path(
    get,
    path = "/api/v1/bookings",
    params(
        ("room_id" = Option<Uuid>, Query, description = "Room"),
        ("status" = Option<String>, Query, description = "Booking status"),
        ("from" = Option<String>, Query, description = "Bookings ending after this instant (RFC 3339)"),
        ("until" = Option<String>, Query, description = "Bookings starting before this instant (RFC 3339)")
    ),
    responses((status = 200, description = "Paginated bookings with SLA state")),
    tag = "Bookings"
)]
pub async fn list_bookings(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiQuery(query): ApiQuery<ListBookingsQuery>,
) -> ApiResult<PaginatedResult<BookingView>> {
    let now = Utc::now();
    let filter = BookingFilter {
        room_id: query.room_id,
        organizer_id: query.organizer_id,
        status: query.status,
        from: query.from,
        until: query.until,
    };
    let pagination = Pagination::from_query(query.page, query.per_page);
    let page = create_booking_repository(&state.db)
        .list(&filter, &pagination)
        .await?;
    ok(page.map(|b| BookingView::new(b, now)))
}

pub async fn get_booking(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<BookingView> {
    ok(BookingView::new(load_booking(&state, id).await?, Utc::now()))
}

/// Books a room. Rejects inverted ranges and any overlap with a pending or
/// confirmed booking of the same room.
#[utoipa::path(
    post,
    path = "/api/v1/bookings",
    request_body = CreateBookingRequest,
    responses(
        (status = 201, description = "Booking confirmed"),
        (status = 409, description = "Room already booked for that time", body = crate::error::ErrorResponse),
        (status = 422, description = "End is not after start", body = crate::error::ErrorResponse)
    ),
    tag = "Bookings"
)]
pub async fn create_booking(
    State(state): State<AppState>,
    CanManageBookings(user): CanManageBookings,
    ClientMeta(meta): ClientMeta,
    ApiJson(request): ApiJson<CreateBookingRequest>,
) -> Created<BookingView> {
    request.validate()?;
    if request.end_at <= request.start_at {
        return Err(ApiError::validation_field(
            "end_at",
            "range",
            "Booking must end after it starts",
        ));
    }

    let room = load_room(&state, request.room_id).await?;
    let organizer = create_employee_repository(&state.db)
        .get(request.organizer_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Employee", request.organizer_id))?;

    let repo = create_booking_repository(&state.db);
    let clashes = repo
        .find_overlapping(room.id, request.start_at, request.end_at, None)
        .await?;
    if let Some(clash) = clashes.first() {
        return Err(ApiError::Conflict(format!(
            "{} is already booked from {} to {} ({})",
            room.name,
            clash.start_at.format("%Y-%m-%d %H:%M"),
            clash.end_at.format("%H:%M"),
            clash.title
        )));
    }

    let booking = Booking::new(
        room.id,
        organizer.id,
        request.title.trim(),
        request.start_at,
        request.end_at,
    );
    let booking = repo.create(&booking).await?;
    info!(booking_id = %booking.id, room = %room.name, "Room booked");

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Create, EntityType::Booking)
                .entity(booking.id, &booking.title)
                .with_changes(ChangeSet::created(&booking))
                .with_meta(&meta),
        )
        .await;

    created(BookingView::new(booking, Utc::now()))
}

async fn finish_booking(
    state: &AppState,
    user: &fd_core::User,
    meta: &fd_core::RequestMeta,
    id: Uuid,
    action: AuditAction,
) -> Result<BookingView, ApiError> {
    let old = load_booking(state, id).await?;
    let now = Utc::now();
    let mut booking = old.clone();
    let outcome = match action {
        AuditAction::Cancel => booking.cancel(now),
        _ => booking.complete(now),
    };
    outcome.map_err(ApiError::UnprocessableEntity)?;

    let booking = create_booking_repository(&state.db).save(&booking).await?;
    state
        .audit(
            AuditEntry::new(&Actor::user(user), action, EntityType::Booking)
                .entity(booking.id, &booking.title)
                .with_changes(ChangeSet::between(&old, &booking))
                .with_meta(meta),
        )
        .await;

    Ok(BookingView::new(booking, now))
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    CanManageBookings(user): CanManageBookings,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<BookingView> {
    ok(finish_booking(&state, &user, &meta, id, AuditAction::Cancel).await?)
}

pub async fn complete_booking(
    State(state): State<AppState>,
    CanManageBookings(user): CanManageBookings,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<BookingView> {
    ok(finish_booking(&state, &user, &meta, id, AuditAction::Complete).await?)
}
