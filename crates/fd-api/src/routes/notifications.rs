//! In-app notifications for the signed-in admin user.

use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fd_core::db::create_notification_repository;
use fd_core::{Notification, RecipientType};

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::extract::{ApiPath, ApiQuery};
use crate::response::{ok, ApiResult, Done};
use crate::state::AppState;

const LIST_LIMIT: i64 = 100;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_notifications))
        .route("/read-all", post(mark_all_read))
        .route("/:id/read", post(mark_read))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListNotificationsQuery {
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Serialize)]
pub struct NotificationList {
    pub unread: i64,
    pub items: Vec<Notification>,
}

#[derive(Debug, Serialize)]
pub struct MarkedRead {
    pub updated: u64,
}

#[utoipa::path(
    get,
    path = "/api/v1/notifications",
    params(("unread_only" = Option<bool>, Query, description = "Only unread")),
    responses((status = 200, description = "Newest notifications and unread count")),
    tag = "Notifications"
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiQuery(query): ApiQuery<ListNotificationsQuery>,
) -> ApiResult<NotificationList> {
    let repo = create_notification_repository(&state.db);
    let items = repo
        .list_for(RecipientType::User, user.id, query.unread_only, LIST_LIMIT)
        .await?;
    let unread = repo.count_unread(RecipientType::User, user.id).await?;
    ok(NotificationList { unread, items })
}

/// Marks one of the caller's notifications read. Someone else's
/// notification is reported as not found.
pub async fn mark_read(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Done> {
    let marked = create_notification_repository(&state.db)
        .mark_read(id, RecipientType::User, user.id)
        .await?;
    if !marked {
        return Err(ApiError::not_found("Notification", id));
    }
    ok(Done { id })
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> ApiResult<MarkedRead> {
    let updated = create_notification_repository(&state.db)
        .mark_all_read(RecipientType::User, user.id)
        .await?;
    ok(MarkedRead { updated })
}
