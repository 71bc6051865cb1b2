//! Success envelopes for JSON handlers.

use axum::{http::StatusCode, Json};
use fd_core::ActionResult;

use crate::error::ApiError;

/// Result of a JSON handler: `{"success": true, "data": ...}` or an
/// [`ApiError`] rendered as the failure envelope.
pub type ApiResult<T> = Result<Json<ActionResult<T>>, ApiError>;

/// Same as [`ApiResult`] with `201 Created`.
pub type Created<T> = Result<(StatusCode, Json<ActionResult<T>>), ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ActionResult::ok(data)))
}

pub fn created<T>(data: T) -> Created<T> {
    Ok((StatusCode::CREATED, Json(ActionResult::ok(data))))
}

/// Body for operations that return nothing but an acknowledgement.
#[derive(Debug, serde::Serialize)]
pub struct Done {
    pub id: uuid::Uuid,
}
