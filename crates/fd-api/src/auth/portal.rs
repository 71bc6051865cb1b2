//! Employee portal principal.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tower_sessions::Session;

use fd_core::db::create_employee_repository;
use fd_core::Employee;

use crate::error::ApiError;
use crate::state::AppState;

use super::get_employee_session;

/// The employee signed in to the portal.
///
/// The identity comes only from the signed session; the employee is
/// re-loaded and must still be active.
pub struct CurrentEmployee(pub Employee);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentEmployee
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        #[cfg(test)]
        {
            if let Some(test_employee) = parts.extensions.get::<super::test_helpers::TestEmployee>() {
                return Ok(CurrentEmployee(test_employee.0.clone()));
            }
        }

        let app_state = AppState::from_ref(state);
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError::Unauthorized("Portal login required".to_string()))?;
        let data = get_employee_session(&session)
            .await
            .ok_or_else(|| ApiError::Unauthorized("Portal login required".to_string()))?;

        let employee = create_employee_repository(&app_state.db)
            .get(data.employee_id)
            .await?
            .ok_or(ApiError::SessionExpired)?;
        if !employee.active {
            return Err(ApiError::AccountDisabled);
        }
        Ok(CurrentEmployee(employee))
    }
}
