//! Axum extractors for admin authentication and permission checks.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tower_sessions::Session;
use tracing::warn;

use fd_core::auth::Permission;
use fd_core::db::create_user_repository;
use fd_core::User;

use crate::error::ApiError;
use crate::state::AppState;

use super::get_session_data;

/// The signed-in admin user, re-loaded from the database.
///
/// Rejects with 401 when there is no valid session and 403 when the account
/// has been disabled since login.
pub struct AuthenticatedUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        #[cfg(test)]
        {
            if let Some(test_user) = parts.extensions.get::<super::test_helpers::TestUser>() {
                return Ok(AuthenticatedUser(test_user.0.clone()));
            }
        }

        let app_state = AppState::from_ref(state);

        if let Ok(session) = Session::from_request_parts(parts, state).await {
            if let Some(session_data) = get_session_data(&session).await {
                let user_repo = create_user_repository(&app_state.db);
                if let Some(user) = user_repo.get(session_data.user_id).await? {
                    if !user.enabled {
                        return Err(ApiError::AccountDisabled);
                    }
                    return Ok(AuthenticatedUser(user));
                }
            }
        }

        Err(ApiError::Unauthorized("Authentication required".to_string()))
    }
}

/// The signed-in admin user, if any. Never rejects.
pub struct OptionalUser(pub Option<User>);

#[async_trait]
impl<S> FromRequestParts<S> for OptionalUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match AuthenticatedUser::from_request_parts(parts, state).await {
            Ok(AuthenticatedUser(user)) => Ok(OptionalUser(Some(user))),
            Err(_) => Ok(OptionalUser(None)),
        }
    }
}

/// Fails with 403 unless `user` holds `permission` by role or grant.
pub fn require_permission(user: &User, permission: Permission) -> Result<(), ApiError> {
    if user.has_permission(permission) {
        return Ok(());
    }
    warn!(
        user_id = %user.id,
        role = %user.role,
        permission = %permission,
        "Permission denied"
    );
    Err(ApiError::Forbidden(format!(
        "Missing permission: {}",
        permission
    )))
}

/// Generates an extractor that requires one permission.
macro_rules! define_permission_extractor {
    ($name:ident, $permission:expr, $doc:literal) => {
        #[doc = $doc]
        pub struct $name(pub User);

        #[async_trait]
        impl<S> FromRequestParts<S> for $name
        where
            AppState: FromRef<S>,
            S: Send + Sync,
        {
            type Rejection = ApiError;

            async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
                let AuthenticatedUser(user) = AuthenticatedUser::from_request_parts(parts, state).await?;
                require_permission(&user, $permission)?;
                Ok($name(user))
            }
        }
    };
}

define_permission_extractor!(
    CanManageAssets,
    Permission::ManageAssets,
    "Requires `manage_assets`."
);
define_permission_extractor!(
    CanManageEmployees,
    Permission::ManageEmployees,
    "Requires `manage_employees`."
);
define_permission_extractor!(
    CanManageOrganization,
    Permission::ManageOrganization,
    "Requires `manage_organization`."
);
define_permission_extractor!(
    CanManageTickets,
    Permission::ManageTickets,
    "Requires `manage_tickets`."
);
define_permission_extractor!(
    CanManageNetwork,
    Permission::ManageNetwork,
    "Requires `manage_network`."
);
define_permission_extractor!(
    CanManageKnowledge,
    Permission::ManageKnowledge,
    "Requires `manage_knowledge`."
);
define_permission_extractor!(
    CanManageBookings,
    Permission::ManageBookings,
    "Requires `manage_bookings`."
);
define_permission_extractor!(
    CanManageVisitors,
    Permission::ManageVisitors,
    "Requires `manage_visitors`."
);
define_permission_extractor!(
    CanManageCustody,
    Permission::ManageCustody,
    "Requires `manage_custody`."
);
define_permission_extractor!(
    CanManageUsers,
    Permission::ManageUsers,
    "Requires `manage_users`."
);
define_permission_extractor!(
    CanManagePermissions,
    Permission::ManagePermissions,
    "Requires `manage_permissions`."
);
define_permission_extractor!(
    CanViewAudit,
    Permission::ViewAudit,
    "Requires `view_audit`."
);
define_permission_extractor!(
    CanRunMaintenance,
    Permission::RunMaintenance,
    "Requires `run_maintenance`."
);
define_permission_extractor!(
    CanManageBackups,
    Permission::ManageBackups,
    "Requires `manage_backups`."
);
define_permission_extractor!(
    CanManageCatalog,
    Permission::ManageCatalog,
    "Requires `manage_catalog`."
);

#[cfg(test)]
mod tests {
    use super::*;
    use fd_core::auth::Role;

    #[test]
    fn test_require_permission() {
        let tech = User::new("t", "t@example.com", "x", Role::Technician);
        assert!(require_permission(&tech, Permission::ManageAssets).is_ok());
        let err = require_permission(&tech, Permission::ManageUsers).unwrap_err();
        assert_eq!(err.error_code(), "FORBIDDEN");

        let mut viewer = User::new("v", "v@example.com", "x", Role::Viewer);
        assert!(require_permission(&viewer, Permission::ManageKnowledge).is_err());
        viewer.granted_permissions.insert(Permission::ManageKnowledge);
        assert!(require_permission(&viewer, Permission::ManageKnowledge).is_ok());
    }
}
