//! Admin account management and per-user permission grants.

use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use fd_core::db::create_user_repository;
use fd_core::{
    hash_new_password, Actor, AuditAction, AuditEntry, ChangeSet, EntityType, Permission,
    RequestMeta, Role, User, UserFilter,
};

use crate::auth::{AuthenticatedUser, CanManagePermissions, CanManageUsers};
use crate::error::ApiError;
use crate::extract::{clean, double_option, patch, ApiJson, ApiPath, ApiQuery};
use crate::middleware::ClientMeta;
use crate::response::{created, ok, ApiResult, Created, Done};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/me", get(current_user))
        .route("/:id", get(get_user).put(update_user).delete(delete_user))
        .route("/:id/password", post(reset_password))
        .route(
            "/:id/permissions/:permission",
            post(grant_permission).delete(revoke_permission),
        )
}

/// A user with the union of role defaults and grants.
#[derive(Debug, Serialize)]
pub struct UserView {
    #[serde(flatten)]
    pub user: User,
    pub effective_permissions: BTreeSet<Permission>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        let effective_permissions = user.effective_permissions();
        Self {
            user,
            effective_permissions,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListUsersQuery {
    pub role: Option<Role>,
    pub enabled: Option<bool>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateUserRequest {
    #[validate(length(min = 3, max = 50))]
    pub username: String,
    #[validate(email)]
    pub email: String,
    pub password: String,
    #[schema(value_type = Option<String>, example = "technician")]
    pub role: Option<Role>,
    #[validate(length(max = 100))]
    pub display_name: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateUserRequest {
    #[validate(email)]
    pub email: Option<String>,
    #[schema(value_type = Option<String>)]
    pub role: Option<Role>,
    pub enabled: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub display_name: Option<Option<String>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResetPasswordRequest {
    pub password: String,
}

async fn load_user(state: &AppState, id: Uuid) -> Result<User, ApiError> {
    create_user_repository(&state.db)
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User", id))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/me",
    responses(
        (status = 200, description = "The signed-in user with effective permissions"),
        (status = 401, description = "Not signed in", body = crate::error::ErrorResponse)
    ),
    tag = "Users"
)]
pub async fn current_user(AuthenticatedUser(user): AuthenticatedUser) -> ApiResult<UserView> {
    ok(user.into())
}

#[utoipa::path(
    get,
    path = "/api/v1/users",
    params(
        ("role" = Option<String>, Query, description = "admin, technician or viewer"),
        ("enabled" = Option<bool>, Query, description = "Account state"),
        ("search" = Option<String>, Query, description = "Username, email or display name")
    ),
    responses((status = 200, description = "Admin accounts")),
    tag = "Users"
)]
pub async fn list_users(
    State(state): State<AppState>,
    CanManageUsers(_user): CanManageUsers,
    ApiQuery(query): ApiQuery<ListUsersQuery>,
) -> ApiResult<Vec<UserView>> {
    let filter = UserFilter {
        role: query.role,
        enabled: query.enabled,
        search: clean(query.search),
    };
    let users = create_user_repository(&state.db).list(&filter).await?;
    ok(users.into_iter().map(UserView::from).collect())
}

pub async fn get_user(
    State(state): State<AppState>,
    CanManageUsers(_user): CanManageUsers,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<UserView> {
    ok(load_user(&state, id).await?.into())
}

#[utoipa::path(
    post,
    path = "/api/v1/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created"),
        (status = 409, description = "Username or email taken", body = crate::error::ErrorResponse),
        (status = 422, description = "Weak password or invalid fields", body = crate::error::ErrorResponse)
    ),
    tag = "Users"
)]
pub async fn create_user(
    State(state): State<AppState>,
    CanManageUsers(actor): CanManageUsers,
    ClientMeta(meta): ClientMeta,
    ApiJson(request): ApiJson<CreateUserRequest>,
) -> Created<UserView> {
    request.validate()?;
    let repo = create_user_repository(&state.db);
    let username = request.username.trim().to_lowercase();
    if repo.get_by_username(&username).await?.is_some() {
        return Err(ApiError::Conflict(format!(
            "Username '{}' is already taken",
            username
        )));
    }

    let hash = hash_new_password(&request.password)?;
    let mut user = User::new(
        username,
        request.email.trim(),
        hash,
        request.role.unwrap_or_default(),
    );
    user.display_name = clean(request.display_name);
    let user = repo.create(&user).await?;
    info!(user_id = %user.id, role = %user.role, "User created");

    state
        .audit(
            AuditEntry::new(&Actor::user(&actor), AuditAction::Create, EntityType::User)
                .entity(user.id, &user.username)
                .with_changes(ChangeSet::created(&user))
                .with_meta(&meta),
        )
        .await;

    created(user.into())
}

/// Updates profile, role or enabled state. Users cannot disable themselves
/// or drop their own admin role.
#[utoipa::path(
    put,
    path = "/api/v1/users/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated"),
        (status = 422, description = "Change would lock the caller out", body = crate::error::ErrorResponse)
    ),
    tag = "Users"
)]
pub async fn update_user(
    State(state): State<AppState>,
    CanManageUsers(actor): CanManageUsers,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<UpdateUserRequest>,
) -> ApiResult<UserView> {
    request.validate()?;
    let old = load_user(&state, id).await?;
    let mut user = old.clone();

    if let Some(email) = clean(request.email) {
        user.email = email;
    }
    if let Some(role) = request.role {
        user.role = role;
    }
    if let Some(enabled) = request.enabled {
        user.enabled = enabled;
    }
    patch(&mut user.display_name, request.display_name.map(clean));

    if user.id == actor.id && (!user.enabled || (old.is_admin() && !user.is_admin())) {
        return Err(ApiError::UnprocessableEntity(
            "You cannot disable or demote your own account".to_string(),
        ));
    }

    user.updated_at = Utc::now();
    let user = create_user_repository(&state.db).save(&user).await?;

    state
        .audit(
            AuditEntry::new(&Actor::user(&actor), AuditAction::Update, EntityType::User)
                .entity(user.id, &user.username)
                .with_changes(ChangeSet::between(&old, &user))
                .with_meta(&meta),
        )
        .await;

    ok(user.into())
}

pub async fn delete_user(
    State(state): State<AppState>,
    CanManageUsers(actor): CanManageUsers,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Done> {
    if id == actor.id {
        return Err(ApiError::UnprocessableEntity(
            "You cannot delete your own account".to_string(),
        ));
    }
    let user = load_user(&state, id).await?;
    create_user_repository(&state.db).delete(id).await?;
    info!(user_id = %id, "User deleted");

    state
        .audit(
            AuditEntry::new(&Actor::user(&actor), AuditAction::Delete, EntityType::User)
                .entity(user.id, &user.username)
                .with_changes(ChangeSet::deleted(&user))
                .with_meta(&meta),
        )
        .await;

    ok(Done { id })
}

#[utoipa::path(
    post,
    path = "/api/v1/users/{id}/password",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password replaced"),
        (status = 422, description = "Password too weak", body = crate::error::ErrorResponse)
    ),
    tag = "Users"
)]
pub async fn reset_password(
    State(state): State<AppState>,
    CanManageUsers(actor): CanManageUsers,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<ResetPasswordRequest>,
) -> ApiResult<Done> {
    let user = load_user(&state, id).await?;
    let hash = hash_new_password(&request.password)?;
    create_user_repository(&state.db)
        .update_password(user.id, &hash)
        .await?;

    // The hash itself never reaches the audit log.
    state
        .audit(
            AuditEntry::new(&Actor::user(&actor), AuditAction::PasswordReset, EntityType::User)
                .entity(user.id, &user.username)
                .with_meta(&meta),
        )
        .await;

    ok(Done { id })
}

async fn change_permission(
    state: &AppState,
    actor: &User,
    meta: &RequestMeta,
    id: Uuid,
    permission: Permission,
    grant: bool,
) -> Result<UserView, ApiError> {
    let user = load_user(state, id).await?;
    let repo = create_user_repository(&state.db);
    let changed = if grant {
        repo.grant_permission(user.id, permission).await?
    } else {
        repo.revoke_permission(user.id, permission).await?
    };

    if changed {
        let action = if grant {
            AuditAction::GrantPermission
        } else {
            AuditAction::RevokePermission
        };
        state
            .audit(
                AuditEntry::new(&Actor::user(actor), action, EntityType::User)
                    .entity(user.id, &user.username)
                    .with_changes(ChangeSet::detail(serde_json::json!({
                        "permission": permission
                    })))
                    .with_meta(meta),
            )
            .await;
        info!(user_id = %user.id, %permission, grant, "Permission changed");
    }

    Ok(load_user(state, id).await?.into())
}

fn parse_permission(raw: &str) -> Result<Permission, ApiError> {
    raw.parse::<Permission>().map_err(|_| {
        ApiError::validation_field(
            "permission",
            "unknown_permission",
            &format!("Unknown permission '{}'", raw),
        )
    })
}

/// Grants a permission on top of the user's role. Granting one already held
/// is a no-op.
#[utoipa::path(
    post,
    path = "/api/v1/users/{id}/permissions/{permission}",
    params(
        ("id" = Uuid, Path, description = "User ID"),
        ("permission" = String, Path, description = "Permission name, e.g. manage_catalog")
    ),
    responses(
        (status = 200, description = "User with updated permissions"),
        (status = 403, description = "Caller lacks manage_permissions", body = crate::error::ErrorResponse)
    ),
    tag = "Users"
)]
pub async fn grant_permission(
    State(state): State<AppState>,
    CanManagePermissions(actor): CanManagePermissions,
    ClientMeta(meta): ClientMeta,
    ApiPath((id, permission)): ApiPath<(Uuid, String)>,
) -> ApiResult<UserView> {
    let permission = parse_permission(&permission)?;
    ok(change_permission(&state, &actor, &meta, id, permission, true).await?)
}

pub async fn revoke_permission(
    State(state): State<AppState>,
    CanManagePermissions(actor): CanManagePermissions,
    ClientMeta(meta): ClientMeta,
    ApiPath((id, permission)): ApiPath<(Uuid, String)>,
) -> ApiResult<UserView> {
    let permission = parse_permission(&permission)?;
    ok(change_permission(&state, &actor, &meta, id, permission, false).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_view_lists_effective_permissions() {
        let mut user = User::new("v", "v@example.com", "hash", Role::Viewer);
        user.granted_permissions.insert(Permission::ManageCatalog);
        let json = serde_json::to_value(UserView::from(user)).unwrap();
        assert_eq!(json["effective_permissions"], serde_json::json!(["manage_catalog"]));
        assert!(json.get("password_hash").is_none());
    }

    #[test]
    fn test_unknown_permission_is_validation_error() {
        assert!(parse_permission("manage_assets").is_ok());
        assert_eq!(
            parse_permission("launch_missiles").unwrap_err().error_code(),
            "VALIDATION_ERROR"
        );
    }
}
