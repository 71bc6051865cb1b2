//! Admin login and logout.

use axum::{
    extract::State,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::{info, warn};

use fd_core::auth::SessionData;
use fd_core::db::create_user_repository;
use fd_core::{verify_password, Actor, AuditAction, AuditEntry, EntityType, RequestMeta};
use fd_observability::metrics::record_login_attempt;

use crate::auth::{
    clear_session, get_session_data, issue_login_csrf, set_session_data, take_login_csrf,
};
use crate::middleware::ClientMeta;
use crate::state::AppState;
use crate::web::templates::LoginTemplate;
use crate::web::HtmlTemplate;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/login", get(login_page).post(login_submit))
        .route("/logout", post(logout))
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    /// Username or email.
    pub username: String,
    pub password: String,
    pub csrf_token: String,
}

const GENERIC_FAILURE: &str = "Invalid username or password.";

pub async fn login_page(session: Session) -> Response {
    if get_session_data(&session).await.is_some() {
        return Redirect::to("/").into_response();
    }
    render_login(&session, None).await
}

pub async fn login_submit(
    State(state): State<AppState>,
    ClientMeta(meta): ClientMeta,
    session: Session,
    Form(form): Form<LoginForm>,
) -> Response {
    if !take_login_csrf(&session, &form.csrf_token).await {
        warn!("Login form token missing or stale");
        return render_login(&session, Some("Session expired. Please try again.")).await;
    }

    let login = form.username.trim();
    let repo = create_user_repository(&state.db);
    let user = match repo.find_by_login(login).await {
        Ok(user) => user,
        Err(e) => {
            warn!(error = %e, "User lookup failed during login");
            return render_login(&session, Some("An error occurred. Please try again.")).await;
        }
    };

    let user = match user {
        Some(user) if !user.enabled => {
            warn!(username = %user.username, "Login attempt for disabled account");
            return login_failed(&state, &session, &meta, login, "This account has been disabled.")
                .await;
        }
        Some(user) => user,
        None => {
            warn!(login = %login, "Login attempt for unknown user");
            return login_failed(&state, &session, &meta, login, GENERIC_FAILURE).await;
        }
    };

    match verify_password(&form.password, &user.password_hash) {
        Ok(true) => {}
        Ok(false) => {
            warn!(username = %user.username, "Invalid password");
            return login_failed(&state, &session, &meta, login, GENERIC_FAILURE).await;
        }
        Err(e) => {
            warn!(username = %user.username, error = %e, "Password verification error");
            return render_login(&session, Some("An error occurred. Please try again.")).await;
        }
    }

    if let Err(e) = session.cycle_id().await {
        warn!(error = %e, "Failed to cycle session id");
    }
    if let Err(e) = set_session_data(&session, SessionData::new(&user)).await {
        warn!(error = %e, "Failed to store session data");
        return render_login(&session, Some("An error occurred. Please try again.")).await;
    }
    if let Err(e) = repo.update_last_login(user.id).await {
        warn!(error = %e, "Failed to record last login");
    }

    record_login_attempt(true);
    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Login, EntityType::User)
                .entity(user.id, &user.username)
                .with_meta(&meta),
        )
        .await;
    info!(username = %user.username, role = %user.role, "User logged in");

    Redirect::to("/").into_response()
}

pub async fn logout(
    State(state): State<AppState>,
    ClientMeta(meta): ClientMeta,
    session: Session,
) -> Redirect {
    if let Some(data) = get_session_data(&session).await {
        state
            .audit(
                AuditEntry::new(
                    &Actor {
                        actor_type: fd_core::ActorType::User,
                        id: Some(data.user_id),
                        name: data.username.clone(),
                    },
                    AuditAction::Logout,
                    EntityType::User,
                )
                .entity(data.user_id, &data.username)
                .with_meta(&meta),
            )
            .await;
        info!(username = %data.username, "User logged out");
    }
    if let Err(e) = clear_session(&session).await {
        warn!(error = %e, "Failed to clear session on logout");
    }
    Redirect::to("/login")
}

async fn login_failed(
    state: &AppState,
    session: &Session,
    meta: &RequestMeta,
    login: &str,
    message: &str,
) -> Response {
    record_login_attempt(false);
    state
        .audit(
            AuditEntry::new(&Actor::anonymous(login), AuditAction::LoginFailed, EntityType::User)
                .entity(login, login)
                .with_meta(meta),
        )
        .await;
    render_login(session, Some(message)).await
}

async fn render_login(session: &Session, error: Option<&str>) -> Response {
    let csrf_token = match issue_login_csrf(session).await {
        Ok(token) => token,
        Err(e) => {
            warn!(error = %e, "Failed to store login token");
            String::new()
        }
    };
    HtmlTemplate(LoginTemplate {
        error: error.map(str::to_string),
        csrf_token,
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use askama::Template;

    #[test]
    fn test_login_form_parsing() {
        let form: LoginForm = serde_json::from_value(serde_json::json!({
            "username": "ada@example.com",
            "password": "p@ss!word",
            "csrf_token": "abc"
        }))
        .unwrap();
        assert_eq!(form.username, "ada@example.com");
        assert_eq!(form.csrf_token, "abc");
    }

    #[test]
    fn test_login_template_escapes_error() {
        let rendered = LoginTemplate {
            error: Some("<script>alert(1)</script>".to_string()),
            csrf_token: "token-123".to_string(),
        }
        .render()
        .unwrap();
        assert!(rendered.contains("token-123"));
        assert!(!rendered.contains("<script>alert(1)</script>"));
    }
}
