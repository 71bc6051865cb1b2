//! Session authentication for admin users and portal employees.
//!
//! Both kinds of principal live in the same signed server-side session under
//! different keys. The session only stores identifiers; extractors re-load
//! the account on every request so disabling it takes effect immediately.

pub mod csrf;
pub mod extractors;
pub mod portal;

#[cfg(test)]
pub mod test_helpers;

pub use csrf::{generate_csrf_token, validate_csrf_token, CsrfToken};
pub use extractors::*;
pub use portal::CurrentEmployee;

use fd_core::auth::{EmployeeSessionData, SessionData};
use tower_sessions::Session;

/// Session key for the admin user.
pub const SESSION_USER_KEY: &str = "user";

/// Session key for the portal employee.
pub const SESSION_EMPLOYEE_KEY: &str = "employee";

/// Session key for the CSRF token issued with a login form.
pub const LOGIN_CSRF_KEY: &str = "login_csrf";

pub async fn get_session_data(session: &Session) -> Option<SessionData> {
    session
        .get::<SessionData>(SESSION_USER_KEY)
        .await
        .ok()
        .flatten()
}

pub async fn set_session_data(
    session: &Session,
    data: SessionData,
) -> Result<(), tower_sessions::session::Error> {
    session.insert(SESSION_USER_KEY, data).await
}

pub async fn get_employee_session(session: &Session) -> Option<EmployeeSessionData> {
    session
        .get::<EmployeeSessionData>(SESSION_EMPLOYEE_KEY)
        .await
        .ok()
        .flatten()
}

pub async fn set_employee_session(
    session: &Session,
    data: EmployeeSessionData,
) -> Result<(), tower_sessions::session::Error> {
    session.insert(SESSION_EMPLOYEE_KEY, data).await
}

/// Admin logout.
pub async fn clear_session(session: &Session) -> Result<(), tower_sessions::session::Error> {
    session.flush().await
}

/// Portal logout. Drops only the employee, so an admin signed in through the
/// same browser stays signed in.
pub async fn clear_employee_session(session: &Session) -> Result<(), tower_sessions::session::Error> {
    session.remove_value(SESSION_EMPLOYEE_KEY).await.map(|_| ())
}

/// Issues a fresh token for a login form and binds it to the pre-login
/// session.
pub async fn issue_login_csrf(session: &Session) -> Result<String, tower_sessions::session::Error> {
    let token = generate_csrf_token();
    session.insert(LOGIN_CSRF_KEY, token.clone()).await?;
    Ok(token)
}

/// Checks and consumes the login form token.
pub async fn take_login_csrf(session: &Session, submitted: &str) -> bool {
    let expected = session
        .remove::<String>(LOGIN_CSRF_KEY)
        .await
        .ok()
        .flatten();
    match expected {
        Some(expected) => validate_csrf_token(submitted, &expected),
        None => false,
    }
}
