//! Shared test helpers for the fd-api crate.
//!
//! Every pool is a fresh in-memory SQLite database with the full schema, so
//! tests can run in parallel.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    middleware, Router,
};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use fd_core::db::{
    create_employee_repository, create_pool_with_options, create_user_repository, run_migrations,
    DbPool, PoolOptions,
};
use fd_core::Employee;

use crate::auth::test_helpers::{inject_test_employee, inject_test_user, TestEmployee, TestUser};
use crate::server::{ApiServer, ApiServerConfig};
use crate::state::AppState;

pub async fn setup_test_pool() -> DbPool {
    let url = format!(
        "sqlite:file:fd_api_test_{}?mode=memory&cache=shared",
        Uuid::new_v4()
    );
    let pool = create_pool_with_options(&url, PoolOptions::single_connection())
        .await
        .expect("Failed to create SQLite pool");
    run_migrations(&pool).await.expect("Failed to run migrations");
    pool
}

pub async fn create_test_state() -> AppState {
    AppState::new(setup_test_pool().await)
}

fn test_config() -> ApiServerConfig {
    ApiServerConfig {
        enable_swagger: false,
        session_secure: false,
        session_secret: Some("fleetdesk test secret".to_string()),
        ..Default::default()
    }
}

/// Full router with no principal injected.
pub fn anonymous_app(state: &AppState) -> Router {
    ApiServer::new(state.clone(), test_config()).router()
}

/// Full router acting as `user`. The user is stored first so foreign keys
/// to `users` hold.
pub async fn app_as(state: &AppState, user: &TestUser) -> Router {
    create_user_repository(&state.db)
        .create(&user.0)
        .await
        .expect("Failed to store test user");
    anonymous_app(state).layer(middleware::from_fn_with_state(user.clone(), inject_test_user))
}

/// Full router acting as a stored, active employee signed in to the portal.
pub async fn app_as_employee(state: &AppState, employee: &Employee) -> Router {
    anonymous_app(state).layer(middleware::from_fn_with_state(
        TestEmployee(employee.clone()),
        inject_test_employee,
    ))
}

pub async fn create_test_employee(state: &AppState, email: &str) -> Employee {
    let number = format!("E-{}", &Uuid::new_v4().simple().to_string()[..8]);
    let employee = Employee::new(number, "Ada", "Lovelace", email);
    create_employee_repository(&state.db)
        .create(&employee)
        .await
        .expect("Failed to store test employee")
}

/// Sends a request and decodes the body as JSON (`Null` when it is not).
pub async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

/// Sends a request and returns the status, headers and body text.
pub async fn send_raw(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, String::from_utf8_lossy(&bytes).into_owned())
}
