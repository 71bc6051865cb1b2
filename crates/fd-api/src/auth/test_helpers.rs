//! Test principals injected through request extensions.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use fd_core::auth::Role;
use fd_core::{Employee, User};

#[derive(Clone)]
pub struct TestUser(pub User);

impl TestUser {
    pub fn with_role(role: Role) -> Self {
        let name = format!("test_{}", role);
        let mut user = User::new(&name, format!("{}@test.local", name), "not_used", role);
        user.display_name = Some(format!("Test {}", role));
        TestUser(user)
    }

    pub fn admin() -> Self {
        Self::with_role(Role::Admin)
    }

    pub fn technician() -> Self {
        Self::with_role(Role::Technician)
    }

    pub fn viewer() -> Self {
        Self::with_role(Role::Viewer)
    }
}

#[derive(Clone)]
pub struct TestEmployee(pub Employee);

/// Use with `middleware::from_fn_with_state(TestUser::admin(), inject_test_user)`.
pub async fn inject_test_user(
    State(test_user): State<TestUser>,
    mut request: Request,
    next: Next,
) -> Response {
    request.extensions_mut().insert(test_user);
    next.run(request).await
}

pub async fn inject_test_employee(
    State(test_employee): State<TestEmployee>,
    mut request: Request,
    next: Next,
) -> Response {
    request.extensions_mut().insert(test_employee);
    next.run(request).await
}
