//! HTTP routes.

pub mod admin;
pub mod agent;
pub mod assets;
pub mod audit;
pub mod auth;
pub mod bookings;
pub mod catalog;
pub mod custody;
pub mod employees;
pub mod health;
pub mod ipam;
pub mod knowledge;
pub mod maintenance;
pub mod metrics;
pub mod notifications;
pub mod organization;
pub mod portal;
pub mod stats;
pub mod tickets;
pub mod users;
pub mod visitors;

use axum::Router;

use crate::state::AppState;

/// JSON API, agent, auth, health and metrics routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes())
        .merge(agent::routes())
        .merge(health::routes())
        .merge(metrics::routes())
        .merge(auth::routes())
        .nest("/portal", portal::routes())
        .with_state(state)
}

/// Routes under `/api/v1`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/assets", assets::routes())
        .nest("/employees", employees::routes())
        .merge(organization::routes())
        .nest("/tickets", tickets::routes())
        .nest("/catalog", catalog::routes())
        .nest("/knowledge", knowledge::routes())
        .merge(bookings::routes())
        .nest("/subnets", ipam::routes())
        .nest("/visits", visitors::routes())
        .nest("/custody", custody::routes())
        .nest("/notifications", notifications::routes())
        .nest("/users", users::routes())
        .nest("/audit", audit::routes())
        .nest("/maintenance", maintenance::routes())
        .nest("/admin", admin::routes())
        .nest("/stats", stats::routes())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use serde_json::{json, Value};
    use uuid::Uuid;

    use fd_core::db::{
        create_employee_repository, create_user_repository, DbError, PaginatedResult, Pagination,
    };
    use fd_core::{hash_password, AuditEntry, AuditFilter, AuditRecorder, Role, User};

    use crate::agent_signature::{sign, SIGNATURE_HEADER};
    use crate::auth::test_helpers::TestUser;
    use crate::test_helpers::*;

    fn mutating_endpoints() -> Vec<(Method, String)> {
        let id = Uuid::new_v4();
        let mut endpoints = Vec::new();
        let mut add = |method: Method, path: String| endpoints.push((method, path));

        add(Method::POST, "/api/v1/assets".into());
        add(Method::PUT, format!("/api/v1/assets/{id}"));
        add(Method::DELETE, format!("/api/v1/assets/{id}"));
        add(Method::POST, format!("/api/v1/assets/{id}/assign"));
        add(Method::POST, format!("/api/v1/assets/{id}/unassign"));
        add(Method::POST, format!("/api/v1/assets/{id}/commands"));
        add(Method::POST, "/api/v1/employees".into());
        add(Method::PUT, format!("/api/v1/employees/{id}"));
        add(Method::DELETE, format!("/api/v1/employees/{id}"));
        add(Method::POST, format!("/api/v1/employees/{id}/deactivate"));
        add(Method::POST, "/api/v1/departments".into());
        add(Method::PUT, format!("/api/v1/departments/{id}"));
        add(Method::DELETE, format!("/api/v1/departments/{id}"));
        add(Method::POST, "/api/v1/locations".into());
        add(Method::PUT, format!("/api/v1/locations/{id}"));
        add(Method::DELETE, format!("/api/v1/locations/{id}"));
        add(Method::POST, "/api/v1/tickets".into());
        add(Method::PUT, format!("/api/v1/tickets/{id}"));
        add(Method::DELETE, format!("/api/v1/tickets/{id}"));
        add(Method::POST, format!("/api/v1/tickets/{id}/status"));
        add(Method::POST, "/api/v1/catalog/categories".into());
        add(Method::PUT, format!("/api/v1/catalog/categories/{id}"));
        add(Method::DELETE, format!("/api/v1/catalog/categories/{id}"));
        add(Method::POST, "/api/v1/catalog/items".into());
        add(Method::PUT, format!("/api/v1/catalog/items/{id}"));
        add(Method::DELETE, format!("/api/v1/catalog/items/{id}"));
        add(Method::POST, "/api/v1/knowledge/categories".into());
        add(Method::PUT, format!("/api/v1/knowledge/categories/{id}"));
        add(Method::DELETE, format!("/api/v1/knowledge/categories/{id}"));
        add(Method::POST, "/api/v1/knowledge/articles".into());
        add(Method::PUT, format!("/api/v1/knowledge/articles/{id}"));
        add(Method::DELETE, format!("/api/v1/knowledge/articles/{id}"));
        add(Method::POST, format!("/api/v1/knowledge/articles/{id}/publish"));
        add(Method::POST, format!("/api/v1/knowledge/articles/{id}/unpublish"));
        add(Method::POST, "/api/v1/rooms".into());
        add(Method::PUT, format!("/api/v1/rooms/{id}"));
        add(Method::DELETE, format!("/api/v1/rooms/{id}"));
        add(Method::POST, "/api/v1/bookings".into());
        add(Method::POST, format!("/api/v1/bookings/{id}/cancel"));
        add(Method::POST, format!("/api/v1/bookings/{id}/complete"));
        add(Method::POST, "/api/v1/subnets".into());
        add(Method::PUT, format!("/api/v1/subnets/{id}"));
        add(Method::DELETE, format!("/api/v1/subnets/{id}"));
        add(Method::POST, format!("/api/v1/subnets/{id}/scan"));
        add(Method::POST, "/api/v1/visits".into());
        add(Method::POST, format!("/api/v1/visits/{id}/check-in"));
        add(Method::POST, format!("/api/v1/visits/{id}/check-out"));
        add(Method::POST, format!("/api/v1/visits/{id}/cancel"));
        add(Method::POST, format!("/api/v1/custody/{id}/return"));
        add(Method::POST, "/api/v1/users".into());
        add(Method::PUT, format!("/api/v1/users/{id}"));
        add(Method::DELETE, format!("/api/v1/users/{id}"));
        add(Method::POST, format!("/api/v1/users/{id}/password"));
        add(Method::POST, format!("/api/v1/users/{id}/permissions/manage_assets"));
        add(Method::DELETE, format!("/api/v1/users/{id}/permissions/manage_assets"));
        add(Method::GET, "/api/v1/audit".into());
        add(Method::POST, "/api/v1/maintenance/run".into());
        add(Method::GET, "/api/v1/admin/backup".into());
        add(Method::POST, "/api/v1/admin/restore".into());
        endpoints
    }

    #[tokio::test]
    async fn test_viewer_is_forbidden_everywhere_it_could_change_something() {
        let state = create_test_state().await;
        let app = app_as(&state, &TestUser::viewer()).await;

        for (method, path) in mutating_endpoints() {
            let body = matches!(method, Method::POST | Method::PUT).then(|| json!({}));
            let (status, json) = send(&app, method.clone(), &path, body).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{} {}", method, path);
            assert_eq!(json["success"], false, "{} {}", method, path);
            assert_eq!(json["code"], "FORBIDDEN", "{} {}", method, path);
        }
    }

    #[tokio::test]
    async fn test_technician_cannot_manage_users() {
        let state = create_test_state().await;
        let app = app_as(&state, &TestUser::technician()).await;

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/v1/users",
            Some(json!({"username": "eve", "email": "eve@example.com", "password": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, json) = send(&app, Method::GET, "/api/v1/assets", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
    }

    #[tokio::test]
    async fn test_anonymous_api_request_gets_401_envelope() {
        let state = create_test_state().await;
        let app = anonymous_app(&state);

        let (status, json) = send(&app, Method::GET, "/api/v1/assets", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "UNAUTHORIZED");
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn test_created_asset_is_audited() {
        let state = create_test_state().await;
        let app = app_as(&state, &TestUser::admin()).await;

        let (status, json) = send(
            &app,
            Method::POST,
            "/api/v1/assets",
            Some(json!({"name": "Dev laptop", "asset_type": "laptop"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["success"], true);
        let asset_id = json["data"]["id"].as_str().unwrap().to_string();

        let (status, json) = send(
            &app,
            Method::GET,
            "/api/v1/audit?entity_type=asset",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let items = json["data"]["items"].as_array().unwrap();
        assert!(items
            .iter()
            .any(|e| e["entity_id"] == asset_id.as_str() && e["action"] == "create"));
    }

    #[tokio::test]
    async fn test_compare_two_updates_shows_only_the_difference() {
        let state = create_test_state().await;
        let app = app_as(&state, &TestUser::admin()).await;

        let (_, json) = send(
            &app,
            Method::POST,
            "/api/v1/assets",
            Some(json!({"name": "Dev laptop", "asset_type": "laptop"})),
        )
        .await;
        let asset_id = json["data"]["id"].as_str().unwrap().to_string();
        let asset_uri = format!("/api/v1/assets/{asset_id}");

        let (status, _) = send(&app, Method::PUT, &asset_uri, Some(json!({"model": "X1 Carbon"}))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, Method::PUT, &asset_uri, Some(json!({"name": "Build laptop"}))).await;
        assert_eq!(status, StatusCode::OK);

        let (_, json) = send(
            &app,
            Method::GET,
            &format!("/api/v1/audit?entity_type=asset&action=update&entity_id={asset_id}"),
            None,
        )
        .await;
        let items = json["data"]["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        let entry_id = |field: &str| {
            items
                .iter()
                .find(|e| e["changes"]["after"].get(field).is_some())
                .and_then(|e| e["id"].as_str())
                .unwrap()
                .to_string()
        };
        let (older, newer) = (entry_id("model"), entry_id("name"));

        let (status, json) = send(
            &app,
            Method::GET,
            &format!("/api/v1/audit/compare?left={older}&right={newer}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json["data"]["differences"],
            json!([{"field": "name", "before": "Dev laptop", "after": "Build laptop"}])
        );

        let (status, json) = send(
            &app,
            Method::GET,
            &format!("/api/v1/audit/compare?left={older}&right={}", Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_restore_skips_rows_that_collide_with_existing_data() {
        let state = create_test_state().await;
        let app = app_as(&state, &TestUser::admin()).await;

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/v1/subnets",
            Some(json!({"name": "Office", "cidr": "10.0.0.0/24"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        create_test_employee(&state, "ada@example.com").await;

        let (status, json) = send(&app, Method::GET, "/api/v1/admin/backup", None).await;
        assert_eq!(status, StatusCode::OK);
        let mut snapshot = json["data"].clone();

        // Same unique keys under fresh ids, plus one genuinely new subnet.
        let mut twin_subnet = snapshot["subnets"][0].clone();
        twin_subnet["id"] = json!(Uuid::new_v4());
        twin_subnet["name"] = json!("Office copy");
        let mut branch = snapshot["subnets"][0].clone();
        branch["id"] = json!(Uuid::new_v4());
        branch["name"] = json!("Branch");
        branch["cidr"] = json!("10.9.0.0/24");
        let mut twin_employee = snapshot["employees"][0].clone();
        twin_employee["id"] = json!(Uuid::new_v4());

        snapshot["subnets"].as_array_mut().unwrap().extend([twin_subnet, branch]);
        snapshot["employees"].as_array_mut().unwrap().push(twin_employee);

        let (status, json) =
            send(&app, Method::POST, "/api/v1/admin/restore", Some(snapshot)).await;
        assert_eq!(status, StatusCode::OK, "{json}");
        let report = &json["data"];
        assert_eq!(report["restored"], 1);
        assert_eq!(report["skipped"], 4);
        assert_eq!(report["by_kind"]["subnets"], json!({"restored": 1, "skipped": 2}));
        assert_eq!(report["by_kind"]["employees"], json!({"restored": 0, "skipped": 2}));

        let (_, json) = send(&app, Method::GET, "/api/v1/subnets", None).await;
        assert_eq!(json["data"].as_array().unwrap().len(), 2);

        let (_, json) = send(&app, Method::GET, "/api/v1/audit?action=restore", None).await;
        assert_eq!(json["data"]["total"], 1);
    }

    #[tokio::test]
    async fn test_restore_rejects_unknown_format_version() {
        let state = create_test_state().await;
        let app = app_as(&state, &TestUser::admin()).await;

        let (status, json) = send(
            &app,
            Method::POST,
            "/api/v1/admin/restore",
            Some(json!({"format_version": 2, "created_at": "2026-01-05T10:00:00Z"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["success"], false);
    }

    struct FailingAuditRepository;

    #[async_trait]
    impl fd_core::db::AuditRepository for FailingAuditRepository {
        async fn insert(&self, _entry: &AuditEntry) -> Result<(), DbError> {
            Err(DbError::Connection("audit store offline".to_string()))
        }

        async fn get(&self, _id: Uuid) -> Result<Option<AuditEntry>, DbError> {
            Ok(None)
        }

        async fn list(
            &self,
            _filter: &AuditFilter,
            pagination: &Pagination,
        ) -> Result<PaginatedResult<AuditEntry>, DbError> {
            Ok(PaginatedResult::new(Vec::new(), 0, pagination))
        }
    }

    #[tokio::test]
    async fn test_failing_audit_store_does_not_fail_the_action() {
        let state = create_test_state()
            .await
            .with_audit_recorder(AuditRecorder::with_repository(Box::new(FailingAuditRepository)));
        let app = app_as(&state, &TestUser::admin()).await;

        let (status, json) = send(
            &app,
            Method::POST,
            "/api/v1/subnets",
            Some(json!({"name": "Office", "cidr": "192.168.10.0/24"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["data"]["cidr"], "192.168.10.0/24");
    }

    #[tokio::test]
    async fn test_subnet_scan_counts_gateway_and_devices() {
        let state = create_test_state().await;
        let app = app_as(&state, &TestUser::admin()).await;

        let (_, json) = send(
            &app,
            Method::POST,
            "/api/v1/subnets",
            Some(json!({"name": "Lab", "cidr": "10.0.0.0/29", "gateway": "10.0.0.1"})),
        )
        .await;
        let subnet_id = json["data"]["id"].as_str().unwrap().to_string();

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/v1/assets",
            Some(json!({"name": "Printer", "asset_type": "printer", "ip_address": "10.0.0.2"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, json) = send(
            &app,
            Method::POST,
            &format!("/api/v1/subnets/{subnet_id}/scan"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let scan = &json["data"];
        assert_eq!(scan["total"], 6);
        assert_eq!(scan["gateway"], 1);
        assert_eq!(scan["used"], 1);
        assert_eq!(scan["free"], 4);
        assert_eq!(scan["entries"][1]["status"], "USED");
    }

    #[tokio::test]
    async fn test_dashboard_redirects_anonymous_visitors_to_login() {
        let state = create_test_state().await;
        let app = anonymous_app(&state);

        for path in ["/", "/assets", "/tickets", "/ipam", "/audit"] {
            let request = Request::builder().uri(path).body(Body::empty()).unwrap();
            let (status, headers, _) = send_raw(&app, request).await;
            assert_eq!(status, StatusCode::SEE_OTHER, "{}", path);
            assert_eq!(headers[header::LOCATION], "/login", "{}", path);
        }
    }

    #[tokio::test]
    async fn test_dashboard_renders_counts() {
        let state = create_test_state().await;
        let app = app_as(&state, &TestUser::admin()).await;

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let (status, headers, html) = send_raw(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .contains("text/html"));
        assert!(html.contains("Closest to breach"));
        assert!(html.contains("in_stock"));
    }

    #[tokio::test]
    async fn test_audit_page_requires_view_audit() {
        let state = create_test_state().await;
        let app = app_as(&state, &TestUser::viewer()).await;

        let request = Request::builder().uri("/audit").body(Body::empty()).unwrap();
        let (status, _, _) = send_raw(&app, request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_sla_partial_refreshes_itself() {
        let state = create_test_state().await;
        let app = app_as(&state, &TestUser::admin()).await;

        let (status, json) = send(
            &app,
            Method::POST,
            "/api/v1/tickets",
            Some(json!({"title": "VPN down", "priority": "high"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let ticket_id = json["data"]["id"].as_str().unwrap().to_string();
        assert!(json["data"]["sla"]["breach_at"].is_string());

        let request = Request::builder()
            .uri(format!("/web/partials/tickets/{ticket_id}/sla"))
            .body(Body::empty())
            .unwrap();
        let (status, _, html) = send_raw(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("every 60s"));
        assert!(html.contains("sla-"));
        assert!(html.contains("left"));
    }

    fn agent_request(body: &Value, secret: Option<&str>) -> Request<Body> {
        let payload = body.to_string();
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/discovery/agent")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(secret) = secret {
            builder = builder.header(SIGNATURE_HEADER, sign(payload.as_bytes(), secret));
        }
        builder.body(Body::from(payload)).unwrap()
    }

    #[tokio::test]
    async fn test_agent_checkin_requires_configured_secret() {
        let state = create_test_state().await;
        let app = anonymous_app(&state);
        let report = json!({"hostname": "ws-01"});

        let (status, _, _) = send_raw(&app, agent_request(&report, Some("anything"))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_agent_checkin_upserts_by_serial() {
        let secret = "agent-secret";
        let state = create_test_state()
            .await
            .with_agent_secret(Some(secret.to_string()));
        let app = anonymous_app(&state);
        let report = json!({
            "hostname": "ws-01",
            "serial_number": "SN-12345",
            "mac_address": "AA:BB:CC:DD:EE:FF",
            "ip_address": "10.0.0.50",
            "manufacturer": "Lenovo",
            "model": "T14"
        });

        let (status, _, _) = send_raw(&app, agent_request(&report, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _, body) = send_raw(&app, agent_request(&report, Some(secret))).await;
        assert_eq!(status, StatusCode::OK);
        let first: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(first["data"]["created"], true);
        assert_eq!(first["data"]["pending_commands"], 0);

        let (status, _, body) = send_raw(&app, agent_request(&report, Some(secret))).await;
        assert_eq!(status, StatusCode::OK);
        let second: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(second["data"]["created"], false);
        assert_eq!(second["data"]["asset_id"], first["data"]["asset_id"]);

        let admin = app_as(&state, &TestUser::admin()).await;
        let asset_id = first["data"]["asset_id"].as_str().unwrap();
        let (_, json) = send(&admin, Method::GET, &format!("/api/v1/assets/{asset_id}"), None).await;
        assert_eq!(json["data"]["mac_address"], "aa:bb:cc:dd:ee:ff");
        assert!(json["data"]["asset_tag"].as_str().unwrap().starts_with("AUTO-"));
    }

    #[tokio::test]
    async fn test_portal_request_is_owned_by_the_employee() {
        let state = create_test_state().await;
        let employee = create_test_employee(&state, "ada@example.com").await;
        let app = app_as_employee(&state, &employee).await;

        let (status, json) = send(
            &app,
            Method::POST,
            "/portal/api/requests",
            Some(json!({"title": "Need a second monitor"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["data"]["source"], "portal");
        assert_eq!(json["data"]["requester_id"], employee.id.to_string());

        let (status, json) = send(&app, Method::GET, "/portal/api/requests", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["total"], 1);

        let (status, _) = send(&app, Method::POST, "/portal/api/requests", Some(json!({}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_portal_requires_employee_session() {
        let state = create_test_state().await;
        let app = anonymous_app(&state);

        let (status, json) = send(&app, Method::GET, "/portal/api/profile", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["success"], false);

        let request = Request::builder().uri("/portal").body(Body::empty()).unwrap();
        let (status, headers, _) = send_raw(&app, request).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(headers[header::LOCATION], "/portal/login");
    }

    fn hidden_csrf(html: &str) -> String {
        let marker = "name=\"csrf_token\" value=\"";
        let start = html.find(marker).unwrap() + marker.len();
        let end = html[start..].find('"').unwrap();
        html[start..start + end].to_string()
    }

    fn session_cookie(headers: &axum::http::HeaderMap) -> String {
        headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with("fleetdesk_session="))
            .and_then(|v| v.split(';').next())
            .unwrap()
            .to_string()
    }

    fn login_post(cookie: &str, username: &str, password: &str, csrf: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/login")
            .header(header::COOKIE, cookie)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!(
                "username={username}&password={password}&csrf_token={csrf}"
            )))
            .unwrap()
    }

    #[tokio::test]
    async fn test_login_flow_sets_session_and_rejects_bad_password() {
        let state = create_test_state().await;
        let password = "CorrectHorse42Battery";
        let user = User::new(
            "grace",
            "grace@example.com",
            hash_password(password).unwrap(),
            Role::Technician,
        );
        create_user_repository(&state.db).create(&user).await.unwrap();
        let app = anonymous_app(&state);

        let request = Request::builder().uri("/login").body(Body::empty()).unwrap();
        let (status, headers, html) = send_raw(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        let cookie = session_cookie(&headers);
        let csrf = hidden_csrf(&html);

        let (status, _, html) = send_raw(&app, login_post(&cookie, "grace", "wrong", &csrf)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("Invalid username or password."));

        let csrf = hidden_csrf(&html);
        let (status, headers, _) = send_raw(&app, login_post(&cookie, "grace", password, &csrf)).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(headers[header::LOCATION], "/");

        let cookie = headers
            .get(header::SET_COOKIE)
            .map(|_| session_cookie(&headers))
            .unwrap_or(cookie);
        let request = Request::builder()
            .uri("/api/v1/users/me")
            .header(header::COOKIE, &cookie)
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send_raw(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        let me: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(me["data"]["username"], "grace");
    }

    #[tokio::test]
    async fn test_login_rejects_stale_form_token() {
        let state = create_test_state().await;
        let app = anonymous_app(&state);

        let request = Request::builder().uri("/login").body(Body::empty()).unwrap();
        let (_, headers, _) = send_raw(&app, request).await;
        let cookie = session_cookie(&headers);

        let (status, _, html) =
            send_raw(&app, login_post(&cookie, "admin", "whatever", "forged")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("Session expired"));
    }

    fn form_post(uri: &str, cookie: &str, body: String) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::COOKIE, cookie)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    fn get_with_cookie(uri: &str, cookie: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    }

    /// Follows a re-issued session cookie, if any.
    fn refreshed_cookie(headers: &axum::http::HeaderMap, current: String) -> String {
        headers
            .get(header::SET_COOKIE)
            .map(|_| session_cookie(headers))
            .unwrap_or(current)
    }

    #[tokio::test]
    async fn test_portal_logout_keeps_admin_signed_in() {
        let state = create_test_state().await;
        let admin_password = "CorrectHorse42Battery";
        let admin = User::new(
            "grace",
            "grace@example.com",
            hash_password(admin_password).unwrap(),
            Role::Admin,
        );
        create_user_repository(&state.db).create(&admin).await.unwrap();
        let employee = create_test_employee(&state, "ada@example.com").await;
        let portal_password = "Analytical42Engine";
        create_employee_repository(&state.db)
            .set_portal_password(employee.id, Some(&hash_password(portal_password).unwrap()))
            .await
            .unwrap();
        let app = anonymous_app(&state);

        let (_, headers, html) = send_raw(&app, Request::builder().uri("/login").body(Body::empty()).unwrap()).await;
        let cookie = session_cookie(&headers);
        let csrf = hidden_csrf(&html);
        let (status, headers, _) =
            send_raw(&app, login_post(&cookie, "grace", admin_password, &csrf)).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        let cookie = refreshed_cookie(&headers, cookie);

        let (_, headers, html) = send_raw(&app, get_with_cookie("/portal/login", &cookie)).await;
        let cookie = refreshed_cookie(&headers, cookie);
        let csrf = hidden_csrf(&html);
        let (status, headers, _) = send_raw(
            &app,
            form_post(
                "/portal/login",
                &cookie,
                format!("email=ada%40example.com&password={portal_password}&csrf_token={csrf}"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        let cookie = refreshed_cookie(&headers, cookie);

        let (status, _, _) = send_raw(&app, get_with_cookie("/portal/api/profile", &cookie)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, headers, _) =
            send_raw(&app, form_post("/portal/logout", &cookie, String::new())).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        let cookie = refreshed_cookie(&headers, cookie);

        let (status, _, _) = send_raw(&app, get_with_cookie("/portal/api/profile", &cookie)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _, body) = send_raw(&app, get_with_cookie("/api/v1/users/me", &cookie)).await;
        assert_eq!(status, StatusCode::OK);
        let me: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(me["data"]["username"], "grace");
    }
}
