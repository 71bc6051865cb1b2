//! API server implementation.

use axum::{middleware, Router};
use rand::RngCore;
use sha2::{Digest, Sha512};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tower_sessions::cookie::{time, Key, SameSite};
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};
use tracing::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::error::ErrorResponse;
use crate::middleware::{cors_layer, request_id, request_logging, security_headers};
use crate::routes;
use crate::state::AppState;
use crate::web;

pub const DEFAULT_SESSION_COOKIE: &str = "fleetdesk_session";

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Address to bind to.
    pub bind_address: SocketAddr,
    /// Request timeout.
    pub request_timeout: Duration,
    /// Enable Swagger UI.
    pub enable_swagger: bool,
    /// Shutdown timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
    pub session_cookie_name: String,
    /// Sets the `Secure` cookie flag. Turn off only for plain-HTTP development.
    pub session_secure: bool,
    /// Idle time before a session expires.
    pub session_idle_timeout: Duration,
    /// Signs session cookies. When unset a random key is used and sessions
    /// do not survive a restart.
    pub session_secret: Option<String>,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            request_timeout: Duration::from_secs(30),
            enable_swagger: true,
            shutdown_timeout: Duration::from_secs(30),
            session_cookie_name: DEFAULT_SESSION_COOKIE.to_string(),
            session_secure: true,
            session_idle_timeout: Duration::from_secs(8 * 60 * 60),
            session_secret: None,
        }
    }
}

/// Derives the 64-byte cookie signing key from a secret of any length.
pub fn session_key(secret: &str) -> Key {
    let digest = Sha512::digest(secret.as_bytes());
    Key::from(digest.as_slice())
}

fn random_session_key() -> Key {
    let mut bytes = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut bytes);
    Key::from(&bytes[..])
}

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health::health_check,
        crate::routes::health::readiness_check,
        crate::routes::health::liveness_check,
        crate::routes::metrics::prometheus_metrics,
        crate::routes::stats::dashboard_stats,
        crate::routes::assets::list_assets,
        crate::routes::assets::get_asset,
        crate::routes::assets::create_asset,
        crate::routes::assets::update_asset,
        crate::routes::assets::delete_asset,
        crate::routes::assets::assign_asset,
        crate::routes::assets::unassign_asset,
        crate::routes::assets::list_commands,
        crate::routes::assets::queue_command,
        crate::routes::employees::list_employees,
        crate::routes::employees::get_employee,
        crate::routes::employees::create_employee,
        crate::routes::employees::update_employee,
        crate::routes::employees::deactivate_employee,
        crate::routes::employees::delete_employee,
        crate::routes::organization::create_department,
        crate::routes::organization::create_location,
        crate::routes::tickets::list_tickets,
        crate::routes::tickets::get_ticket,
        crate::routes::tickets::create_ticket,
        crate::routes::tickets::update_ticket,
        crate::routes::tickets::change_status,
        crate::routes::tickets::delete_ticket,
        crate::routes::catalog::create_category,
        crate::routes::catalog::create_item,
        crate::routes::knowledge::list_articles,
        crate::routes::knowledge::get_article,
        crate::routes::knowledge::create_article,
        crate::routes::knowledge::publish_article,
        crate::routes::bookings::list_bookings,
        crate::routes::bookings::create_booking,
        crate::routes::ipam::list_subnets,
        crate::routes::ipam::get_subnet,
        crate::routes::ipam::create_subnet,
        crate::routes::ipam::update_subnet,
        crate::routes::ipam::delete_subnet,
        crate::routes::ipam::scan_subnet,
        crate::routes::visitors::list_visits,
        crate::routes::visitors::register_visit,
        crate::routes::visitors::check_in,
        crate::routes::custody::list_custody,
        crate::routes::custody::return_custody,
        crate::routes::notifications::list_notifications,
        crate::routes::users::current_user,
        crate::routes::users::list_users,
        crate::routes::users::create_user,
        crate::routes::users::update_user,
        crate::routes::users::reset_password,
        crate::routes::users::grant_permission,
        crate::routes::audit::list_audit,
        crate::routes::audit::compare_entries,
        crate::routes::maintenance::run_maintenance,
        crate::routes::admin::backup,
        crate::routes::admin::restore,
        crate::routes::agent::agent_checkin,
        crate::routes::agent::fetch_commands,
        crate::routes::agent::command_result,
        crate::routes::portal::submit_request,
        crate::routes::portal::acknowledge_custody,
    ),
    components(
        schemas(
            crate::routes::health::HealthResponse,
            crate::routes::health::DatabaseHealth,
            crate::routes::assets::CreateAssetRequest,
            crate::routes::assets::UpdateAssetRequest,
            crate::routes::assets::AssignAssetRequest,
            crate::routes::assets::QueueCommandRequest,
            crate::routes::employees::CreateEmployeeRequest,
            crate::routes::employees::UpdateEmployeeRequest,
            crate::routes::organization::DepartmentRequest,
            crate::routes::organization::LocationRequest,
            crate::routes::tickets::CreateTicketRequest,
            crate::routes::tickets::UpdateTicketRequest,
            crate::routes::tickets::ChangeStatusRequest,
            crate::routes::catalog::CategoryRequest,
            crate::routes::catalog::CreateItemRequest,
            crate::routes::catalog::UpdateItemRequest,
            crate::routes::knowledge::KnowledgeCategoryRequest,
            crate::routes::knowledge::CreateArticleRequest,
            crate::routes::knowledge::UpdateArticleRequest,
            crate::routes::bookings::CreateRoomRequest,
            crate::routes::bookings::UpdateRoomRequest,
            crate::routes::bookings::CreateBookingRequest,
            crate::routes::ipam::CreateSubnetRequest,
            crate::routes::ipam::UpdateSubnetRequest,
            crate::routes::visitors::RegisterVisitRequest,
            crate::routes::visitors::CheckInRequest,
            crate::routes::users::CreateUserRequest,
            crate::routes::users::UpdateUserRequest,
            crate::routes::users::ResetPasswordRequest,
            crate::routes::agent::CheckinResponse,
            crate::routes::agent::CommandResultRequest,
            crate::routes::portal::PortalRequestBody,
            ErrorResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Metrics", description = "Prometheus metrics"),
        (name = "Dashboard", description = "Headline counts"),
        (name = "Assets", description = "Hardware inventory and assignment"),
        (name = "Employees", description = "People, departments and locations"),
        (name = "Tickets", description = "Helpdesk tickets and SLA timers"),
        (name = "Catalog", description = "Service catalogue"),
        (name = "Knowledge", description = "Knowledge base"),
        (name = "Bookings", description = "Rooms and bookings"),
        (name = "IPAM", description = "Subnets and address scans"),
        (name = "Visitors", description = "Visitor registration"),
        (name = "Custody", description = "Asset custody records"),
        (name = "Notifications", description = "In-app notifications"),
        (name = "Users", description = "Admin accounts and permissions"),
        (name = "Audit", description = "Audit trail"),
        (name = "Maintenance", description = "Preventive maintenance sweep"),
        (name = "Admin", description = "Backup and restore"),
        (name = "Agent", description = "Signed endpoint agent channel"),
        (name = "Portal", description = "Employee self-service"),
    ),
    info(
        title = "Fleetdesk API",
        version = "0.1.0",
        description = "IT asset management and helpdesk API",
        license(name = "MIT"),
    )
)]
pub struct ApiDoc;

/// API server.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
}

impl ApiServer {
    /// Creates a new API server.
    pub fn new(state: AppState, config: ApiServerConfig) -> Self {
        Self { config, state }
    }

    /// Creates a new API server with default configuration.
    pub fn with_state(state: AppState) -> Self {
        Self::new(state, ApiServerConfig::default())
    }

    fn session_layer(&self) -> SessionManagerLayer<MemoryStore, tower_sessions::service::SignedCookie> {
        let key = match self.config.session_secret.as_deref() {
            Some(secret) if !secret.is_empty() => session_key(secret),
            _ => {
                warn!("No session secret configured; sessions will not survive a restart");
                random_session_key()
            }
        };
        let idle = time::Duration::seconds(self.config.session_idle_timeout.as_secs() as i64);

        SessionManagerLayer::new(MemoryStore::default())
            .with_name(self.config.session_cookie_name.clone())
            .with_secure(self.config.session_secure)
            .with_http_only(true)
            .with_same_site(SameSite::Lax)
            .with_expiry(Expiry::OnInactivity(idle))
            .with_signed(key)
    }

    /// Builds the router.
    pub fn router(&self) -> Router {
        routes::health::init_start_time();

        let mut app = routes::create_router(self.state.clone());
        app = app.merge(web::create_web_router(self.state.clone()));

        if self.config.enable_swagger {
            app = app.merge(
                SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()),
            );
        }

        let static_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("static");
        app = app.nest_service("/static", ServeDir::new(static_path));

        // Innermost first.
        app.layer(self.session_layer())
            .layer(middleware::from_fn(security_headers))
            .layer(middleware::from_fn(request_logging))
            .layer(middleware::from_fn(request_id))
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer())
            .layer(CatchPanicLayer::new())
    }

    /// Runs the server until Ctrl+C or SIGTERM.
    pub async fn run(self) -> Result<(), std::io::Error> {
        self.run_until(shutdown_signal()).await
    }

    /// Runs the server with a custom shutdown signal.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), std::io::Error>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let addr = self.config.bind_address;

        info!("Starting Fleetdesk on {}", addr);

        let listener = TcpListener::bind(addr).await?;

        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Server shut down gracefully");
        Ok(())
    }
}

/// Resolves on Ctrl+C or SIGTERM. A handler that cannot be installed is
/// logged and ignored.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::create_test_state;

    #[tokio::test]
    async fn test_router_creation() {
        let state = create_test_state().await;
        let server = ApiServer::new(
            state,
            ApiServerConfig {
                session_secret: Some("a test secret".to_string()),
                ..Default::default()
            },
        );
        let _router = server.router();
    }

    #[test]
    fn test_session_key_is_stable_for_a_secret() {
        assert_eq!(
            session_key("correct horse").master(),
            session_key("correct horse").master()
        );
        assert_ne!(
            session_key("correct horse").master(),
            session_key("battery staple").master()
        );
    }

    #[test]
    fn test_openapi_lists_agent_and_portal_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/discovery/agent"));
        assert!(doc.paths.paths.contains_key("/portal/api/requests"));
        assert!(doc.paths.paths.contains_key("/api/v1/tickets/{id}"));
    }
}
