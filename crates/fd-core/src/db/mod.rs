//! Persistence for Fleetdesk.
//!
//! Every repository is an async trait with a SQLite implementation (used in
//! development and tests) and a PostgreSQL implementation, selected by the
//! `create_*_repository` factories from the [`DbPool`] variant.

pub mod convert;
mod error;
mod pagination;
mod pool;
mod schema;
pub mod seed;

pub mod agent_repo;
pub mod asset_repo;
pub mod audit_repo;
pub mod booking_repo;
pub mod catalog_repo;
pub mod custody_repo;
pub mod employee_repo;
pub mod knowledge_repo;
pub mod notification_repo;
pub mod organization_repo;
pub mod subnet_repo;
pub mod ticket_repo;
pub mod user_repo;
pub mod visitor_repo;

pub use error::DbError;
pub use pagination::{PaginatedResult, Pagination, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use pool::{
    create_pool, create_pool_with_options, escape_like_pattern, make_like_pattern, DbPool,
    PoolOptions,
};
pub use schema::run_migrations;

pub use agent_repo::{create_agent_command_repository, AgentCommandRepository};
pub use asset_repo::{create_asset_repository, AssetRepository};
pub use audit_repo::{create_audit_repository, AuditRepository};
pub use booking_repo::{create_booking_repository, BookingRepository};
pub use catalog_repo::{create_catalog_repository, CatalogRepository};
pub use custody_repo::{create_custody_repository, CustodyRepository};
pub use employee_repo::{create_employee_repository, EmployeeRepository};
pub use knowledge_repo::{create_knowledge_repository, KnowledgeRepository};
pub use notification_repo::{create_notification_repository, NotificationRepository};
pub use organization_repo::{create_organization_repository, OrganizationRepository};
pub use subnet_repo::{create_subnet_repository, SubnetRepository};
pub use ticket_repo::{create_ticket_repository, TicketRepository};
pub use user_repo::{create_user_repository, UserRepository};
pub use visitor_repo::{create_visit_repository, VisitRepository};

pub use seed::ensure_admin_user;

/// In-memory SQLite with all migrations applied, isolated per call.
#[cfg(test)]
pub(crate) async fn test_pool() -> DbPool {
    let url = format!(
        "sqlite:file:fd_core_test_{}?mode=memory&cache=shared",
        uuid::Uuid::new_v4()
    );
    let pool = create_pool_with_options(&url, PoolOptions::single_connection())
        .await
        .expect("Failed to create test pool");
    run_migrations(&pool).await.expect("Failed to run migrations");
    pool
}
