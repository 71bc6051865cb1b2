//! Subcommand implementations.

mod db;
mod employee;
mod maintenance;
mod serve;
mod subnet;
mod user;

pub use db::{open_database, run_migrate};
pub use employee::set_portal_password;
pub use maintenance::run_maintenance;
pub use serve::{run_server, ServeConfig};
pub use subnet::scan_subnet;
pub use user::{create_admin, reset_password, verify_password};

#[cfg(test)]
pub(crate) mod test_support {
    use fd_core::db::DbPool;
    use tempfile::TempDir;

    /// Migrated SQLite file in a scratch directory. Keep the `TempDir`
    /// alive for as long as the pool is used.
    pub async fn scratch_database() -> (TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("fleetdesk.db").display());
        let pool = super::open_database(&url).await.unwrap();
        (dir, pool)
    }
}
