//! On-demand scheduled-maintenance sweep.

use axum::{extract::State, routing::post, Router};
use chrono::Utc;
use tracing::info;

use fd_core::{Actor, AuditAction, AuditEntry, ChangeSet, EntityType, MaintenanceReport, MaintenanceSweep};

use crate::auth::CanRunMaintenance;
use crate::middleware::ClientMeta;
use crate::response::{ok, ApiResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/run", post(run_maintenance))
}

/// Opens one maintenance ticket per in-service asset due today or earlier.
/// Running it twice on the same day opens nothing new.
#[utoipa::path(
    post,
    path = "/api/v1/maintenance/run",
    responses(
        (status = 200, description = "Sweep counts"),
        (status = 403, description = "Caller lacks run_maintenance", body = crate::error::ErrorResponse)
    ),
    tag = "Maintenance"
)]
pub async fn run_maintenance(
    State(state): State<AppState>,
    CanRunMaintenance(user): CanRunMaintenance,
    ClientMeta(meta): ClientMeta,
) -> ApiResult<MaintenanceReport> {
    let today = Utc::now().date_naive();
    let report = MaintenanceSweep::new(&state.db, state.sla_policy)
        .run(today)
        .await?;
    info!(
        examined = report.examined,
        created = report.tickets_created,
        user = %user.username,
        "Maintenance sweep run from API"
    );

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::RunMaintenance, EntityType::System)
                .entity("maintenance", today.to_string())
                .with_changes(ChangeSet::detail(serde_json::to_value(&report)?))
                .with_meta(&meta),
        )
        .await;

    ok(report)
}
