//! Headline numbers for the dashboard.

use axum::{extract::State, routing::get, Router};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;

use fd_core::db::{create_asset_repository, create_ticket_repository, create_visit_repository};
use fd_observability::metrics::OPEN_TICKETS;

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::response::{ok, ApiResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(dashboard_stats))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DashboardStats {
    /// Every asset status, zero when absent.
    pub assets_by_status: BTreeMap<&'static str, i64>,
    pub total_assets: i64,
    pub open_tickets: i64,
    pub breached_tickets: i64,
    pub visitors_on_site: i64,
}

/// Gathers the counts and refreshes the open-tickets gauge.
pub(crate) async fn collect_stats(state: &AppState) -> Result<DashboardStats, ApiError> {
    let mut assets_by_status: BTreeMap<&'static str, i64> = fd_core::AssetStatus::ALL
        .iter()
        .map(|s| (s.as_db_str(), 0))
        .collect();
    for (status, count) in create_asset_repository(&state.db).count_by_status().await? {
        assets_by_status.insert(status.as_db_str(), count);
    }
    let total_assets = assets_by_status.values().sum();

    let tickets = create_ticket_repository(&state.db);
    let open_tickets = tickets.count_open().await?;
    let breached_tickets = tickets.count_breached(Utc::now()).await?;
    let visitors_on_site = create_visit_repository(&state.db).count_on_site().await?;

    metrics::gauge!(OPEN_TICKETS).set(open_tickets as f64);

    Ok(DashboardStats {
        assets_by_status,
        total_assets,
        open_tickets,
        breached_tickets,
        visitors_on_site,
    })
}

#[utoipa::path(
    get,
    path = "/api/v1/stats",
    responses((status = 200, description = "Asset, ticket and visitor counts")),
    tag = "Dashboard"
)]
pub async fn dashboard_stats(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> ApiResult<DashboardStats> {
    ok(collect_stats(&state).await?)
}
