//! Endpoint agent check-in and command channel.
//!
//! These routes carry no session. Every request is signed with the shared
//! agent secret (see [`crate::agent_signature`]).

use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    http::HeaderMap,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use fd_core::db::{create_agent_command_repository, create_asset_repository};
use fd_core::{
    Actor, AgentCommand, AgentReport, Asset, AssetType, AuditAction, AuditEntry, ChangeSet,
    CommandStatus, EntityType,
};
use fd_observability::metrics::AGENT_CHECKINS;

use crate::agent_signature::verify_agent_request;
use crate::error::ApiError;
use crate::extract::{clean, ApiPath, ApiQuery};
use crate::middleware::ClientMeta;
use crate::response::{ok, ApiResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/discovery/agent", post(agent_checkin))
        .route("/api/automation/commands", get(fetch_commands))
        .route("/api/automation/commands/:id/result", post(command_result))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckinResponse {
    pub asset_id: Uuid,
    /// True when this check-in created the asset.
    pub created: bool,
    pub pending_commands: usize,
}

#[derive(Debug, Deserialize)]
pub struct CommandsQuery {
    pub hostname: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CommandResultRequest {
    /// `completed` or `failed`. Takes precedence over `success`.
    #[schema(value_type = Option<String>)]
    pub status: Option<CommandStatus>,
    pub success: Option<bool>,
    pub output: Option<String>,
}

impl CommandResultRequest {
    fn outcome(&self) -> Result<CommandStatus, ApiError> {
        match (self.status, self.success) {
            (Some(s @ (CommandStatus::Completed | CommandStatus::Failed)), _) => Ok(s),
            (Some(other), _) => Err(ApiError::validation_field(
                "status",
                "invalid_outcome",
                &format!("A result cannot set status '{}'", other),
            )),
            (None, Some(false)) => Ok(CommandStatus::Failed),
            (None, _) => Ok(CommandStatus::Completed),
        }
    }
}

fn verify(state: &AppState, headers: &HeaderMap, payload: &[u8]) -> Result<(), ApiError> {
    verify_agent_request(state.agent_secret.as_deref().map(String::as_str), headers, payload)?;
    Ok(())
}

/// Upserts the reporting device by serial number, then hostname, then MAC.
/// Unknown devices are created in stock with an `AUTO-` tag.
#[utoipa::path(
    post,
    path = "/api/discovery/agent",
    request_body = String,
    responses(
        (status = 200, description = "Asset id and pending command count"),
        (status = 401, description = "Missing or bad signature", body = crate::error::ErrorResponse),
        (status = 422, description = "Report carries no identity", body = crate::error::ErrorResponse),
        (status = 503, description = "Agent secret not configured", body = crate::error::ErrorResponse)
    ),
    tag = "Agent"
)]
pub async fn agent_checkin(
    State(state): State<AppState>,
    ClientMeta(meta): ClientMeta,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<CheckinResponse> {
    verify(&state, &headers, &body)?;

    let report: AgentReport = serde_json::from_slice(&body)?;
    if !report.has_identity() {
        return Err(ApiError::UnprocessableEntity(
            "Report must include a serial number, hostname or MAC address".to_string(),
        ));
    }

    let now = Utc::now();
    let repo = create_asset_repository(&state.db);
    let (old, created) = match repo.find_by_identity(&report).await? {
        Some(asset) => (Some(asset), false),
        None => (None, true),
    };

    let mut asset = match &old {
        Some(asset) => asset.clone(),
        None => {
            let mut asset = Asset::new(
                Asset::generate_auto_tag(),
                report.display_name(),
                AssetType::Other,
            );
            asset.serial_number = clean(report.serial_number.clone());
            asset.manufacturer = clean(report.manufacturer.clone());
            asset.model = clean(report.model.clone());
            asset
        }
    };
    if let Some(hostname) = clean(report.hostname.clone()) {
        asset.hostname = Some(hostname);
    }
    if let Some(ip) = clean(report.ip_address.clone()) {
        match fd_core::ipam::parse_ipv4(&ip) {
            Ok(ip) => asset.ip_address = Some(ip.to_string()),
            Err(_) => warn!(asset_tag = %asset.asset_tag, %ip, "Agent reported an invalid IP"),
        }
    }
    if let Some(mac) = clean(report.mac_address.clone()) {
        asset.mac_address = Some(mac.to_lowercase());
    }
    asset.last_seen_at = Some(now);
    asset.updated_at = now;

    let asset = if created {
        repo.create(&asset).await?
    } else {
        repo.save(&asset).await?
    };

    let pending_commands = create_agent_command_repository(&state.db)
        .list_for_asset(asset.id)
        .await?
        .iter()
        .filter(|c| c.status == CommandStatus::Pending)
        .count();

    metrics::counter!(AGENT_CHECKINS, "created" => created.to_string()).increment(1);
    info!(asset_id = %asset.id, asset_tag = %asset.asset_tag, created, "Agent check-in");

    let actor = Actor::agent(report.display_name());
    let entry = if created {
        AuditEntry::new(&actor, AuditAction::Create, EntityType::Asset)
            .with_changes(ChangeSet::created(&asset))
    } else {
        let changes = old.as_ref().and_then(|old| ChangeSet::between(old, &asset));
        AuditEntry::new(&actor, AuditAction::Update, EntityType::Asset).with_changes(changes)
    };
    state
        .audit(entry.entity(asset.id, &asset.asset_tag).with_meta(&meta))
        .await;

    ok(CheckinResponse {
        asset_id: asset.id,
        created,
        pending_commands,
    })
}

/// Hands pending commands for the host to the agent and marks them
/// dispatched. The signature covers the raw query string.
#[utoipa::path(
    get,
    path = "/api/automation/commands",
    params(("hostname" = String, Query, description = "Reporting host")),
    responses(
        (status = 200, description = "Commands now dispatched"),
        (status = 401, description = "Missing or bad signature", body = crate::error::ErrorResponse),
        (status = 404, description = "No asset with that hostname", body = crate::error::ErrorResponse)
    ),
    tag = "Agent"
)]
pub async fn fetch_commands(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(raw): RawQuery,
    ApiQuery(query): ApiQuery<CommandsQuery>,
) -> ApiResult<Vec<AgentCommand>> {
    verify(&state, &headers, raw.unwrap_or_default().as_bytes())?;

    let hostname = query.hostname.trim();
    let asset = create_asset_repository(&state.db)
        .get_by_hostname(hostname)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No asset with hostname {}", hostname)))?;

    let commands = create_agent_command_repository(&state.db)
        .take_pending(asset.id, Utc::now())
        .await?;
    if !commands.is_empty() {
        info!(asset_id = %asset.id, count = commands.len(), "Dispatched agent commands");
    }
    ok(commands)
}

#[utoipa::path(
    post,
    path = "/api/automation/commands/{id}/result",
    params(("id" = Uuid, Path, description = "Command ID")),
    request_body = CommandResultRequest,
    responses(
        (status = 200, description = "Result recorded"),
        (status = 401, description = "Missing or bad signature", body = crate::error::ErrorResponse),
        (status = 422, description = "Command already finished", body = crate::error::ErrorResponse)
    ),
    tag = "Agent"
)]
pub async fn command_result(
    State(state): State<AppState>,
    ClientMeta(meta): ClientMeta,
    headers: HeaderMap,
    ApiPath(id): ApiPath<Uuid>,
    body: Bytes,
) -> ApiResult<AgentCommand> {
    verify(&state, &headers, &body)?;
    let request: CommandResultRequest = serde_json::from_slice(&body)?;
    let status = request.outcome()?;

    let repo = create_agent_command_repository(&state.db);
    let old = repo
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Command", id))?;
    if matches!(old.status, CommandStatus::Completed | CommandStatus::Failed) {
        return Err(ApiError::UnprocessableEntity(format!(
            "Command {} already finished as {}",
            id, old.status
        )));
    }

    let mut command = old.clone();
    command.status = status;
    command.output = request.output;
    command.completed_at = Some(Utc::now());
    let command = repo.save(&command).await?;
    info!(command_id = %command.id, status = %command.status, "Agent command finished");

    state
        .audit(
            AuditEntry::new(
                &Actor::agent(command.asset_id.to_string()),
                AuditAction::Complete,
                EntityType::AgentCommand,
            )
            .entity(command.id, &command.command)
            .with_changes(ChangeSet::between(&old, &command))
            .with_meta(&meta),
        )
        .await;

    ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_outcome() {
        let request = |status, success| CommandResultRequest {
            status,
            success,
            output: None,
        };
        assert_eq!(request(None, None).outcome().unwrap(), CommandStatus::Completed);
        assert_eq!(request(None, Some(false)).outcome().unwrap(), CommandStatus::Failed);
        assert_eq!(
            request(Some(CommandStatus::Failed), Some(true)).outcome().unwrap(),
            CommandStatus::Failed
        );
        assert!(request(Some(CommandStatus::Pending), None).outcome().is_err());
    }
}
