//! Subnet management and address scans.

use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use fd_core::db::create_subnet_repository;
use fd_core::ipam::parse_ipv4;
use fd_core::{
    Actor, AuditAction, AuditEntry, ChangeSet, EntityType, Ipv4Cidr, ScanReport, Subnet,
    SubnetScanner,
};

use crate::auth::{AuthenticatedUser, CanManageNetwork};
use crate::error::ApiError;
use crate::extract::{clean, double_option, patch, patch_text, ApiJson, ApiPath};
use crate::middleware::ClientMeta;
use crate::response::{created, ok, ApiResult, Created, Done};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_subnets).post(create_subnet))
        .route(
            "/:id",
            get(get_subnet).put(update_subnet).delete(delete_subnet),
        )
        .route("/:id/scan", post(scan_subnet))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateSubnetRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    /// Stored normalised to the network address.
    #[schema(example = "192.168.1.0/24")]
    pub cidr: String,
    #[schema(example = "192.168.1.1")]
    pub gateway: Option<String>,
    #[validate(range(min = 1, max = 4094))]
    pub vlan_id: Option<i32>,
    pub location_id: Option<Uuid>,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateSubnetRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    pub cidr: Option<String>,
    /// Blank clears the gateway.
    pub gateway: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<i32>)]
    pub vlan_id: Option<Option<i32>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<Uuid>)]
    pub location_id: Option<Option<Uuid>>,
    pub description: Option<String>,
}

/// Parses the CIDR and checks the gateway lies inside it. Returns the
/// normalised CIDR and gateway strings.
fn validate_network(cidr: &str, gateway: Option<&str>) -> Result<(String, Option<String>), ApiError> {
    let network = Ipv4Cidr::parse(cidr)?;
    let gateway = match gateway {
        Some(g) => {
            let ip = parse_ipv4(g).map_err(|e| {
                ApiError::validation_field("gateway", "invalid_ip", &e.to_string())
            })?;
            if !network.contains(ip) {
                return Err(ApiError::validation_field(
                    "gateway",
                    "outside_subnet",
                    &format!("Gateway {} is not inside {}", ip, network),
                ));
            }
            Some(ip.to_string())
        }
        None => None,
    };
    Ok((network.to_string(), gateway))
}

fn check_vlan(vlan_id: Option<i32>) -> Result<(), ApiError> {
    match vlan_id {
        Some(v) if !(1..=4094).contains(&v) => Err(ApiError::validation_field(
            "vlan_id",
            "range",
            "VLAN id must be between 1 and 4094",
        )),
        _ => Ok(()),
    }
}

async fn load_subnet(state: &AppState, id: Uuid) -> Result<Subnet, ApiError> {
    create_subnet_repository(&state.db)
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Subnet", id))
}

#[utoipa::path(
    get,
    path = "/api/v1/subnets",
    responses((status = 200, description = "All subnets")),
    tag = "IPAM"
)]
pub async fn list_subnets(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> ApiResult<Vec<Subnet>> {
    ok(create_subnet_repository(&state.db).list().await?)
}

#[utoipa::path(
    get,
    path = "/api/v1/subnets/{id}",
    params(("id" = Uuid, Path, description = "Subnet ID")),
    responses(
        (status = 200, description = "Subnet"),
        (status = 404, description = "Not found", body = crate::error::ErrorResponse)
    ),
    tag = "IPAM"
)]
pub async fn get_subnet(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Subnet> {
    ok(load_subnet(&state, id).await?)
}

#[utoipa::path(
    post,
    path = "/api/v1/subnets",
    request_body = CreateSubnetRequest,
    responses(
        (status = 201, description = "Subnet created"),
        (status = 422, description = "Invalid CIDR or gateway", body = crate::error::ErrorResponse)
    ),
    tag = "IPAM"
)]
pub async fn create_subnet(
    State(state): State<AppState>,
    CanManageNetwork(user): CanManageNetwork,
    ClientMeta(meta): ClientMeta,
    ApiJson(request): ApiJson<CreateSubnetRequest>,
) -> Created<Subnet> {
    request.validate()?;
    let gateway = clean(request.gateway);
    let (cidr, gateway) = validate_network(&request.cidr, gateway.as_deref())?;

    let mut subnet = Subnet::new(request.name.trim(), cidr);
    subnet.gateway = gateway;
    subnet.vlan_id = request.vlan_id;
    subnet.location_id = request.location_id;
    subnet.description = clean(request.description);
    let subnet = create_subnet_repository(&state.db).create(&subnet).await?;

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Create, EntityType::Subnet)
                .entity(subnet.id, &subnet.name)
                .with_changes(ChangeSet::created(&subnet))
                .with_meta(&meta),
        )
        .await;

    created(subnet)
}

#[utoipa::path(
    put,
    path = "/api/v1/subnets/{id}",
    params(("id" = Uuid, Path, description = "Subnet ID")),
    request_body = UpdateSubnetRequest,
    responses((status = 200, description = "Subnet updated")),
    tag = "IPAM"
)]
pub async fn update_subnet(
    State(state): State<AppState>,
    CanManageNetwork(user): CanManageNetwork,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<UpdateSubnetRequest>,
) -> ApiResult<Subnet> {
    request.validate()?;
    let old = load_subnet(&state, id).await?;
    let mut subnet = old.clone();

    if let Some(name) = clean(request.name) {
        subnet.name = name;
    }
    let cidr = clean(request.cidr).unwrap_or_else(|| subnet.cidr.clone());
    let gateway = match request.gateway {
        Some(g) => clean(Some(g)),
        None => subnet.gateway.clone(),
    };
    let (cidr, gateway) = validate_network(&cidr, gateway.as_deref())?;
    subnet.cidr = cidr;
    subnet.gateway = gateway;
    patch(&mut subnet.vlan_id, request.vlan_id);
    check_vlan(subnet.vlan_id)?;
    patch(&mut subnet.location_id, request.location_id);
    patch_text(&mut subnet.description, request.description);
    subnet.updated_at = Utc::now();

    let subnet = create_subnet_repository(&state.db).save(&subnet).await?;

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Update, EntityType::Subnet)
                .entity(subnet.id, &subnet.name)
                .with_changes(ChangeSet::between(&old, &subnet))
                .with_meta(&meta),
        )
        .await;

    ok(subnet)
}

#[utoipa::path(
    delete,
    path = "/api/v1/subnets/{id}",
    params(("id" = Uuid, Path, description = "Subnet ID")),
    responses((status = 200, description = "Subnet deleted")),
    tag = "IPAM"
)]
pub async fn delete_subnet(
    State(state): State<AppState>,
    CanManageNetwork(user): CanManageNetwork,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Done> {
    let subnet = load_subnet(&state, id).await?;
    create_subnet_repository(&state.db).delete(id).await?;

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Delete, EntityType::Subnet)
                .entity(subnet.id, &subnet.name)
                .with_changes(ChangeSet::deleted(&subnet))
                .with_meta(&meta),
        )
        .await;

    ok(Done { id })
}

/// Classifies every usable address of the subnet as gateway, used or free.
#[utoipa::path(
    post,
    path = "/api/v1/subnets/{id}/scan",
    params(("id" = Uuid, Path, description = "Subnet ID")),
    responses(
        (status = 200, description = "Address table with usage counts"),
        (status = 404, description = "Subnet not found", body = crate::error::ErrorResponse),
        (status = 422, description = "Range too large to scan", body = crate::error::ErrorResponse)
    ),
    tag = "IPAM"
)]
pub async fn scan_subnet(
    State(state): State<AppState>,
    CanManageNetwork(user): CanManageNetwork,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<ScanReport> {
    let report = SubnetScanner::new(&state.db).scan(id).await?;

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Scan, EntityType::Subnet)
                .entity(report.subnet.id, &report.subnet.name)
                .with_changes(ChangeSet::detail(json!({
                    "network": report.scan.network.to_string(),
                    "used": report.scan.used,
                    "free": report.scan.free,
                    "gateway": report.scan.gateway,
                    "total": report.scan.total,
                    "utilization_percent": report.scan.utilization_percent,
                })))
                .with_meta(&meta),
        )
        .await;

    ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_validate_network_normalises_cidr() {
        let (cidr, gateway) = validate_network("10.1.2.77/24", Some("10.1.2.1")).unwrap();
        assert_eq!(cidr, "10.1.2.0/24");
        assert_eq!(gateway.as_deref(), Some("10.1.2.1"));
    }

    #[test]
    fn test_gateway_outside_subnet_is_rejected() {
        let err = validate_network("10.1.2.0/24", Some("10.1.3.1")).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        match err {
            ApiError::ValidationError(details) => {
                assert_eq!(details.fields["gateway"][0].code, "outside_subnet")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_bad_cidr_is_a_cidr_field_error() {
        match validate_network("10.1.2.0/33", None).unwrap_err() {
            ApiError::ValidationError(details) => assert!(details.fields.contains_key("cidr")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
