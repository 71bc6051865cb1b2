//! Employee directory endpoints.

use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use fd_core::db::{
    create_asset_repository, create_custody_repository, create_employee_repository,
    create_ticket_repository, PaginatedResult, Pagination,
};
use fd_core::{
    Actor, Asset, AuditAction, AuditEntry, ChangeSet, CustodyFilter, CustodyItem, Employee,
    EmployeeFilter, EntityType, TicketFilter,
};

use crate::auth::{AuthenticatedUser, CanManageEmployees};
use crate::error::ApiError;
use crate::extract::{clean, double_option, patch, patch_text, ApiJson, ApiPath, ApiQuery};
use crate::middleware::ClientMeta;
use crate::response::{created, ok, ApiResult, Created, Done};
use crate::routes::tickets::TicketView;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_employees).post(create_employee))
        .route(
            "/:id",
            get(get_employee)
                .put(update_employee)
                .delete(delete_employee),
        )
        .route("/:id/deactivate", post(deactivate_employee))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListEmployeesQuery {
    pub department_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub active: Option<bool>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateEmployeeRequest {
    #[validate(length(min = 1, max = 32))]
    pub employee_number: String,
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    #[validate(email)]
    pub email: String,
    pub job_title: Option<String>,
    pub phone: Option<String>,
    pub department_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub manager_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateEmployeeRequest {
    #[validate(length(min = 1, max = 32))]
    pub employee_number: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub first_name: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub last_name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub job_title: Option<String>,
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<Uuid>)]
    pub department_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<Uuid>)]
    pub location_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<Uuid>)]
    pub manager_id: Option<Option<Uuid>>,
    pub active: Option<bool>,
}

/// An employee with everything currently attached to them.
#[derive(Debug, Serialize)]
pub struct EmployeeDetail {
    #[serde(flatten)]
    pub employee: Employee,
    pub full_name: String,
    pub assets: Vec<Asset>,
    pub open_tickets: Vec<TicketView>,
    pub custody: Vec<CustodyItem>,
}

async fn load_employee(state: &AppState, id: Uuid) -> Result<Employee, ApiError> {
    create_employee_repository(&state.db)
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Employee", id))
}

async fn check_manager(state: &AppState, employee_id: Uuid, manager_id: Option<Uuid>) -> Result<(), ApiError> {
    let Some(manager_id) = manager_id else {
        return Ok(());
    };
    if manager_id == employee_id {
        return Err(ApiError::validation_field(
            "manager_id",
            "self_reference",
            "An employee cannot be their own manager",
        ));
    }
    load_employee(state, manager_id).await.map(|_| ())
}

#[utoipa::path(
    get,
    path = "/api/v1/employees",
    params(
        ("department_id" = Option<Uuid>, Query, description = "Department"),
        ("location_id" = Option<Uuid>, Query, description = "Location"),
        ("active" = Option<bool>, Query, description = "Active flag"),
        ("search" = Option<String>, Query, description = "Name, email or employee number")
    ),
    responses((status = 200, description = "Paginated employees")),
    tag = "Employees"
)]
pub async fn list_employees(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiQuery(query): ApiQuery<ListEmployeesQuery>,
) -> ApiResult<PaginatedResult<Employee>> {
    let filter = EmployeeFilter {
        department_id: query.department_id,
        location_id: query.location_id,
        active: query.active,
        search: clean(query.search),
    };
    let pagination = Pagination::from_query(query.page, query.per_page);
    ok(create_employee_repository(&state.db)
        .list(&filter, &pagination)
        .await?)
}

#[utoipa::path(
    get,
    path = "/api/v1/employees/{id}",
    params(("id" = Uuid, Path, description = "Employee ID")),
    responses(
        (status = 200, description = "Employee with assets, open tickets and custody items"),
        (status = 404, description = "Not found", body = crate::error::ErrorResponse)
    ),
    tag = "Employees"
)]
pub async fn get_employee(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<EmployeeDetail> {
    let employee = load_employee(&state, id).await?;
    let now = Utc::now();

    let assets = create_asset_repository(&state.db)
        .list_for_employee(id)
        .await?;
    let open_tickets = create_ticket_repository(&state.db)
        .list(
            &TicketFilter {
                requester_id: Some(id),
                open_only: true,
                ..Default::default()
            },
            &Pagination::all(),
            now,
        )
        .await?
        .items
        .into_iter()
        .map(|t| TicketView::new(t, now))
        .collect();
    let custody = create_custody_repository(&state.db)
        .list(&CustodyFilter {
            employee_id: Some(id),
            ..Default::default()
        })
        .await?;

    ok(EmployeeDetail {
        full_name: employee.full_name(),
        employee,
        assets,
        open_tickets,
        custody,
    })
}

#[utoipa::path(
    post,
    path = "/api/v1/employees",
    request_body = CreateEmployeeRequest,
    responses(
        (status = 201, description = "Employee created"),
        (status = 409, description = "Email or employee number in use", body = crate::error::ErrorResponse)
    ),
    tag = "Employees"
)]
pub async fn create_employee(
    State(state): State<AppState>,
    CanManageEmployees(user): CanManageEmployees,
    ClientMeta(meta): ClientMeta,
    ApiJson(request): ApiJson<CreateEmployeeRequest>,
) -> Created<Employee> {
    request.validate()?;
    let repo = create_employee_repository(&state.db);

    let email = request.email.trim().to_lowercase();
    if repo.get_by_email(&email).await?.is_some() {
        return Err(ApiError::Conflict(format!("Email '{}' already in use", email)));
    }
    let number = request.employee_number.trim().to_string();
    if repo.get_by_number(&number).await?.is_some() {
        return Err(ApiError::Conflict(format!(
            "Employee number '{}' already in use",
            number
        )));
    }

    let mut employee = Employee::new(
        number,
        request.first_name.trim(),
        request.last_name.trim(),
        email,
    );
    employee.job_title = clean(request.job_title);
    employee.phone = clean(request.phone);
    employee.department_id = request.department_id;
    employee.location_id = request.location_id;
    check_manager(&state, employee.id, request.manager_id).await?;
    employee.manager_id = request.manager_id;

    let employee = repo.create(&employee).await?;
    info!(employee_id = %employee.id, user = %user.username, "Employee created");

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Create, EntityType::Employee)
                .entity(employee.id, employee.full_name())
                .with_changes(ChangeSet::created(&employee))
                .with_meta(&meta),
        )
        .await;

    created(employee)
}

#[utoipa::path(
    put,
    path = "/api/v1/employees/{id}",
    params(("id" = Uuid, Path, description = "Employee ID")),
    request_body = UpdateEmployeeRequest,
    responses(
        (status = 200, description = "Employee updated"),
        (status = 404, description = "Not found", body = crate::error::ErrorResponse)
    ),
    tag = "Employees"
)]
pub async fn update_employee(
    State(state): State<AppState>,
    CanManageEmployees(user): CanManageEmployees,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<UpdateEmployeeRequest>,
) -> ApiResult<Employee> {
    request.validate()?;
    let repo = create_employee_repository(&state.db);
    let old = load_employee(&state, id).await?;
    let mut employee = old.clone();

    if let Some(email) = clean(request.email).map(|e| e.to_lowercase()) {
        if email != employee.email {
            if repo.get_by_email(&email).await?.is_some() {
                return Err(ApiError::Conflict(format!("Email '{}' already in use", email)));
            }
            employee.email = email;
        }
    }
    if let Some(number) = clean(request.employee_number) {
        if number != employee.employee_number {
            if repo.get_by_number(&number).await?.is_some() {
                return Err(ApiError::Conflict(format!(
                    "Employee number '{}' already in use",
                    number
                )));
            }
            employee.employee_number = number;
        }
    }
    if let Some(first) = clean(request.first_name) {
        employee.first_name = first;
    }
    if let Some(last) = clean(request.last_name) {
        employee.last_name = last;
    }
    patch_text(&mut employee.job_title, request.job_title);
    patch_text(&mut employee.phone, request.phone);
    patch(&mut employee.department_id, request.department_id);
    patch(&mut employee.location_id, request.location_id);
    if let Some(manager_id) = request.manager_id {
        check_manager(&state, id, manager_id).await?;
        employee.manager_id = manager_id;
    }
    if let Some(active) = request.active {
        employee.active = active;
    }
    employee.updated_at = Utc::now();

    let employee = repo.save(&employee).await?;

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Update, EntityType::Employee)
                .entity(employee.id, employee.full_name())
                .with_changes(ChangeSet::between(&old, &employee))
                .with_meta(&meta),
        )
        .await;

    ok(employee)
}

/// Marks the employee inactive. Inactive employees cannot use the portal.
#[utoipa::path(
    post,
    path = "/api/v1/employees/{id}/deactivate",
    params(("id" = Uuid, Path, description = "Employee ID")),
    responses((status = 200, description = "Employee deactivated")),
    tag = "Employees"
)]
pub async fn deactivate_employee(
    State(state): State<AppState>,
    CanManageEmployees(user): CanManageEmployees,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Employee> {
    let old = load_employee(&state, id).await?;
    if !old.active {
        return ok(old);
    }
    let mut employee = old.clone();
    employee.active = false;
    employee.updated_at = Utc::now();
    let employee = create_employee_repository(&state.db).save(&employee).await?;
    info!(employee_id = %id, "Employee deactivated");

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Update, EntityType::Employee)
                .entity(employee.id, employee.full_name())
                .with_changes(ChangeSet::between(&old, &employee))
                .with_meta(&meta),
        )
        .await;

    ok(employee)
}

#[utoipa::path(
    delete,
    path = "/api/v1/employees/{id}",
    params(("id" = Uuid, Path, description = "Employee ID")),
    responses(
        (status = 200, description = "Employee deleted"),
        (status = 409, description = "Employee still holds assets", body = crate::error::ErrorResponse)
    ),
    tag = "Employees"
)]
pub async fn delete_employee(
    State(state): State<AppState>,
    CanManageEmployees(user): CanManageEmployees,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Done> {
    let employee = load_employee(&state, id).await?;
    let held = create_asset_repository(&state.db)
        .list_for_employee(id)
        .await?;
    if !held.is_empty() {
        return Err(ApiError::Conflict(format!(
            "{} still holds {} asset(s); unassign them first",
            employee.full_name(),
            held.len()
        )));
    }

    if !create_employee_repository(&state.db).delete(id).await? {
        return Err(ApiError::not_found("Employee", id));
    }
    info!(employee_id = %id, user = %user.username, "Employee deleted");

    state
        .audit(
            AuditEntry::new(&Actor::user(&user), AuditAction::Delete, EntityType::Employee)
                .entity(employee.id, employee.full_name())
                .with_changes(ChangeSet::deleted(&employee))
                .with_meta(&meta),
        )
        .await;

    ok(Done { id })
}
