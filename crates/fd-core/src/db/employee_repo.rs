use super::convert::{fmt_ts, opt_uuid, parse_opt_uuid, parse_ts, parse_uuid};
use super::{make_like_pattern, DbError, DbPool, PaginatedResult, Pagination};
use crate::models::{Employee, EmployeeFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait EmployeeRepository: Send + Sync {
    async fn create(&self, employee: &Employee) -> Result<Employee, DbError>;

    async fn get(&self, id: Uuid) -> Result<Option<Employee>, DbError>;

    /// Case-insensitive.
    async fn get_by_email(&self, email: &str) -> Result<Option<Employee>, DbError>;

    async fn get_by_number(&self, employee_number: &str) -> Result<Option<Employee>, DbError>;

    async fn list(
        &self,
        filter: &EmployeeFilter,
        pagination: &Pagination,
    ) -> Result<PaginatedResult<Employee>, DbError>;

    /// Active employees ordered by name, for pickers.
    async fn list_active(&self) -> Result<Vec<Employee>, DbError>;

    /// Persists everything except the portal password.
    async fn save(&self, employee: &Employee) -> Result<Employee, DbError>;

    async fn delete(&self, id: Uuid) -> Result<bool, DbError>;

    async fn set_portal_password(&self, id: Uuid, password_hash: Option<&str>) -> Result<(), DbError>;
}

const EMPLOYEE_COLUMNS: &str = "id, employee_number, first_name, last_name, email, job_title, phone, department_id, location_id, manager_id, active, portal_password_hash, created_at, updated_at";

pub struct SqliteEmployeeRepository {
    pool: sqlx::SqlitePool,
}

impl SqliteEmployeeRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

const SQLITE_EMPLOYEE_FILTER: &str = r#"
    WHERE (?1 IS NULL OR department_id = ?1)
      AND (?2 IS NULL OR location_id = ?2)
      AND (?3 IS NULL OR active = ?3)
      AND (?4 IS NULL
           OR first_name LIKE ?4 ESCAPE '\'
           OR last_name LIKE ?4 ESCAPE '\'
           OR email LIKE ?4 ESCAPE '\'
           OR employee_number LIKE ?4 ESCAPE '\')
"#;

macro_rules! bind_sqlite_employee_filter {
    ($query:expr, $filter:expr) => {
        $query
            .bind(opt_uuid($filter.department_id))
            .bind(opt_uuid($filter.location_id))
            .bind($filter.active)
            .bind($filter.search.as_deref().map(make_like_pattern))
    };
}

#[async_trait]
impl EmployeeRepository for SqliteEmployeeRepository {
    async fn create(&self, employee: &Employee) -> Result<Employee, DbError> {
        sqlx::query(&format!(
            "INSERT INTO employees ({EMPLOYEE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(employee.id.to_string())
        .bind(&employee.employee_number)
        .bind(&employee.first_name)
        .bind(&employee.last_name)
        .bind(&employee.email)
        .bind(&employee.job_title)
        .bind(&employee.phone)
        .bind(opt_uuid(employee.department_id))
        .bind(opt_uuid(employee.location_id))
        .bind(opt_uuid(employee.manager_id))
        .bind(employee.active)
        .bind(&employee.portal_password_hash)
        .bind(fmt_ts(employee.created_at))
        .bind(fmt_ts(employee.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(employee.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Employee>, DbError> {
        let row: Option<SqliteEmployeeRow> =
            sqlx::query_as(&format!("SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Employee>, DbError> {
        let row: Option<SqliteEmployeeRow> = sqlx::query_as(&format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE lower(email) = lower(?)"
        ))
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_number(&self, employee_number: &str) -> Result<Option<Employee>, DbError> {
        let row: Option<SqliteEmployeeRow> = sqlx::query_as(&format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE employee_number = ?"
        ))
        .bind(employee_number)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(
        &self,
        filter: &EmployeeFilter,
        pagination: &Pagination,
    ) -> Result<PaginatedResult<Employee>, DbError> {
        let count_sql = format!("SELECT COUNT(*) FROM employees {SQLITE_EMPLOYEE_FILTER}");
        let total: i64 = bind_sqlite_employee_filter!(sqlx::query_scalar(&count_sql), filter)
            .fetch_one(&self.pool)
            .await?;

        let list_sql = format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees {SQLITE_EMPLOYEE_FILTER} ORDER BY last_name, first_name LIMIT ?5 OFFSET ?6"
        );
        let rows: Vec<SqliteEmployeeRow> =
            bind_sqlite_employee_filter!(sqlx::query_as(&list_sql), filter)
                .bind(pagination.limit())
                .bind(pagination.offset())
                .fetch_all(&self.pool)
                .await?;

        let items = rows
            .into_iter()
            .map(TryInto::try_into)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PaginatedResult::new(items, total as u64, pagination))
    }

    async fn list_active(&self) -> Result<Vec<Employee>, DbError> {
        let rows: Vec<SqliteEmployeeRow> = sqlx::query_as(&format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE active = 1 ORDER BY last_name, first_name"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save(&self, employee: &Employee) -> Result<Employee, DbError> {
        let updated_at = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE employees SET
                employee_number = ?, first_name = ?, last_name = ?, email = ?, job_title = ?,
                phone = ?, department_id = ?, location_id = ?, manager_id = ?, active = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&employee.employee_number)
        .bind(&employee.first_name)
        .bind(&employee.last_name)
        .bind(&employee.email)
        .bind(&employee.job_title)
        .bind(&employee.phone)
        .bind(opt_uuid(employee.department_id))
        .bind(opt_uuid(employee.location_id))
        .bind(opt_uuid(employee.manager_id))
        .bind(employee.active)
        .bind(fmt_ts(updated_at))
        .bind(employee.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Employee", employee.id));
        }
        Ok(Employee {
            updated_at,
            ..employee.clone()
        })
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM employees WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_portal_password(&self, id: Uuid, password_hash: Option<&str>) -> Result<(), DbError> {
        let result =
            sqlx::query("UPDATE employees SET portal_password_hash = ?, updated_at = ? WHERE id = ?")
                .bind(password_hash)
                .bind(fmt_ts(Utc::now()))
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Employee", id));
        }
        Ok(())
    }
}

pub struct PgEmployeeRepository {
    pool: sqlx::PgPool,
}

impl PgEmployeeRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

const PG_EMPLOYEE_FILTER: &str = r#"
    WHERE ($1::uuid IS NULL OR department_id = $1)
      AND ($2::uuid IS NULL OR location_id = $2)
      AND ($3::boolean IS NULL OR active = $3)
      AND ($4::text IS NULL
           OR first_name ILIKE $4
           OR last_name ILIKE $4
           OR email ILIKE $4
           OR employee_number ILIKE $4)
"#;

macro_rules! bind_pg_employee_filter {
    ($query:expr, $filter:expr) => {
        $query
            .bind($filter.department_id)
            .bind($filter.location_id)
            .bind($filter.active)
            .bind($filter.search.as_deref().map(make_like_pattern))
    };
}

#[async_trait]
impl EmployeeRepository for PgEmployeeRepository {
    async fn create(&self, employee: &Employee) -> Result<Employee, DbError> {
        sqlx::query(&format!(
            "INSERT INTO employees ({EMPLOYEE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(employee.id)
        .bind(&employee.employee_number)
        .bind(&employee.first_name)
        .bind(&employee.last_name)
        .bind(&employee.email)
        .bind(&employee.job_title)
        .bind(&employee.phone)
        .bind(employee.department_id)
        .bind(employee.location_id)
        .bind(employee.manager_id)
        .bind(employee.active)
        .bind(&employee.portal_password_hash)
        .bind(employee.created_at)
        .bind(employee.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(employee.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Employee>, DbError> {
        let row: Option<PgEmployeeRow> =
            sqlx::query_as(&format!("SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Into::into))
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Employee>, DbError> {
        let row: Option<PgEmployeeRow> = sqlx::query_as(&format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE lower(email) = lower($1)"
        ))
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn get_by_number(&self, employee_number: &str) -> Result<Option<Employee>, DbError> {
        let row: Option<PgEmployeeRow> = sqlx::query_as(&format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE employee_number = $1"
        ))
        .bind(employee_number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list(
        &self,
        filter: &EmployeeFilter,
        pagination: &Pagination,
    ) -> Result<PaginatedResult<Employee>, DbError> {
        let count_sql = format!("SELECT COUNT(*) FROM employees {PG_EMPLOYEE_FILTER}");
        let total: i64 = bind_pg_employee_filter!(sqlx::query_scalar(&count_sql), filter)
            .fetch_one(&self.pool)
            .await?;

        let list_sql = format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees {PG_EMPLOYEE_FILTER} ORDER BY last_name, first_name LIMIT $5 OFFSET $6"
        );
        let rows: Vec<PgEmployeeRow> = bind_pg_employee_filter!(sqlx::query_as(&list_sql), filter)
            .bind(pagination.limit())
            .bind(pagination.offset())
            .fetch_all(&self.pool)
            .await?;

        let items = rows.into_iter().map(Into::into).collect();
        Ok(PaginatedResult::new(items, total as u64, pagination))
    }

    async fn list_active(&self) -> Result<Vec<Employee>, DbError> {
        let rows: Vec<PgEmployeeRow> = sqlx::query_as(&format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE active ORDER BY last_name, first_name"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn save(&self, employee: &Employee) -> Result<Employee, DbError> {
        let row: Option<PgEmployeeRow> = sqlx::query_as(&format!(
            r#"
            UPDATE employees SET
                employee_number = $1, first_name = $2, last_name = $3, email = $4, job_title = $5,
                phone = $6, department_id = $7, location_id = $8, manager_id = $9, active = $10,
                updated_at = NOW()
            WHERE id = $11
            RETURNING {EMPLOYEE_COLUMNS}
            "#
        ))
        .bind(&employee.employee_number)
        .bind(&employee.first_name)
        .bind(&employee.last_name)
        .bind(&employee.email)
        .bind(&employee.job_title)
        .bind(&employee.phone)
        .bind(employee.department_id)
        .bind(employee.location_id)
        .bind(employee.manager_id)
        .bind(employee.active)
        .bind(employee.id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Into::into)
            .ok_or_else(|| DbError::not_found("Employee", employee.id))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM employees WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_portal_password(&self, id: Uuid, password_hash: Option<&str>) -> Result<(), DbError> {
        let result = sqlx::query(
            "UPDATE employees SET portal_password_hash = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(password_hash)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Employee", id));
        }
        Ok(())
    }
}

pub fn create_employee_repository(pool: &DbPool) -> Box<dyn EmployeeRepository> {
    match pool {
        DbPool::Sqlite(pool) => Box::new(SqliteEmployeeRepository::new(pool.clone())),
        DbPool::Postgres(pool) => Box::new(PgEmployeeRepository::new(pool.clone())),
    }
}

#[derive(sqlx::FromRow)]
struct SqliteEmployeeRow {
    id: String,
    employee_number: String,
    first_name: String,
    last_name: String,
    email: String,
    job_title: Option<String>,
    phone: Option<String>,
    department_id: Option<String>,
    location_id: Option<String>,
    manager_id: Option<String>,
    active: bool,
    portal_password_hash: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteEmployeeRow> for Employee {
    type Error = DbError;

    fn try_from(row: SqliteEmployeeRow) -> Result<Self, Self::Error> {
        Ok(Employee {
            id: parse_uuid(&row.id)?,
            employee_number: row.employee_number,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            job_title: row.job_title,
            phone: row.phone,
            department_id: parse_opt_uuid(row.department_id)?,
            location_id: parse_opt_uuid(row.location_id)?,
            manager_id: parse_opt_uuid(row.manager_id)?,
            active: row.active,
            portal_password_hash: row.portal_password_hash,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgEmployeeRow {
    id: Uuid,
    employee_number: String,
    first_name: String,
    last_name: String,
    email: String,
    job_title: Option<String>,
    phone: Option<String>,
    department_id: Option<Uuid>,
    location_id: Option<Uuid>,
    manager_id: Option<Uuid>,
    active: bool,
    portal_password_hash: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PgEmployeeRow> for Employee {
    fn from(row: PgEmployeeRow) -> Self {
        Employee {
            id: row.id,
            employee_number: row.employee_number,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            job_title: row.job_title,
            phone: row.phone,
            department_id: row.department_id,
            location_id: row.location_id,
            manager_id: row.manager_id,
            active: row.active,
            portal_password_hash: row.portal_password_hash,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_organization_repository, test_pool};
    use crate::models::Department;

    #[tokio::test]
    async fn test_lookup_by_email_ignores_case() {
        let pool = test_pool().await;
        let repo = create_employee_repository(&pool);
        let emp = Employee::new("E-001", "Ada", "Lovelace", "Ada@Example.com");
        repo.create(&emp).await.unwrap();

        let found = repo.get_by_email(" ada@example.com ").await.unwrap().unwrap();
        assert_eq!(found.id, emp.id);
        assert_eq!(
            repo.get_by_number("E-001").await.unwrap().unwrap().full_name(),
            "Ada Lovelace"
        );
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates() {
        let pool = test_pool().await;
        let orgs = create_organization_repository(&pool);
        let repo = create_employee_repository(&pool);

        let dept = Department::new("IT");
        orgs.create_department(&dept).await.unwrap();

        for i in 0..5 {
            let mut emp = Employee::new(
                format!("E-{i:03}"),
                "First",
                format!("Last{i}"),
                format!("e{i}@example.com"),
            );
            if i % 2 == 0 {
                emp.department_id = Some(dept.id);
            }
            if i == 4 {
                emp.active = false;
            }
            repo.create(&emp).await.unwrap();
        }

        let page = repo
            .list(&EmployeeFilter::default(), &Pagination::new(1, 2))
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page.total_pages, 3);

        let in_dept = repo
            .list(
                &EmployeeFilter {
                    department_id: Some(dept.id),
                    active: Some(true),
                    ..Default::default()
                },
                &Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(in_dept.total, 2);

        let searched = repo
            .list(
                &EmployeeFilter {
                    search: Some("last3".into()),
                    ..Default::default()
                },
                &Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(searched.items[0].employee_number, "E-003");

        assert_eq!(repo.list_active().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_portal_password_is_kept_by_save() {
        let pool = test_pool().await;
        let repo = create_employee_repository(&pool);
        let mut emp = Employee::new("E-9", "Grace", "Hopper", "grace@example.com");
        repo.create(&emp).await.unwrap();

        repo.set_portal_password(emp.id, Some("hash")).await.unwrap();
        emp.job_title = Some("Admiral".into());
        repo.save(&emp).await.unwrap();

        let loaded = repo.get(emp.id).await.unwrap().unwrap();
        assert_eq!(loaded.portal_password_hash.as_deref(), Some("hash"));
        assert!(loaded.can_use_portal());
        assert_eq!(loaded.job_title.as_deref(), Some("Admiral"));
    }
}
