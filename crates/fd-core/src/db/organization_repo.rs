//! Departments and locations.

use super::convert::{fmt_ts, parse_ts, parse_uuid};
use super::{DbError, DbPool};
use crate::models::{Department, Location};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait OrganizationRepository: Send + Sync {
    async fn create_department(&self, department: &Department) -> Result<Department, DbError>;
    async fn get_department(&self, id: Uuid) -> Result<Option<Department>, DbError>;
    async fn list_departments(&self) -> Result<Vec<Department>, DbError>;
    async fn save_department(&self, department: &Department) -> Result<Department, DbError>;
    async fn delete_department(&self, id: Uuid) -> Result<bool, DbError>;

    async fn create_location(&self, location: &Location) -> Result<Location, DbError>;
    async fn get_location(&self, id: Uuid) -> Result<Option<Location>, DbError>;
    async fn list_locations(&self) -> Result<Vec<Location>, DbError>;
    async fn save_location(&self, location: &Location) -> Result<Location, DbError>;
    async fn delete_location(&self, id: Uuid) -> Result<bool, DbError>;
}

pub struct SqliteOrganizationRepository {
    pool: sqlx::SqlitePool,
}

impl SqliteOrganizationRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrganizationRepository for SqliteOrganizationRepository {
    async fn create_department(&self, department: &Department) -> Result<Department, DbError> {
        sqlx::query(
            "INSERT INTO departments (id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(department.id.to_string())
        .bind(&department.name)
        .bind(&department.description)
        .bind(fmt_ts(department.created_at))
        .bind(fmt_ts(department.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(department.clone())
    }

    async fn get_department(&self, id: Uuid) -> Result<Option<Department>, DbError> {
        let row: Option<SqliteDepartmentRow> = sqlx::query_as(
            "SELECT id, name, description, created_at, updated_at FROM departments WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_departments(&self) -> Result<Vec<Department>, DbError> {
        let rows: Vec<SqliteDepartmentRow> = sqlx::query_as(
            "SELECT id, name, description, created_at, updated_at FROM departments ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_department(&self, department: &Department) -> Result<Department, DbError> {
        let updated_at = Utc::now();
        let result =
            sqlx::query("UPDATE departments SET name = ?, description = ?, updated_at = ? WHERE id = ?")
                .bind(&department.name)
                .bind(&department.description)
                .bind(fmt_ts(updated_at))
                .bind(department.id.to_string())
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Department", department.id));
        }
        Ok(Department {
            updated_at,
            ..department.clone()
        })
    }

    async fn delete_department(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM departments WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_location(&self, location: &Location) -> Result<Location, DbError> {
        sqlx::query(
            "INSERT INTO locations (id, name, address, floor, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(location.id.to_string())
        .bind(&location.name)
        .bind(&location.address)
        .bind(&location.floor)
        .bind(fmt_ts(location.created_at))
        .bind(fmt_ts(location.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(location.clone())
    }

    async fn get_location(&self, id: Uuid) -> Result<Option<Location>, DbError> {
        let row: Option<SqliteLocationRow> = sqlx::query_as(
            "SELECT id, name, address, floor, created_at, updated_at FROM locations WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_locations(&self) -> Result<Vec<Location>, DbError> {
        let rows: Vec<SqliteLocationRow> = sqlx::query_as(
            "SELECT id, name, address, floor, created_at, updated_at FROM locations ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_location(&self, location: &Location) -> Result<Location, DbError> {
        let updated_at = Utc::now();
        let result = sqlx::query(
            "UPDATE locations SET name = ?, address = ?, floor = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&location.name)
        .bind(&location.address)
        .bind(&location.floor)
        .bind(fmt_ts(updated_at))
        .bind(location.id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Location", location.id));
        }
        Ok(Location {
            updated_at,
            ..location.clone()
        })
    }

    async fn delete_location(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM locations WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

pub struct PgOrganizationRepository {
    pool: sqlx::PgPool,
}

impl PgOrganizationRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrganizationRepository for PgOrganizationRepository {
    async fn create_department(&self, department: &Department) -> Result<Department, DbError> {
        sqlx::query(
            "INSERT INTO departments (id, name, description, created_at, updated_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(department.id)
        .bind(&department.name)
        .bind(&department.description)
        .bind(department.created_at)
        .bind(department.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(department.clone())
    }

    async fn get_department(&self, id: Uuid) -> Result<Option<Department>, DbError> {
        let row: Option<PgDepartmentRow> = sqlx::query_as(
            "SELECT id, name, description, created_at, updated_at FROM departments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_departments(&self) -> Result<Vec<Department>, DbError> {
        let rows: Vec<PgDepartmentRow> = sqlx::query_as(
            "SELECT id, name, description, created_at, updated_at FROM departments ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn save_department(&self, department: &Department) -> Result<Department, DbError> {
        let row: Option<PgDepartmentRow> = sqlx::query_as(
            r#"
            UPDATE departments SET name = $1, description = $2, updated_at = NOW()
            WHERE id = $3
            RETURNING id, name, description, created_at, updated_at
            "#,
        )
        .bind(&department.name)
        .bind(&department.description)
        .bind(department.id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Into::into)
            .ok_or_else(|| DbError::not_found("Department", department.id))
    }

    async fn delete_department(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM departments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_location(&self, location: &Location) -> Result<Location, DbError> {
        sqlx::query(
            "INSERT INTO locations (id, name, address, floor, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(location.id)
        .bind(&location.name)
        .bind(&location.address)
        .bind(&location.floor)
        .bind(location.created_at)
        .bind(location.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(location.clone())
    }

    async fn get_location(&self, id: Uuid) -> Result<Option<Location>, DbError> {
        let row: Option<PgLocationRow> = sqlx::query_as(
            "SELECT id, name, address, floor, created_at, updated_at FROM locations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_locations(&self) -> Result<Vec<Location>, DbError> {
        let rows: Vec<PgLocationRow> = sqlx::query_as(
            "SELECT id, name, address, floor, created_at, updated_at FROM locations ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn save_location(&self, location: &Location) -> Result<Location, DbError> {
        let row: Option<PgLocationRow> = sqlx::query_as(
            r#"
            UPDATE locations SET name = $1, address = $2, floor = $3, updated_at = NOW()
            WHERE id = $4
            RETURNING id, name, address, floor, created_at, updated_at
            "#,
        )
        .bind(&location.name)
        .bind(&location.address)
        .bind(&location.floor)
        .bind(location.id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Into::into)
            .ok_or_else(|| DbError::not_found("Location", location.id))
    }

    async fn delete_location(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM locations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

pub fn create_organization_repository(pool: &DbPool) -> Box<dyn OrganizationRepository> {
    match pool {
        DbPool::Sqlite(pool) => Box::new(SqliteOrganizationRepository::new(pool.clone())),
        DbPool::Postgres(pool) => Box::new(PgOrganizationRepository::new(pool.clone())),
    }
}

#[derive(sqlx::FromRow)]
struct SqliteDepartmentRow {
    id: String,
    name: String,
    description: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteDepartmentRow> for Department {
    type Error = DbError;

    fn try_from(row: SqliteDepartmentRow) -> Result<Self, Self::Error> {
        Ok(Department {
            id: parse_uuid(&row.id)?,
            name: row.name,
            description: row.description,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgDepartmentRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PgDepartmentRow> for Department {
    fn from(row: PgDepartmentRow) -> Self {
        Department {
            id: row.id,
            name: row.name,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SqliteLocationRow {
    id: String,
    name: String,
    address: Option<String>,
    floor: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteLocationRow> for Location {
    type Error = DbError;

    fn try_from(row: SqliteLocationRow) -> Result<Self, Self::Error> {
        Ok(Location {
            id: parse_uuid(&row.id)?,
            name: row.name,
            address: row.address,
            floor: row.floor,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgLocationRow {
    id: Uuid,
    name: String,
    address: Option<String>,
    floor: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PgLocationRow> for Location {
    fn from(row: PgLocationRow) -> Self {
        Location {
            id: row.id,
            name: row.name,
            address: row.address,
            floor: row.floor,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_department_crud() {
        let pool = test_pool().await;
        let repo = create_organization_repository(&pool);

        let mut dept = Department::new("Engineering");
        repo.create_department(&dept).await.unwrap();
        repo.create_department(&Department::new("Accounting"))
            .await
            .unwrap();

        let names: Vec<_> = repo
            .list_departments()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["Accounting", "Engineering"]);

        dept.description = Some("Builds things".into());
        repo.save_department(&dept).await.unwrap();
        let loaded = repo.get_department(dept.id).await.unwrap().unwrap();
        assert_eq!(loaded.description.as_deref(), Some("Builds things"));

        assert!(repo.delete_department(dept.id).await.unwrap());
        assert!(repo.get_department(dept.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_missing_location_is_not_found() {
        let pool = test_pool().await;
        let repo = create_organization_repository(&pool);
        let err = repo.save_location(&Location::new("Ghost")).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
