//! Service catalogue: categories and the items employees can request.

use super::convert::{fmt_ts, opt_uuid, parse_enum, parse_ts, parse_uuid};
use super::{DbError, DbPool};
use crate::models::{ServiceCategory, ServiceItem, TicketPriority};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn create_category(&self, category: &ServiceCategory) -> Result<ServiceCategory, DbError>;
    async fn get_category(&self, id: Uuid) -> Result<Option<ServiceCategory>, DbError>;
    async fn list_categories(&self) -> Result<Vec<ServiceCategory>, DbError>;
    async fn save_category(&self, category: &ServiceCategory) -> Result<ServiceCategory, DbError>;
    /// Deleting a category removes its items.
    async fn delete_category(&self, id: Uuid) -> Result<bool, DbError>;

    async fn create_item(&self, item: &ServiceItem) -> Result<ServiceItem, DbError>;
    async fn get_item(&self, id: Uuid) -> Result<Option<ServiceItem>, DbError>;
    async fn list_items(
        &self,
        category_id: Option<Uuid>,
        active_only: bool,
    ) -> Result<Vec<ServiceItem>, DbError>;
    async fn save_item(&self, item: &ServiceItem) -> Result<ServiceItem, DbError>;
    async fn delete_item(&self, id: Uuid) -> Result<bool, DbError>;
}

const ITEM_COLUMNS: &str =
    "id, category_id, name, description, default_priority, sla_hours, active, created_at, updated_at";

pub struct SqliteCatalogRepository {
    pool: sqlx::SqlitePool,
}

impl SqliteCatalogRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogRepository for SqliteCatalogRepository {
    async fn create_category(&self, category: &ServiceCategory) -> Result<ServiceCategory, DbError> {
        sqlx::query(
            "INSERT INTO service_categories (id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(category.id.to_string())
        .bind(&category.name)
        .bind(&category.description)
        .bind(fmt_ts(category.created_at))
        .bind(fmt_ts(category.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(category.clone())
    }

    async fn get_category(&self, id: Uuid) -> Result<Option<ServiceCategory>, DbError> {
        let row: Option<SqliteCategoryRow> = sqlx::query_as(
            "SELECT id, name, description, created_at, updated_at FROM service_categories WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_categories(&self) -> Result<Vec<ServiceCategory>, DbError> {
        let rows: Vec<SqliteCategoryRow> = sqlx::query_as(
            "SELECT id, name, description, created_at, updated_at FROM service_categories ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_category(&self, category: &ServiceCategory) -> Result<ServiceCategory, DbError> {
        let updated_at = Utc::now();
        let result = sqlx::query(
            "UPDATE service_categories SET name = ?, description = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&category.name)
        .bind(&category.description)
        .bind(fmt_ts(updated_at))
        .bind(category.id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("ServiceCategory", category.id));
        }
        Ok(ServiceCategory {
            updated_at,
            ..category.clone()
        })
    }

    async fn delete_category(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM service_categories WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_item(&self, item: &ServiceItem) -> Result<ServiceItem, DbError> {
        sqlx::query(&format!(
            "INSERT INTO service_items ({ITEM_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(item.id.to_string())
        .bind(item.category_id.to_string())
        .bind(&item.name)
        .bind(&item.description)
        .bind(item.default_priority.as_db_str())
        .bind(item.sla_hours)
        .bind(item.active)
        .bind(fmt_ts(item.created_at))
        .bind(fmt_ts(item.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(item.clone())
    }

    async fn get_item(&self, id: Uuid) -> Result<Option<ServiceItem>, DbError> {
        let row: Option<SqliteItemRow> =
            sqlx::query_as(&format!("SELECT {ITEM_COLUMNS} FROM service_items WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_items(
        &self,
        category_id: Option<Uuid>,
        active_only: bool,
    ) -> Result<Vec<ServiceItem>, DbError> {
        let rows: Vec<SqliteItemRow> = sqlx::query_as(&format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM service_items
            WHERE (?1 IS NULL OR category_id = ?1)
              AND (?2 = 0 OR active = 1)
            ORDER BY name
            "#
        ))
        .bind(opt_uuid(category_id))
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_item(&self, item: &ServiceItem) -> Result<ServiceItem, DbError> {
        let updated_at = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE service_items SET
                category_id = ?, name = ?, description = ?, default_priority = ?,
                sla_hours = ?, active = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(item.category_id.to_string())
        .bind(&item.name)
        .bind(&item.description)
        .bind(item.default_priority.as_db_str())
        .bind(item.sla_hours)
        .bind(item.active)
        .bind(fmt_ts(updated_at))
        .bind(item.id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("ServiceItem", item.id));
        }
        Ok(ServiceItem {
            updated_at,
            ..item.clone()
        })
    }

    async fn delete_item(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM service_items WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

pub struct PgCatalogRepository {
    pool: sqlx::PgPool,
}

impl PgCatalogRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogRepository for PgCatalogRepository {
    async fn create_category(&self, category: &ServiceCategory) -> Result<ServiceCategory, DbError> {
        sqlx::query(
            "INSERT INTO service_categories (id, name, description, created_at, updated_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(category.id)
        .bind(&category.name)
        .bind(&category.description)
        .bind(category.created_at)
        .bind(category.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(category.clone())
    }

    async fn get_category(&self, id: Uuid) -> Result<Option<ServiceCategory>, DbError> {
        let row: Option<PgCategoryRow> = sqlx::query_as(
            "SELECT id, name, description, created_at, updated_at FROM service_categories WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_categories(&self) -> Result<Vec<ServiceCategory>, DbError> {
        let rows: Vec<PgCategoryRow> = sqlx::query_as(
            "SELECT id, name, description, created_at, updated_at FROM service_categories ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn save_category(&self, category: &ServiceCategory) -> Result<ServiceCategory, DbError> {
        let row: Option<PgCategoryRow> = sqlx::query_as(
            r#"
            UPDATE service_categories SET name = $1, description = $2, updated_at = NOW()
            WHERE id = $3
            RETURNING id, name, description, created_at, updated_at
            "#,
        )
        .bind(&category.name)
        .bind(&category.description)
        .bind(category.id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Into::into)
            .ok_or_else(|| DbError::not_found("ServiceCategory", category.id))
    }

    async fn delete_category(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM service_categories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_item(&self, item: &ServiceItem) -> Result<ServiceItem, DbError> {
        sqlx::query(&format!(
            "INSERT INTO service_items ({ITEM_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(item.id)
        .bind(item.category_id)
        .bind(&item.name)
        .bind(&item.description)
        .bind(item.default_priority.as_db_str())
        .bind(item.sla_hours)
        .bind(item.active)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(item.clone())
    }

    async fn get_item(&self, id: Uuid) -> Result<Option<ServiceItem>, DbError> {
        let row: Option<PgItemRow> =
            sqlx::query_as(&format!("SELECT {ITEM_COLUMNS} FROM service_items WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_items(
        &self,
        category_id: Option<Uuid>,
        active_only: bool,
    ) -> Result<Vec<ServiceItem>, DbError> {
        let rows: Vec<PgItemRow> = sqlx::query_as(&format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM service_items
            WHERE ($1::uuid IS NULL OR category_id = $1)
              AND (NOT $2 OR active)
            ORDER BY name
            "#
        ))
        .bind(category_id)
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_item(&self, item: &ServiceItem) -> Result<ServiceItem, DbError> {
        let row: Option<PgItemRow> = sqlx::query_as(&format!(
            r#"
            UPDATE service_items SET
                category_id = $1, name = $2, description = $3, default_priority = $4,
                sla_hours = $5, active = $6, updated_at = NOW()
            WHERE id = $7
            RETURNING {ITEM_COLUMNS}
            "#
        ))
        .bind(item.category_id)
        .bind(&item.name)
        .bind(&item.description)
        .bind(item.default_priority.as_db_str())
        .bind(item.sla_hours)
        .bind(item.active)
        .bind(item.id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into)
            .transpose()?
            .ok_or_else(|| DbError::not_found("ServiceItem", item.id))
    }

    async fn delete_item(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM service_items WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

pub fn create_catalog_repository(pool: &DbPool) -> Box<dyn CatalogRepository> {
    match pool {
        DbPool::Sqlite(pool) => Box::new(SqliteCatalogRepository::new(pool.clone())),
        DbPool::Postgres(pool) => Box::new(PgCatalogRepository::new(pool.clone())),
    }
}

#[derive(sqlx::FromRow)]
struct SqliteCategoryRow {
    id: String,
    name: String,
    description: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteCategoryRow> for ServiceCategory {
    type Error = DbError;

    fn try_from(row: SqliteCategoryRow) -> Result<Self, Self::Error> {
        Ok(ServiceCategory {
            id: parse_uuid(&row.id)?,
            name: row.name,
            description: row.description,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgCategoryRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PgCategoryRow> for ServiceCategory {
    fn from(row: PgCategoryRow) -> Self {
        ServiceCategory {
            id: row.id,
            name: row.name,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SqliteItemRow {
    id: String,
    category_id: String,
    name: String,
    description: Option<String>,
    default_priority: String,
    sla_hours: Option<i32>,
    active: bool,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteItemRow> for ServiceItem {
    type Error = DbError;

    fn try_from(row: SqliteItemRow) -> Result<Self, Self::Error> {
        Ok(ServiceItem {
            id: parse_uuid(&row.id)?,
            category_id: parse_uuid(&row.category_id)?,
            name: row.name,
            description: row.description,
            default_priority: parse_enum(&row.default_priority, TicketPriority::from_db_str, "priority")?,
            sla_hours: row.sla_hours,
            active: row.active,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgItemRow {
    id: Uuid,
    category_id: Uuid,
    name: String,
    description: Option<String>,
    default_priority: String,
    sla_hours: Option<i32>,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PgItemRow> for ServiceItem {
    type Error = DbError;

    fn try_from(row: PgItemRow) -> Result<Self, Self::Error> {
        Ok(ServiceItem {
            id: row.id,
            category_id: row.category_id,
            name: row.name,
            description: row.description,
            default_priority: parse_enum(&row.default_priority, TicketPriority::from_db_str, "priority")?,
            sla_hours: row.sla_hours,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_items_filtered_by_category_and_active() {
        let pool = test_pool().await;
        let repo = create_catalog_repository(&pool);

        let hardware = ServiceCategory::new("Hardware");
        let access = ServiceCategory::new("Access");
        repo.create_category(&hardware).await.unwrap();
        repo.create_category(&access).await.unwrap();

        let mut laptop = ServiceItem::new(hardware.id, "New laptop");
        laptop.sla_hours = Some(48);
        repo.create_item(&laptop).await.unwrap();
        let mut retired = ServiceItem::new(hardware.id, "Fax machine");
        retired.active = false;
        repo.create_item(&retired).await.unwrap();
        repo.create_item(&ServiceItem::new(access.id, "VPN access"))
            .await
            .unwrap();

        assert_eq!(repo.list_items(None, false).await.unwrap().len(), 3);
        assert_eq!(repo.list_items(None, true).await.unwrap().len(), 2);
        let hw = repo.list_items(Some(hardware.id), true).await.unwrap();
        assert_eq!(hw.len(), 1);
        assert_eq!(hw[0].sla_hours, Some(48));
    }

    #[tokio::test]
    async fn test_deleting_category_cascades_to_items() {
        let pool = test_pool().await;
        let repo = create_catalog_repository(&pool);

        let cat = ServiceCategory::new("Software");
        repo.create_category(&cat).await.unwrap();
        let item = ServiceItem::new(cat.id, "IDE licence");
        repo.create_item(&item).await.unwrap();

        assert!(repo.delete_category(cat.id).await.unwrap());
        assert!(repo.get_item(item.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_item_requires_existing_category() {
        let pool = test_pool().await;
        let repo = create_catalog_repository(&pool);
        let err = repo
            .create_item(&ServiceItem::new(Uuid::new_v4(), "Orphan"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Constraint(_)));
    }
}
