use super::convert::{fmt_opt_ts, fmt_ts, opt_uuid, parse_enum, parse_opt_ts, parse_opt_uuid, parse_ts, parse_uuid};
use super::{DbError, DbPool};
use crate::models::{CustodyFilter, CustodyItem, CustodyStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait CustodyRepository: Send + Sync {
    async fn create(&self, item: &CustodyItem) -> Result<CustodyItem, DbError>;
    async fn get(&self, id: Uuid) -> Result<Option<CustodyItem>, DbError>;
    /// Newest issue first.
    async fn list(&self, filter: &CustodyFilter) -> Result<Vec<CustodyItem>, DbError>;
    async fn save(&self, item: &CustodyItem) -> Result<CustodyItem, DbError>;
    /// The unreturned hand-off for an asset, if any.
    async fn open_for_asset(&self, asset_id: Uuid) -> Result<Option<CustodyItem>, DbError>;
}

const CUSTODY_COLUMNS: &str =
    "id, asset_id, employee_id, issued_by, issued_at, status, notes, acknowledged_at, returned_at";

pub struct SqliteCustodyRepository {
    pool: sqlx::SqlitePool,
}

impl SqliteCustodyRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CustodyRepository for SqliteCustodyRepository {
    async fn create(&self, item: &CustodyItem) -> Result<CustodyItem, DbError> {
        sqlx::query(&format!(
            "INSERT INTO custody_items ({CUSTODY_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(item.id.to_string())
        .bind(item.asset_id.to_string())
        .bind(item.employee_id.to_string())
        .bind(opt_uuid(item.issued_by))
        .bind(fmt_ts(item.issued_at))
        .bind(item.status.as_db_str())
        .bind(&item.notes)
        .bind(fmt_opt_ts(item.acknowledged_at))
        .bind(fmt_opt_ts(item.returned_at))
        .execute(&self.pool)
        .await?;
        Ok(item.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<CustodyItem>, DbError> {
        let row: Option<SqliteCustodyRow> =
            sqlx::query_as(&format!("SELECT {CUSTODY_COLUMNS} FROM custody_items WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self, filter: &CustodyFilter) -> Result<Vec<CustodyItem>, DbError> {
        let rows: Vec<SqliteCustodyRow> = sqlx::query_as(&format!(
            r#"
            SELECT {CUSTODY_COLUMNS} FROM custody_items
            WHERE (?1 IS NULL OR employee_id = ?1)
              AND (?2 IS NULL OR asset_id = ?2)
              AND (?3 IS NULL OR status = ?3)
            ORDER BY issued_at DESC
            "#
        ))
        .bind(opt_uuid(filter.employee_id))
        .bind(opt_uuid(filter.asset_id))
        .bind(filter.status.map(|s| s.as_db_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save(&self, item: &CustodyItem) -> Result<CustodyItem, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE custody_items SET status = ?, notes = ?, acknowledged_at = ?, returned_at = ?
            WHERE id = ?
            "#,
        )
        .bind(item.status.as_db_str())
        .bind(&item.notes)
        .bind(fmt_opt_ts(item.acknowledged_at))
        .bind(fmt_opt_ts(item.returned_at))
        .bind(item.id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("CustodyItem", item.id));
        }
        Ok(item.clone())
    }

    async fn open_for_asset(&self, asset_id: Uuid) -> Result<Option<CustodyItem>, DbError> {
        let row: Option<SqliteCustodyRow> = sqlx::query_as(&format!(
            r#"
            SELECT {CUSTODY_COLUMNS} FROM custody_items
            WHERE asset_id = ? AND status != 'returned'
            ORDER BY issued_at DESC
            LIMIT 1
            "#
        ))
        .bind(asset_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }
}

pub struct PgCustodyRepository {
    pool: sqlx::PgPool,
}

impl PgCustodyRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CustodyRepository for PgCustodyRepository {
    async fn create(&self, item: &CustodyItem) -> Result<CustodyItem, DbError> {
        sqlx::query(&format!(
            "INSERT INTO custody_items ({CUSTODY_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(item.id)
        .bind(item.asset_id)
        .bind(item.employee_id)
        .bind(item.issued_by)
        .bind(item.issued_at)
        .bind(item.status.as_db_str())
        .bind(&item.notes)
        .bind(item.acknowledged_at)
        .bind(item.returned_at)
        .execute(&self.pool)
        .await?;
        Ok(item.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<CustodyItem>, DbError> {
        let row: Option<PgCustodyRow> =
            sqlx::query_as(&format!("SELECT {CUSTODY_COLUMNS} FROM custody_items WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self, filter: &CustodyFilter) -> Result<Vec<CustodyItem>, DbError> {
        let rows: Vec<PgCustodyRow> = sqlx::query_as(&format!(
            r#"
            SELECT {CUSTODY_COLUMNS} FROM custody_items
            WHERE ($1::uuid IS NULL OR employee_id = $1)
              AND ($2::uuid IS NULL OR asset_id = $2)
              AND ($3::text IS NULL OR status = $3)
            ORDER BY issued_at DESC
            "#
        ))
        .bind(filter.employee_id)
        .bind(filter.asset_id)
        .bind(filter.status.map(|s| s.as_db_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save(&self, item: &CustodyItem) -> Result<CustodyItem, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE custody_items SET status = $1, notes = $2, acknowledged_at = $3, returned_at = $4
            WHERE id = $5
            "#,
        )
        .bind(item.status.as_db_str())
        .bind(&item.notes)
        .bind(item.acknowledged_at)
        .bind(item.returned_at)
        .bind(item.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("CustodyItem", item.id));
        }
        Ok(item.clone())
    }

    async fn open_for_asset(&self, asset_id: Uuid) -> Result<Option<CustodyItem>, DbError> {
        let row: Option<PgCustodyRow> = sqlx::query_as(&format!(
            r#"
            SELECT {CUSTODY_COLUMNS} FROM custody_items
            WHERE asset_id = $1 AND status <> 'returned'
            ORDER BY issued_at DESC
            LIMIT 1
            "#
        ))
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }
}

pub fn create_custody_repository(pool: &DbPool) -> Box<dyn CustodyRepository> {
    match pool {
        DbPool::Sqlite(pool) => Box::new(SqliteCustodyRepository::new(pool.clone())),
        DbPool::Postgres(pool) => Box::new(PgCustodyRepository::new(pool.clone())),
    }
}

#[derive(sqlx::FromRow)]
struct SqliteCustodyRow {
    id: String,
    asset_id: String,
    employee_id: String,
    issued_by: Option<String>,
    issued_at: String,
    status: String,
    notes: Option<String>,
    acknowledged_at: Option<String>,
    returned_at: Option<String>,
}

impl TryFrom<SqliteCustodyRow> for CustodyItem {
    type Error = DbError;

    fn try_from(row: SqliteCustodyRow) -> Result<Self, Self::Error> {
        Ok(CustodyItem {
            id: parse_uuid(&row.id)?,
            asset_id: parse_uuid(&row.asset_id)?,
            employee_id: parse_uuid(&row.employee_id)?,
            issued_by: parse_opt_uuid(row.issued_by)?,
            issued_at: parse_ts(&row.issued_at)?,
            status: parse_enum(&row.status, CustodyStatus::from_db_str, "custody status")?,
            notes: row.notes,
            acknowledged_at: parse_opt_ts(row.acknowledged_at)?,
            returned_at: parse_opt_ts(row.returned_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgCustodyRow {
    id: Uuid,
    asset_id: Uuid,
    employee_id: Uuid,
    issued_by: Option<Uuid>,
    issued_at: DateTime<Utc>,
    status: String,
    notes: Option<String>,
    acknowledged_at: Option<DateTime<Utc>>,
    returned_at: Option<DateTime<Utc>>,
}

impl TryFrom<PgCustodyRow> for CustodyItem {
    type Error = DbError;

    fn try_from(row: PgCustodyRow) -> Result<Self, Self::Error> {
        Ok(CustodyItem {
            id: row.id,
            asset_id: row.asset_id,
            employee_id: row.employee_id,
            issued_by: row.issued_by,
            issued_at: row.issued_at,
            status: parse_enum(&row.status, CustodyStatus::from_db_str, "custody status")?,
            notes: row.notes,
            acknowledged_at: row.acknowledged_at,
            returned_at: row.returned_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_asset_repository, create_employee_repository, test_pool};
    use crate::models::{Asset, AssetType, Employee};

    #[tokio::test]
    async fn test_open_custody_follows_lifecycle() {
        let pool = test_pool().await;
        let employee = Employee::new("E-7", "Ada", "Lovelace", "ada@example.com");
        create_employee_repository(&pool).create(&employee).await.unwrap();
        let asset = Asset::new("LT-100", "MacBook", AssetType::Laptop);
        create_asset_repository(&pool).create(&asset).await.unwrap();
        let repo = create_custody_repository(&pool);

        assert!(repo.open_for_asset(asset.id).await.unwrap().is_none());

        let mut item = CustodyItem::issue(asset.id, employee.id, None);
        repo.create(&item).await.unwrap();
        let open = repo.open_for_asset(asset.id).await.unwrap().unwrap();
        assert_eq!(open.status, CustodyStatus::PendingAcknowledgment);

        item.acknowledge(Utc::now()).unwrap();
        repo.save(&item).await.unwrap();
        let mine = repo
            .list(&CustodyFilter {
                employee_id: Some(employee.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert!(mine[0].acknowledged_at.is_some());

        item.mark_returned(Utc::now()).unwrap();
        repo.save(&item).await.unwrap();
        assert!(repo.open_for_asset(asset.id).await.unwrap().is_none());
    }
}
