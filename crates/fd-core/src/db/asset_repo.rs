//! Asset inventory persistence.
//!
//! Besides CRUD this carries the lookups used by agent check-in
//! ([`AssetRepository::find_by_identity`]), the subnet scanner
//! ([`AssetRepository::list_network_devices`]) and the maintenance sweep
//! ([`AssetRepository::claim_maintenance`]).

use super::convert::{
    fmt_date, fmt_opt_date, fmt_opt_ts, fmt_ts, opt_uuid, parse_enum, parse_opt_date,
    parse_opt_ts, parse_opt_uuid, parse_ts, parse_uuid,
};
use super::ticket_repo::{insert_pg_ticket, insert_sqlite_ticket};
use super::{make_like_pattern, DbError, DbPool, PaginatedResult, Pagination};
use crate::ipam::NetworkDevice;
use crate::models::{AgentReport, Asset, AssetFilter, AssetStatus, AssetType, Ticket};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

#[async_trait]
pub trait AssetRepository: Send + Sync {
    async fn create(&self, asset: &Asset) -> Result<Asset, DbError>;

    async fn get(&self, id: Uuid) -> Result<Option<Asset>, DbError>;

    async fn get_by_tag(&self, asset_tag: &str) -> Result<Option<Asset>, DbError>;

    async fn list(
        &self,
        filter: &AssetFilter,
        pagination: &Pagination,
    ) -> Result<PaginatedResult<Asset>, DbError>;

    async fn list_for_employee(&self, employee_id: Uuid) -> Result<Vec<Asset>, DbError>;

    async fn save(&self, asset: &Asset) -> Result<Asset, DbError>;

    async fn delete(&self, id: Uuid) -> Result<bool, DbError>;

    /// Matches an agent report by serial number, then hostname
    /// (case-insensitive), then MAC address.
    async fn find_by_identity(&self, report: &AgentReport) -> Result<Option<Asset>, DbError>;

    /// Hostname lookup used by agents polling for commands.
    async fn get_by_hostname(&self, hostname: &str) -> Result<Option<Asset>, DbError>;

    /// Assets with a stored IP, joined with the assignee's name, ordered by
    /// asset tag.
    async fn list_network_devices(&self) -> Result<Vec<NetworkDevice>, DbError>;

    /// In-service assets whose next maintenance date is on or before `today`.
    async fn list_maintenance_due(&self, today: NaiveDate) -> Result<Vec<Asset>, DbError>;

    /// Moves the schedule from `observed` to `next` only if nobody else has
    /// moved it first, and inserts `ticket` in the same transaction. Returns
    /// the stored ticket, or `None` when another caller won the claim.
    async fn claim_maintenance(
        &self,
        id: Uuid,
        observed: NaiveDate,
        next: Option<NaiveDate>,
        ticket: &Ticket,
    ) -> Result<Option<Ticket>, DbError>;

    async fn count_by_status(&self) -> Result<Vec<(AssetStatus, i64)>, DbError>;
}

const ASSET_COLUMNS: &str = "id, asset_tag, name, asset_type, status, serial_number, manufacturer, model, hostname, ip_address, mac_address, location_id, assigned_employee_id, purchase_date, purchase_cost, warranty_expires, maintenance_interval_days, next_maintenance_date, last_seen_at, notes, created_at, updated_at";

fn normalize_identity(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn status_counts(rows: Vec<(String, i64)>) -> Result<Vec<(AssetStatus, i64)>, DbError> {
    rows.into_iter()
        .map(|(status, count)| {
            Ok((parse_enum(&status, AssetStatus::from_db_str, "asset status")?, count))
        })
        .collect()
}

pub struct SqliteAssetRepository {
    pool: sqlx::SqlitePool,
}

impl SqliteAssetRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

const SQLITE_ASSET_FILTER: &str = r#"
    WHERE (?1 IS NULL OR status = ?1)
      AND (?2 IS NULL OR asset_type = ?2)
      AND (?3 IS NULL OR assigned_employee_id = ?3)
      AND (?4 IS NULL OR location_id = ?4)
      AND (?5 IS NULL
           OR asset_tag LIKE ?5 ESCAPE '\'
           OR name LIKE ?5 ESCAPE '\'
           OR serial_number LIKE ?5 ESCAPE '\'
           OR hostname LIKE ?5 ESCAPE '\')
"#;

macro_rules! bind_sqlite_asset_filter {
    ($query:expr, $filter:expr) => {
        $query
            .bind($filter.status.map(|s| s.as_db_str()))
            .bind($filter.asset_type.map(|t| t.as_db_str()))
            .bind(opt_uuid($filter.employee_id))
            .bind(opt_uuid($filter.location_id))
            .bind($filter.search.as_deref().map(make_like_pattern))
    };
}

#[async_trait]
impl AssetRepository for SqliteAssetRepository {
    async fn create(&self, asset: &Asset) -> Result<Asset, DbError> {
        sqlx::query(&format!(
            "INSERT INTO assets ({ASSET_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(asset.id.to_string())
        .bind(&asset.asset_tag)
        .bind(&asset.name)
        .bind(asset.asset_type.as_db_str())
        .bind(asset.status.as_db_str())
        .bind(&asset.serial_number)
        .bind(&asset.manufacturer)
        .bind(&asset.model)
        .bind(&asset.hostname)
        .bind(&asset.ip_address)
        .bind(&asset.mac_address)
        .bind(opt_uuid(asset.location_id))
        .bind(opt_uuid(asset.assigned_employee_id))
        .bind(fmt_opt_date(asset.purchase_date))
        .bind(asset.purchase_cost)
        .bind(fmt_opt_date(asset.warranty_expires))
        .bind(asset.maintenance_interval_days)
        .bind(fmt_opt_date(asset.next_maintenance_date))
        .bind(fmt_opt_ts(asset.last_seen_at))
        .bind(&asset.notes)
        .bind(fmt_ts(asset.created_at))
        .bind(fmt_ts(asset.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(asset.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Asset>, DbError> {
        let row: Option<SqliteAssetRow> =
            sqlx::query_as(&format!("SELECT {ASSET_COLUMNS} FROM assets WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_tag(&self, asset_tag: &str) -> Result<Option<Asset>, DbError> {
        let row: Option<SqliteAssetRow> =
            sqlx::query_as(&format!("SELECT {ASSET_COLUMNS} FROM assets WHERE asset_tag = ?"))
                .bind(asset_tag)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(
        &self,
        filter: &AssetFilter,
        pagination: &Pagination,
    ) -> Result<PaginatedResult<Asset>, DbError> {
        let count_sql = format!("SELECT COUNT(*) FROM assets {SQLITE_ASSET_FILTER}");
        let total: i64 = bind_sqlite_asset_filter!(sqlx::query_scalar(&count_sql), filter)
            .fetch_one(&self.pool)
            .await?;

        let list_sql = format!(
            "SELECT {ASSET_COLUMNS} FROM assets {SQLITE_ASSET_FILTER} ORDER BY asset_tag LIMIT ?6 OFFSET ?7"
        );
        let rows: Vec<SqliteAssetRow> = bind_sqlite_asset_filter!(sqlx::query_as(&list_sql), filter)
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

    async fn list_for_employee(&self, employee_id: Uuid) -> Result<Vec<Asset>, DbError> {
        let rows: Vec<SqliteAssetRow> = sqlx::query_as(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE assigned_employee_id = ? ORDER BY asset_tag"
        ))
        .bind(employee_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save(&self, asset: &Asset) -> Result<Asset, DbError> {
        let updated_at = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE assets SET
                asset_tag = ?, name = ?, asset_type = ?, status = ?, serial_number = ?,
                manufacturer = ?, model = ?, hostname = ?, ip_address = ?, mac_address = ?,
                location_id = ?, assigned_employee_id = ?, purchase_date = ?, purchase_cost = ?,
                warranty_expires = ?, maintenance_interval_days = ?, next_maintenance_date = ?,
                last_seen_at = ?, notes = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&asset.asset_tag)
        .bind(&asset.name)
        .bind(asset.asset_type.as_db_str())
        .bind(asset.status.as_db_str())
        .bind(&asset.serial_number)
        .bind(&asset.manufacturer)
        .bind(&asset.model)
        .bind(&asset.hostname)
        .bind(&asset.ip_address)
        .bind(&asset.mac_address)
        .bind(opt_uuid(asset.location_id))
        .bind(opt_uuid(asset.assigned_employee_id))
        .bind(fmt_opt_date(asset.purchase_date))
        .bind(asset.purchase_cost)
        .bind(fmt_opt_date(asset.warranty_expires))
        .bind(asset.maintenance_interval_days)
        .bind(fmt_opt_date(asset.next_maintenance_date))
        .bind(fmt_opt_ts(asset.last_seen_at))
        .bind(&asset.notes)
        .bind(fmt_ts(updated_at))
        .bind(asset.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Asset", asset.id));
        }
        Ok(Asset {
            updated_at,
            ..asset.clone()
        })
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM assets WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_by_identity(&self, report: &AgentReport) -> Result<Option<Asset>, DbError> {
        let serial = normalize_identity(&report.serial_number);
        let hostname = normalize_identity(&report.hostname);
        let mac = normalize_identity(&report.mac_address);
        if serial.is_none() && hostname.is_none() && mac.is_none() {
            return Ok(None);
        }

        let row: Option<SqliteAssetRow> = sqlx::query_as(&format!(
            r#"
            SELECT {ASSET_COLUMNS} FROM assets
            WHERE (?1 IS NOT NULL AND serial_number = ?1)
               OR (?2 IS NOT NULL AND lower(hostname) = lower(?2))
               OR (?3 IS NOT NULL AND lower(mac_address) = lower(?3))
            ORDER BY CASE
                WHEN serial_number = ?1 THEN 0
                WHEN lower(hostname) = lower(?2) THEN 1
                ELSE 2
            END, asset_tag
            LIMIT 1
            "#
        ))
        .bind(serial)
        .bind(hostname)
        .bind(mac)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_hostname(&self, hostname: &str) -> Result<Option<Asset>, DbError> {
        let row: Option<SqliteAssetRow> = sqlx::query_as(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE lower(hostname) = lower(?) ORDER BY asset_tag LIMIT 1"
        ))
        .bind(hostname.trim())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_network_devices(&self) -> Result<Vec<NetworkDevice>, DbError> {
        let rows: Vec<SqliteNetworkDeviceRow> = sqlx::query_as(
            r#"
            SELECT a.id, a.asset_tag, a.name, a.hostname, a.ip_address,
                   e.first_name || ' ' || e.last_name AS assigned_to
            FROM assets a
            LEFT JOIN employees e ON e.id = a.assigned_employee_id
            WHERE a.ip_address IS NOT NULL AND a.ip_address <> ''
            ORDER BY a.asset_tag
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_maintenance_due(&self, today: NaiveDate) -> Result<Vec<Asset>, DbError> {
        let rows: Vec<SqliteAssetRow> = sqlx::query_as(&format!(
            r#"
            SELECT {ASSET_COLUMNS} FROM assets
            WHERE next_maintenance_date IS NOT NULL
              AND next_maintenance_date <= ?
              AND status NOT IN ('retired', 'lost')
            ORDER BY next_maintenance_date, asset_tag
            "#
        ))
        .bind(fmt_date(today))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn claim_maintenance(
        &self,
        id: Uuid,
        observed: NaiveDate,
        next: Option<NaiveDate>,
        ticket: &Ticket,
    ) -> Result<Option<Ticket>, DbError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE assets SET next_maintenance_date = ?, updated_at = ? WHERE id = ? AND next_maintenance_date = ?",
        )
        .bind(fmt_opt_date(next))
        .bind(fmt_ts(Utc::now()))
        .bind(id.to_string())
        .bind(fmt_date(observed))
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() != 1 {
            return Ok(None);
        }

        let created = insert_sqlite_ticket(&mut tx, ticket).await?;
        tx.commit().await?;
        Ok(Some(created))
    }

    async fn count_by_status(&self) -> Result<Vec<(AssetStatus, i64)>, DbError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM assets GROUP BY status ORDER BY status")
                .fetch_all(&self.pool)
                .await?;
        status_counts(rows)
    }
}

pub struct PgAssetRepository {
    pool: sqlx::PgPool,
}

impl PgAssetRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

const PG_ASSET_FILTER: &str = r#"
    WHERE ($1::text IS NULL OR status = $1)
      AND ($2::text IS NULL OR asset_type = $2)
      AND ($3::uuid IS NULL OR assigned_employee_id = $3)
      AND ($4::uuid IS NULL OR location_id = $4)
      AND ($5::text IS NULL
           OR asset_tag ILIKE $5
           OR name ILIKE $5
           OR serial_number ILIKE $5
           OR hostname ILIKE $5)
"#;

macro_rules! bind_pg_asset_filter {
    ($query:expr, $filter:expr) => {
        $query
            .bind($filter.status.map(|s| s.as_db_str()))
            .bind($filter.asset_type.map(|t| t.as_db_str()))
            .bind($filter.employee_id)
            .bind($filter.location_id)
            .bind($filter.search.as_deref().map(make_like_pattern))
    };
}

#[async_trait]
impl AssetRepository for PgAssetRepository {
    async fn create(&self, asset: &Asset) -> Result<Asset, DbError> {
        sqlx::query(&format!(
            "INSERT INTO assets ({ASSET_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)"
        ))
        .bind(asset.id)
        .bind(&asset.asset_tag)
        .bind(&asset.name)
        .bind(asset.asset_type.as_db_str())
        .bind(asset.status.as_db_str())
        .bind(&asset.serial_number)
        .bind(&asset.manufacturer)
        .bind(&asset.model)
        .bind(&asset.hostname)
        .bind(&asset.ip_address)
        .bind(&asset.mac_address)
        .bind(asset.location_id)
        .bind(asset.assigned_employee_id)
        .bind(asset.purchase_date)
        .bind(asset.purchase_cost)
        .bind(asset.warranty_expires)
        .bind(asset.maintenance_interval_days)
        .bind(asset.next_maintenance_date)
        .bind(asset.last_seen_at)
        .bind(&asset.notes)
        .bind(asset.created_at)
        .bind(asset.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(asset.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Asset>, DbError> {
        let row: Option<PgAssetRow> =
            sqlx::query_as(&format!("SELECT {ASSET_COLUMNS} FROM assets WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_tag(&self, asset_tag: &str) -> Result<Option<Asset>, DbError> {
        let row: Option<PgAssetRow> =
            sqlx::query_as(&format!("SELECT {ASSET_COLUMNS} FROM assets WHERE asset_tag = $1"))
                .bind(asset_tag)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(
        &self,
        filter: &AssetFilter,
        pagination: &Pagination,
    ) -> Result<PaginatedResult<Asset>, DbError> {
        let count_sql = format!("SELECT COUNT(*) FROM assets {PG_ASSET_FILTER}");
        let total: i64 = bind_pg_asset_filter!(sqlx::query_scalar(&count_sql), filter)
            .fetch_one(&self.pool)
            .await?;

        let list_sql = format!(
            "SELECT {ASSET_COLUMNS} FROM assets {PG_ASSET_FILTER} ORDER BY asset_tag LIMIT $6 OFFSET $7"
        );
        let rows: Vec<PgAssetRow> = bind_pg_asset_filter!(sqlx::query_as(&list_sql), filter)
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

    async fn list_for_employee(&self, employee_id: Uuid) -> Result<Vec<Asset>, DbError> {
        let rows: Vec<PgAssetRow> = sqlx::query_as(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE assigned_employee_id = $1 ORDER BY asset_tag"
        ))
        .bind(employee_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save(&self, asset: &Asset) -> Result<Asset, DbError> {
        let row: Option<PgAssetRow> = sqlx::query_as(&format!(
            r#"
            UPDATE assets SET
                asset_tag = $1, name = $2, asset_type = $3, status = $4, serial_number = $5,
                manufacturer = $6, model = $7, hostname = $8, ip_address = $9, mac_address = $10,
                location_id = $11, assigned_employee_id = $12, purchase_date = $13, purchase_cost = $14,
                warranty_expires = $15, maintenance_interval_days = $16, next_maintenance_date = $17,
                last_seen_at = $18, notes = $19, updated_at = NOW()
            WHERE id = $20
            RETURNING {ASSET_COLUMNS}
            "#
        ))
        .bind(&asset.asset_tag)
        .bind(&asset.name)
        .bind(asset.asset_type.as_db_str())
        .bind(asset.status.as_db_str())
        .bind(&asset.serial_number)
        .bind(&asset.manufacturer)
        .bind(&asset.model)
        .bind(&asset.hostname)
        .bind(&asset.ip_address)
        .bind(&asset.mac_address)
        .bind(asset.location_id)
        .bind(asset.assigned_employee_id)
        .bind(asset.purchase_date)
        .bind(asset.purchase_cost)
        .bind(asset.warranty_expires)
        .bind(asset.maintenance_interval_days)
        .bind(asset.next_maintenance_date)
        .bind(asset.last_seen_at)
        .bind(&asset.notes)
        .bind(asset.id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into)
            .transpose()?
            .ok_or_else(|| DbError::not_found("Asset", asset.id))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM assets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_by_identity(&self, report: &AgentReport) -> Result<Option<Asset>, DbError> {
        let serial = normalize_identity(&report.serial_number);
        let hostname = normalize_identity(&report.hostname);
        let mac = normalize_identity(&report.mac_address);
        if serial.is_none() && hostname.is_none() && mac.is_none() {
            return Ok(None);
        }

        let row: Option<PgAssetRow> = sqlx::query_as(&format!(
            r#"
            SELECT {ASSET_COLUMNS} FROM assets
            WHERE ($1::text IS NOT NULL AND serial_number = $1)
               OR ($2::text IS NOT NULL AND lower(hostname) = lower($2))
               OR ($3::text IS NOT NULL AND lower(mac_address) = lower($3))
            ORDER BY CASE
                WHEN serial_number = $1 THEN 0
                WHEN lower(hostname) = lower($2) THEN 1
                ELSE 2
            END, asset_tag
            LIMIT 1
            "#
        ))
        .bind(serial)
        .bind(hostname)
        .bind(mac)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_hostname(&self, hostname: &str) -> Result<Option<Asset>, DbError> {
        let row: Option<PgAssetRow> = sqlx::query_as(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE lower(hostname) = lower($1) ORDER BY asset_tag LIMIT 1"
        ))
        .bind(hostname.trim())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_network_devices(&self) -> Result<Vec<NetworkDevice>, DbError> {
        let rows: Vec<PgNetworkDeviceRow> = sqlx::query_as(
            r#"
            SELECT a.id, a.asset_tag, a.name, a.hostname, a.ip_address,
                   e.first_name || ' ' || e.last_name AS assigned_to
            FROM assets a
            LEFT JOIN employees e ON e.id = a.assigned_employee_id
            WHERE a.ip_address IS NOT NULL AND a.ip_address <> ''
            ORDER BY a.asset_tag
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_maintenance_due(&self, today: NaiveDate) -> Result<Vec<Asset>, DbError> {
        let rows: Vec<PgAssetRow> = sqlx::query_as(&format!(
            r#"
            SELECT {ASSET_COLUMNS} FROM assets
            WHERE next_maintenance_date IS NOT NULL
              AND next_maintenance_date <= $1
              AND status NOT IN ('retired', 'lost')
            ORDER BY next_maintenance_date, asset_tag
            "#
        ))
        .bind(today)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn claim_maintenance(
        &self,
        id: Uuid,
        observed: NaiveDate,
        next: Option<NaiveDate>,
        ticket: &Ticket,
    ) -> Result<Option<Ticket>, DbError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE assets SET next_maintenance_date = $1, updated_at = NOW() WHERE id = $2 AND next_maintenance_date = $3",
        )
        .bind(next)
        .bind(id)
        .bind(observed)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() != 1 {
            return Ok(None);
        }

        let created = insert_pg_ticket(&mut tx, ticket).await?;
        tx.commit().await?;
        Ok(Some(created))
    }

    async fn count_by_status(&self) -> Result<Vec<(AssetStatus, i64)>, DbError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM assets GROUP BY status ORDER BY status")
                .fetch_all(&self.pool)
                .await?;
        status_counts(rows)
    }
}

pub fn create_asset_repository(pool: &DbPool) -> Box<dyn AssetRepository> {
    match pool {
        DbPool::Sqlite(pool) => Box::new(SqliteAssetRepository::new(pool.clone())),
        DbPool::Postgres(pool) => Box::new(PgAssetRepository::new(pool.clone())),
    }
}

#[derive(sqlx::FromRow)]
struct SqliteAssetRow {
    id: String,
    asset_tag: String,
    name: String,
    asset_type: String,
    status: String,
    serial_number: Option<String>,
    manufacturer: Option<String>,
    model: Option<String>,
    hostname: Option<String>,
    ip_address: Option<String>,
    mac_address: Option<String>,
    location_id: Option<String>,
    assigned_employee_id: Option<String>,
    purchase_date: Option<String>,
    purchase_cost: Option<i64>,
    warranty_expires: Option<String>,
    maintenance_interval_days: Option<i32>,
    next_maintenance_date: Option<String>,
    last_seen_at: Option<String>,
    notes: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteAssetRow> for Asset {
    type Error = DbError;

    fn try_from(row: SqliteAssetRow) -> Result<Self, Self::Error> {
        Ok(Asset {
            id: parse_uuid(&row.id)?,
            asset_tag: row.asset_tag,
            name: row.name,
            asset_type: parse_enum(&row.asset_type, AssetType::from_db_str, "asset type")?,
            status: parse_enum(&row.status, AssetStatus::from_db_str, "asset status")?,
            serial_number: row.serial_number,
            manufacturer: row.manufacturer,
            model: row.model,
            hostname: row.hostname,
            ip_address: row.ip_address,
            mac_address: row.mac_address,
            location_id: parse_opt_uuid(row.location_id)?,
            assigned_employee_id: parse_opt_uuid(row.assigned_employee_id)?,
            purchase_date: parse_opt_date(row.purchase_date)?,
            purchase_cost: row.purchase_cost,
            warranty_expires: parse_opt_date(row.warranty_expires)?,
            maintenance_interval_days: row.maintenance_interval_days,
            next_maintenance_date: parse_opt_date(row.next_maintenance_date)?,
            last_seen_at: parse_opt_ts(row.last_seen_at)?,
            notes: row.notes,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgAssetRow {
    id: Uuid,
    asset_tag: String,
    name: String,
    asset_type: String,
    status: String,
    serial_number: Option<String>,
    manufacturer: Option<String>,
    model: Option<String>,
    hostname: Option<String>,
    ip_address: Option<String>,
    mac_address: Option<String>,
    location_id: Option<Uuid>,
    assigned_employee_id: Option<Uuid>,
    purchase_date: Option<NaiveDate>,
    purchase_cost: Option<i64>,
    warranty_expires: Option<NaiveDate>,
    maintenance_interval_days: Option<i32>,
    next_maintenance_date: Option<NaiveDate>,
    last_seen_at: Option<DateTime<Utc>>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PgAssetRow> for Asset {
    type Error = DbError;

    fn try_from(row: PgAssetRow) -> Result<Self, Self::Error> {
        Ok(Asset {
            id: row.id,
            asset_tag: row.asset_tag,
            name: row.name,
            asset_type: parse_enum(&row.asset_type, AssetType::from_db_str, "asset type")?,
            status: parse_enum(&row.status, AssetStatus::from_db_str, "asset status")?,
            serial_number: row.serial_number,
            manufacturer: row.manufacturer,
            model: row.model,
            hostname: row.hostname,
            ip_address: row.ip_address,
            mac_address: row.mac_address,
            location_id: row.location_id,
            assigned_employee_id: row.assigned_employee_id,
            purchase_date: row.purchase_date,
            purchase_cost: row.purchase_cost,
            warranty_expires: row.warranty_expires,
            maintenance_interval_days: row.maintenance_interval_days,
            next_maintenance_date: row.next_maintenance_date,
            last_seen_at: row.last_seen_at,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SqliteNetworkDeviceRow {
    id: String,
    asset_tag: String,
    name: String,
    hostname: Option<String>,
    ip_address: String,
    assigned_to: Option<String>,
}

impl TryFrom<SqliteNetworkDeviceRow> for NetworkDevice {
    type Error = DbError;

    fn try_from(row: SqliteNetworkDeviceRow) -> Result<Self, Self::Error> {
        Ok(NetworkDevice {
            asset_id: parse_uuid(&row.id)?,
            asset_tag: row.asset_tag,
            name: row.name,
            hostname: row.hostname,
            ip_address: row.ip_address,
            assigned_to: row.assigned_to,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgNetworkDeviceRow {
    id: Uuid,
    asset_tag: String,
    name: String,
    hostname: Option<String>,
    ip_address: String,
    assigned_to: Option<String>,
}

impl From<PgNetworkDeviceRow> for NetworkDevice {
    fn from(row: PgNetworkDeviceRow) -> Self {
        NetworkDevice {
            asset_id: row.id,
            asset_tag: row.asset_tag,
            name: row.name,
            hostname: row.hostname,
            ip_address: row.ip_address,
            assigned_to: row.assigned_to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_employee_repository, create_ticket_repository, test_pool};
    use crate::models::{Employee, TicketPriority, TicketSource};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_create_get_and_duplicate_tag() {
        let pool = test_pool().await;
        let repo = create_asset_repository(&pool);

        let mut asset = Asset::new("LT-001", "ThinkPad", AssetType::Laptop);
        asset.purchase_date = Some(date(2023, 4, 1));
        asset.purchase_cost = Some(129_900);
        repo.create(&asset).await.unwrap();

        let loaded = repo.get_by_tag("LT-001").await.unwrap().unwrap();
        assert_eq!(loaded.id, asset.id);
        assert_eq!(loaded.purchase_date, Some(date(2023, 4, 1)));
        assert_eq!(loaded.purchase_cost, Some(129_900));

        let err = repo
            .create(&Asset::new("LT-001", "Other", AssetType::Laptop))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_list_filters() {
        let pool = test_pool().await;
        let repo = create_asset_repository(&pool);

        let mut server = Asset::new("SRV-1", "db-primary", AssetType::Server);
        server.hostname = Some("db01".into());
        repo.create(&server).await.unwrap();
        let mut retired = Asset::new("LT-9", "Old laptop", AssetType::Laptop);
        retired.status = AssetStatus::Retired;
        repo.create(&retired).await.unwrap();

        let servers = repo
            .list(
                &AssetFilter {
                    asset_type: Some(AssetType::Server),
                    ..Default::default()
                },
                &Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(servers.total, 1);

        let by_host = repo
            .list(
                &AssetFilter {
                    search: Some("db01".into()),
                    ..Default::default()
                },
                &Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(by_host.items[0].asset_tag, "SRV-1");

        let counts = repo.count_by_status().await.unwrap();
        assert!(counts.contains(&(AssetStatus::InStock, 1)));
        assert!(counts.contains(&(AssetStatus::Retired, 1)));
    }

    #[tokio::test]
    async fn test_find_by_identity_prefers_serial() {
        let pool = test_pool().await;
        let repo = create_asset_repository(&pool);

        let mut by_host = Asset::new("A-1", "host match", AssetType::Desktop);
        by_host.hostname = Some("WS-42".into());
        repo.create(&by_host).await.unwrap();
        let mut by_serial = Asset::new("A-2", "serial match", AssetType::Desktop);
        by_serial.serial_number = Some("SN123".into());
        repo.create(&by_serial).await.unwrap();

        let report = AgentReport {
            hostname: Some("ws-42".into()),
            serial_number: Some("SN123".into()),
            ..Default::default()
        };
        let found = repo.find_by_identity(&report).await.unwrap().unwrap();
        assert_eq!(found.id, by_serial.id);

        let report = AgentReport {
            hostname: Some("ws-42".into()),
            ..Default::default()
        };
        let found = repo.find_by_identity(&report).await.unwrap().unwrap();
        assert_eq!(found.id, by_host.id);

        assert!(repo
            .find_by_identity(&AgentReport::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_network_devices_carry_assignee_name() {
        let pool = test_pool().await;
        let employees = create_employee_repository(&pool);
        let repo = create_asset_repository(&pool);

        let emp = Employee::new("E-1", "Alan", "Turing", "alan@example.com");
        employees.create(&emp).await.unwrap();

        let mut a = Asset::new("NET-1", "switch", AssetType::NetworkDevice);
        a.ip_address = Some("10.0.0.2".into());
        a.assigned_employee_id = Some(emp.id);
        repo.create(&a).await.unwrap();
        repo.create(&Asset::new("NET-2", "no ip", AssetType::NetworkDevice))
            .await
            .unwrap();

        let devices = repo.list_network_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].assigned_to.as_deref(), Some("Alan Turing"));
    }

    #[tokio::test]
    async fn test_maintenance_claim_is_compare_and_set() {
        let pool = test_pool().await;
        let repo = create_asset_repository(&pool);

        let mut due = Asset::new("M-1", "printer", AssetType::Printer);
        due.next_maintenance_date = Some(date(2024, 1, 1));
        due.maintenance_interval_days = Some(30);
        repo.create(&due).await.unwrap();
        let mut lost = Asset::new("M-2", "lost printer", AssetType::Printer);
        lost.status = AssetStatus::Lost;
        lost.next_maintenance_date = Some(date(2024, 1, 1));
        repo.create(&lost).await.unwrap();

        let listed = repo.list_maintenance_due(date(2024, 1, 5)).await.unwrap();
        assert_eq!(listed.len(), 1);

        let next = Some(date(2024, 1, 31));
        let ticket = Ticket::new("service printer", TicketPriority::Medium, TicketSource::Maintenance);
        let won = repo
            .claim_maintenance(due.id, date(2024, 1, 1), next, &ticket)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(won.number, 1);

        let again = Ticket::new("service printer", TicketPriority::Medium, TicketSource::Maintenance);
        assert!(repo
            .claim_maintenance(due.id, date(2024, 1, 1), next, &again)
            .await
            .unwrap()
            .is_none());
        assert!(repo.list_maintenance_due(date(2024, 1, 5)).await.unwrap().is_empty());

        let tickets = create_ticket_repository(&pool);
        assert!(tickets.get(ticket.id).await.unwrap().is_some());
        assert!(tickets.get(again.id).await.unwrap().is_none());
    }
}
