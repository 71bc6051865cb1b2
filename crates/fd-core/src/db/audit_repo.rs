//! Audit log storage. Insert and read only; the schema rejects updates and
//! deletes with triggers.

use super::convert::{fmt_opt_ts, fmt_ts, opt_uuid, parse_enum, parse_opt_uuid, parse_ts, parse_uuid};
use super::{DbError, DbPool, PaginatedResult, Pagination};
use crate::audit::{ActorType, AuditAction, AuditEntry, AuditFilter, EntityType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn insert(&self, entry: &AuditEntry) -> Result<(), DbError>;
    async fn get(&self, id: Uuid) -> Result<Option<AuditEntry>, DbError>;
    /// Newest first.
    async fn list(
        &self,
        filter: &AuditFilter,
        pagination: &Pagination,
    ) -> Result<PaginatedResult<AuditEntry>, DbError>;
}

const AUDIT_COLUMNS: &str = "id, actor_type, actor_id, actor_name, action, entity_type, entity_id, entity_name, changes, ip_address, user_agent, request_id, created_at";

fn encode_changes(changes: &Option<Value>) -> Result<Option<String>, DbError> {
    changes
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(Into::into)
}

/// A malformed stored document is dropped rather than failing the read.
fn decode_changes(id: &str, raw: Option<String>) -> Option<Value> {
    let raw = raw?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(audit_id = id, error = %e, "Ignoring malformed audit changes");
            None
        }
    }
}

pub struct SqliteAuditRepository {
    pool: sqlx::SqlitePool,
}

impl SqliteAuditRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

const SQLITE_AUDIT_FILTER: &str = r#"
    WHERE (?1 IS NULL OR entity_type = ?1)
      AND (?2 IS NULL OR entity_id = ?2)
      AND (?3 IS NULL OR actor_id = ?3)
      AND (?4 IS NULL OR action = ?4)
      AND (?5 IS NULL OR created_at >= ?5)
      AND (?6 IS NULL OR created_at < ?6)
"#;

macro_rules! bind_sqlite_audit_filter {
    ($query:expr, $filter:expr) => {
        $query
            .bind($filter.entity_type.map(|t| t.as_db_str()))
            .bind($filter.entity_id.as_deref())
            .bind(opt_uuid($filter.actor_id))
            .bind($filter.action.map(|a| a.as_db_str()))
            .bind(fmt_opt_ts($filter.since))
            .bind(fmt_opt_ts($filter.until))
    };
}

#[async_trait]
impl AuditRepository for SqliteAuditRepository {
    async fn insert(&self, entry: &AuditEntry) -> Result<(), DbError> {
        sqlx::query(&format!(
            "INSERT INTO audit_logs ({AUDIT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(entry.id.to_string())
        .bind(entry.actor_type.as_db_str())
        .bind(opt_uuid(entry.actor_id))
        .bind(&entry.actor_name)
        .bind(entry.action.as_db_str())
        .bind(entry.entity_type.as_db_str())
        .bind(&entry.entity_id)
        .bind(&entry.entity_name)
        .bind(encode_changes(&entry.changes)?)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(&entry.request_id)
        .bind(fmt_ts(entry.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<AuditEntry>, DbError> {
        let row: Option<SqliteAuditRow> =
            sqlx::query_as(&format!("SELECT {AUDIT_COLUMNS} FROM audit_logs WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(
        &self,
        filter: &AuditFilter,
        pagination: &Pagination,
    ) -> Result<PaginatedResult<AuditEntry>, DbError> {
        let count_sql = format!("SELECT COUNT(*) FROM audit_logs {SQLITE_AUDIT_FILTER}");
        let total: i64 = bind_sqlite_audit_filter!(sqlx::query_scalar(&count_sql), filter)
            .fetch_one(&self.pool)
            .await?;

        let list_sql = format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_logs {SQLITE_AUDIT_FILTER} ORDER BY created_at DESC, id LIMIT ?7 OFFSET ?8"
        );
        let rows: Vec<SqliteAuditRow> = bind_sqlite_audit_filter!(sqlx::query_as(&list_sql), filter)
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
}

pub struct PgAuditRepository {
    pool: sqlx::PgPool,
}

impl PgAuditRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

const PG_AUDIT_FILTER: &str = r#"
    WHERE ($1::text IS NULL OR entity_type = $1)
      AND ($2::text IS NULL OR entity_id = $2)
      AND ($3::uuid IS NULL OR actor_id = $3)
      AND ($4::text IS NULL OR action = $4)
      AND ($5::timestamptz IS NULL OR created_at >= $5)
      AND ($6::timestamptz IS NULL OR created_at < $6)
"#;

macro_rules! bind_pg_audit_filter {
    ($query:expr, $filter:expr) => {
        $query
            .bind($filter.entity_type.map(|t| t.as_db_str()))
            .bind($filter.entity_id.as_deref())
            .bind($filter.actor_id)
            .bind($filter.action.map(|a| a.as_db_str()))
            .bind($filter.since)
            .bind($filter.until)
    };
}

#[async_trait]
impl AuditRepository for PgAuditRepository {
    async fn insert(&self, entry: &AuditEntry) -> Result<(), DbError> {
        sqlx::query(&format!(
            "INSERT INTO audit_logs ({AUDIT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(entry.id)
        .bind(entry.actor_type.as_db_str())
        .bind(entry.actor_id)
        .bind(&entry.actor_name)
        .bind(entry.action.as_db_str())
        .bind(entry.entity_type.as_db_str())
        .bind(&entry.entity_id)
        .bind(&entry.entity_name)
        .bind(encode_changes(&entry.changes)?)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(&entry.request_id)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<AuditEntry>, DbError> {
        let row: Option<PgAuditRow> =
            sqlx::query_as(&format!("SELECT {AUDIT_COLUMNS} FROM audit_logs WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(
        &self,
        filter: &AuditFilter,
        pagination: &Pagination,
    ) -> Result<PaginatedResult<AuditEntry>, DbError> {
        let count_sql = format!("SELECT COUNT(*) FROM audit_logs {PG_AUDIT_FILTER}");
        let total: i64 = bind_pg_audit_filter!(sqlx::query_scalar(&count_sql), filter)
            .fetch_one(&self.pool)
            .await?;

        let list_sql = format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_logs {PG_AUDIT_FILTER} ORDER BY created_at DESC, id LIMIT $7 OFFSET $8"
        );
        let rows: Vec<PgAuditRow> = bind_pg_audit_filter!(sqlx::query_as(&list_sql), filter)
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
}

pub fn create_audit_repository(pool: &DbPool) -> Box<dyn AuditRepository> {
    match pool {
        DbPool::Sqlite(pool) => Box::new(SqliteAuditRepository::new(pool.clone())),
        DbPool::Postgres(pool) => Box::new(PgAuditRepository::new(pool.clone())),
    }
}

#[derive(sqlx::FromRow)]
struct SqliteAuditRow {
    id: String,
    actor_type: String,
    actor_id: Option<String>,
    actor_name: String,
    action: String,
    entity_type: String,
    entity_id: Option<String>,
    entity_name: Option<String>,
    changes: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    request_id: Option<String>,
    created_at: String,
}

impl TryFrom<SqliteAuditRow> for AuditEntry {
    type Error = DbError;

    fn try_from(row: SqliteAuditRow) -> Result<Self, Self::Error> {
        let changes = decode_changes(&row.id, row.changes);
        Ok(AuditEntry {
            id: parse_uuid(&row.id)?,
            actor_type: parse_enum(&row.actor_type, ActorType::from_db_str, "actor type")?,
            actor_id: parse_opt_uuid(row.actor_id)?,
            actor_name: row.actor_name,
            action: parse_enum(&row.action, AuditAction::from_db_str, "audit action")?,
            entity_type: parse_enum(&row.entity_type, EntityType::from_db_str, "entity type")?,
            entity_id: row.entity_id,
            entity_name: row.entity_name,
            changes,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            request_id: row.request_id,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgAuditRow {
    id: Uuid,
    actor_type: String,
    actor_id: Option<Uuid>,
    actor_name: String,
    action: String,
    entity_type: String,
    entity_id: Option<String>,
    entity_name: Option<String>,
    changes: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    request_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PgAuditRow> for AuditEntry {
    type Error = DbError;

    fn try_from(row: PgAuditRow) -> Result<Self, Self::Error> {
        let changes = decode_changes(&row.id.to_string(), row.changes);
        Ok(AuditEntry {
            id: row.id,
            actor_type: parse_enum(&row.actor_type, ActorType::from_db_str, "actor type")?,
            actor_id: row.actor_id,
            actor_name: row.actor_name,
            action: parse_enum(&row.action, AuditAction::from_db_str, "audit action")?,
            entity_type: parse_enum(&row.entity_type, EntityType::from_db_str, "entity type")?,
            entity_id: row.entity_id,
            entity_name: row.entity_name,
            changes,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            request_id: row.request_id,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{Actor, ChangeSet};
    use crate::db::test_pool;
    use chrono::Duration;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_and_filter_newest_first() {
        let pool = test_pool().await;
        let repo = create_audit_repository(&pool);
        let actor = Actor::system();
        let asset_id = Uuid::new_v4();

        let mut created = AuditEntry::new(&actor, AuditAction::Create, EntityType::Asset)
            .entity(asset_id, "LT-001")
            .with_changes(ChangeSet::detail(json!({"asset_tag": "LT-001"})));
        created.created_at -= Duration::minutes(1);
        repo.insert(&created).await.unwrap();
        let updated = AuditEntry::new(&actor, AuditAction::Update, EntityType::Asset)
            .entity(asset_id, "LT-001")
            .with_changes(Some(json!({"before": {"status": "in_stock"}, "after": {"status": "assigned"}})));
        repo.insert(&updated).await.unwrap();
        repo.insert(&AuditEntry::new(&actor, AuditAction::Create, EntityType::Subnet))
            .await
            .unwrap();

        let history = repo
            .list(
                &AuditFilter {
                    entity_type: Some(EntityType::Asset),
                    entity_id: Some(asset_id.to_string()),
                    ..Default::default()
                },
                &Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(history.total, 2);
        assert_eq!(history.items[0].action, AuditAction::Update);
        assert_eq!(history.items[1].snapshot(), Some(&json!({"asset_tag": "LT-001"})));

        let loaded = repo.get(updated.id).await.unwrap().unwrap();
        assert_eq!(loaded.field_changes()[0].field, "status");
    }

    #[tokio::test]
    async fn test_entries_cannot_be_modified() {
        let pool = test_pool().await;
        let repo = create_audit_repository(&pool);
        let entry = AuditEntry::new(&Actor::system(), AuditAction::Restore, EntityType::System);
        repo.insert(&entry).await.unwrap();

        let DbPool::Sqlite(sqlite) = &pool else {
            unreachable!()
        };
        let res = sqlx::query("DELETE FROM audit_logs WHERE id = ?")
            .bind(entry.id.to_string())
            .execute(sqlite)
            .await;
        assert!(res.is_err());
        assert!(repo.get(entry.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_malformed_changes_read_as_none() {
        let pool = test_pool().await;
        let repo = create_audit_repository(&pool);
        let entry = AuditEntry::new(&Actor::system(), AuditAction::Scan, EntityType::Subnet);
        let DbPool::Sqlite(sqlite) = &pool else {
            unreachable!()
        };
        sqlx::query(&format!(
            "INSERT INTO audit_logs ({AUDIT_COLUMNS}) VALUES (?, 'system', NULL, 'system', 'scan', 'subnet', NULL, NULL, '{{not json', NULL, NULL, NULL, ?)"
        ))
        .bind(entry.id.to_string())
        .bind(fmt_ts(entry.created_at))
        .execute(sqlite)
        .await
        .unwrap();

        let loaded = repo.get(entry.id).await.unwrap().unwrap();
        assert!(loaded.changes.is_none());
    }
}
