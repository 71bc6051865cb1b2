use super::convert::{fmt_ts, opt_uuid, parse_opt_uuid, parse_ts, parse_uuid};
use super::{DbError, DbPool};
use crate::models::Subnet;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait SubnetRepository: Send + Sync {
    async fn create(&self, subnet: &Subnet) -> Result<Subnet, DbError>;
    async fn get(&self, id: Uuid) -> Result<Option<Subnet>, DbError>;
    async fn list(&self) -> Result<Vec<Subnet>, DbError>;
    async fn save(&self, subnet: &Subnet) -> Result<Subnet, DbError>;
    async fn delete(&self, id: Uuid) -> Result<bool, DbError>;
}

const SUBNET_COLUMNS: &str =
    "id, name, cidr, gateway, vlan_id, location_id, description, created_at, updated_at";

pub struct SqliteSubnetRepository {
    pool: sqlx::SqlitePool,
}

impl SqliteSubnetRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubnetRepository for SqliteSubnetRepository {
    async fn create(&self, subnet: &Subnet) -> Result<Subnet, DbError> {
        sqlx::query(&format!(
            "INSERT INTO subnets ({SUBNET_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(subnet.id.to_string())
        .bind(&subnet.name)
        .bind(&subnet.cidr)
        .bind(&subnet.gateway)
        .bind(subnet.vlan_id)
        .bind(opt_uuid(subnet.location_id))
        .bind(&subnet.description)
        .bind(fmt_ts(subnet.created_at))
        .bind(fmt_ts(subnet.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(subnet.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Subnet>, DbError> {
        let row: Option<SqliteSubnetRow> =
            sqlx::query_as(&format!("SELECT {SUBNET_COLUMNS} FROM subnets WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self) -> Result<Vec<Subnet>, DbError> {
        let rows: Vec<SqliteSubnetRow> =
            sqlx::query_as(&format!("SELECT {SUBNET_COLUMNS} FROM subnets ORDER BY name, cidr"))
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save(&self, subnet: &Subnet) -> Result<Subnet, DbError> {
        let updated_at = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE subnets SET name = ?, cidr = ?, gateway = ?, vlan_id = ?, location_id = ?,
                description = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&subnet.name)
        .bind(&subnet.cidr)
        .bind(&subnet.gateway)
        .bind(subnet.vlan_id)
        .bind(opt_uuid(subnet.location_id))
        .bind(&subnet.description)
        .bind(fmt_ts(updated_at))
        .bind(subnet.id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Subnet", subnet.id));
        }
        Ok(Subnet {
            updated_at,
            ..subnet.clone()
        })
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM subnets WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

pub struct PgSubnetRepository {
    pool: sqlx::PgPool,
}

impl PgSubnetRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubnetRepository for PgSubnetRepository {
    async fn create(&self, subnet: &Subnet) -> Result<Subnet, DbError> {
        sqlx::query(&format!(
            "INSERT INTO subnets ({SUBNET_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(subnet.id)
        .bind(&subnet.name)
        .bind(&subnet.cidr)
        .bind(&subnet.gateway)
        .bind(subnet.vlan_id)
        .bind(subnet.location_id)
        .bind(&subnet.description)
        .bind(subnet.created_at)
        .bind(subnet.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(subnet.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Subnet>, DbError> {
        let row: Option<PgSubnetRow> =
            sqlx::query_as(&format!("SELECT {SUBNET_COLUMNS} FROM subnets WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Into::into))
    }

    async fn list(&self) -> Result<Vec<Subnet>, DbError> {
        let rows: Vec<PgSubnetRow> =
            sqlx::query_as(&format!("SELECT {SUBNET_COLUMNS} FROM subnets ORDER BY name, cidr"))
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn save(&self, subnet: &Subnet) -> Result<Subnet, DbError> {
        let row: Option<PgSubnetRow> = sqlx::query_as(&format!(
            r#"
            UPDATE subnets SET name = $1, cidr = $2, gateway = $3, vlan_id = $4, location_id = $5,
                description = $6, updated_at = NOW()
            WHERE id = $7
            RETURNING {SUBNET_COLUMNS}
            "#
        ))
        .bind(&subnet.name)
        .bind(&subnet.cidr)
        .bind(&subnet.gateway)
        .bind(subnet.vlan_id)
        .bind(subnet.location_id)
        .bind(&subnet.description)
        .bind(subnet.id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Into::into)
            .ok_or_else(|| DbError::not_found("Subnet", subnet.id))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM subnets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

pub fn create_subnet_repository(pool: &DbPool) -> Box<dyn SubnetRepository> {
    match pool {
        DbPool::Sqlite(pool) => Box::new(SqliteSubnetRepository::new(pool.clone())),
        DbPool::Postgres(pool) => Box::new(PgSubnetRepository::new(pool.clone())),
    }
}

#[derive(sqlx::FromRow)]
struct SqliteSubnetRow {
    id: String,
    name: String,
    cidr: String,
    gateway: Option<String>,
    vlan_id: Option<i32>,
    location_id: Option<String>,
    description: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteSubnetRow> for Subnet {
    type Error = DbError;

    fn try_from(row: SqliteSubnetRow) -> Result<Self, Self::Error> {
        Ok(Subnet {
            id: parse_uuid(&row.id)?,
            name: row.name,
            cidr: row.cidr,
            gateway: row.gateway,
            vlan_id: row.vlan_id,
            location_id: parse_opt_uuid(row.location_id)?,
            description: row.description,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgSubnetRow {
    id: Uuid,
    name: String,
    cidr: String,
    gateway: Option<String>,
    vlan_id: Option<i32>,
    location_id: Option<Uuid>,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PgSubnetRow> for Subnet {
    fn from(row: PgSubnetRow) -> Self {
        Subnet {
            id: row.id,
            name: row.name,
            cidr: row.cidr,
            gateway: row.gateway,
            vlan_id: row.vlan_id,
            location_id: row.location_id,
            description: row.description,
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
    async fn test_subnet_crud_and_unique_cidr() {
        let pool = test_pool().await;
        let repo = create_subnet_repository(&pool);

        let mut subnet = Subnet::new("Office LAN", "192.168.1.0/24");
        subnet.gateway = Some("192.168.1.1".into());
        subnet.vlan_id = Some(10);
        repo.create(&subnet).await.unwrap();

        let dup = repo.create(&Subnet::new("Copy", "192.168.1.0/24")).await;
        assert!(matches!(dup, Err(DbError::Constraint(_))));

        subnet.description = Some("Second floor".into());
        repo.save(&subnet).await.unwrap();
        let loaded = repo.get(subnet.id).await.unwrap().unwrap();
        assert_eq!(loaded.vlan_id, Some(10));
        assert_eq!(loaded.description.as_deref(), Some("Second floor"));

        assert_eq!(repo.list().await.unwrap().len(), 1);
        assert!(repo.delete(subnet.id).await.unwrap());
        assert!(repo.get(subnet.id).await.unwrap().is_none());
    }
}
