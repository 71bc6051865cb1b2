use super::convert::{fmt_opt_ts, fmt_ts, opt_uuid, parse_enum, parse_opt_ts, parse_opt_uuid, parse_ts, parse_uuid};
use super::{DbError, DbPool};
use crate::models::{AgentCommand, CommandStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Queue of commands waiting for an asset's agent to pick them up.
#[async_trait]
pub trait AgentCommandRepository: Send + Sync {
    async fn create(&self, command: &AgentCommand) -> Result<AgentCommand, DbError>;
    async fn get(&self, id: Uuid) -> Result<Option<AgentCommand>, DbError>;
    /// Newest first.
    async fn list_for_asset(&self, asset_id: Uuid) -> Result<Vec<AgentCommand>, DbError>;
    /// Returns pending commands in creation order and marks them dispatched.
    /// A command is handed out at most once.
    async fn take_pending(
        &self,
        asset_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<AgentCommand>, DbError>;
    async fn save(&self, command: &AgentCommand) -> Result<AgentCommand, DbError>;
    async fn count_pending(&self) -> Result<i64, DbError>;
}

const COMMAND_COLUMNS: &str =
    "id, asset_id, command, status, output, created_by, created_at, dispatched_at, completed_at";

pub struct SqliteAgentCommandRepository {
    pool: sqlx::SqlitePool,
}

impl SqliteAgentCommandRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgentCommandRepository for SqliteAgentCommandRepository {
    async fn create(&self, command: &AgentCommand) -> Result<AgentCommand, DbError> {
        sqlx::query(&format!(
            "INSERT INTO agent_commands ({COMMAND_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(command.id.to_string())
        .bind(command.asset_id.to_string())
        .bind(&command.command)
        .bind(command.status.as_db_str())
        .bind(&command.output)
        .bind(opt_uuid(command.created_by))
        .bind(fmt_ts(command.created_at))
        .bind(fmt_opt_ts(command.dispatched_at))
        .bind(fmt_opt_ts(command.completed_at))
        .execute(&self.pool)
        .await?;
        Ok(command.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<AgentCommand>, DbError> {
        let row: Option<SqliteCommandRow> =
            sqlx::query_as(&format!("SELECT {COMMAND_COLUMNS} FROM agent_commands WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_for_asset(&self, asset_id: Uuid) -> Result<Vec<AgentCommand>, DbError> {
        let rows: Vec<SqliteCommandRow> = sqlx::query_as(&format!(
            "SELECT {COMMAND_COLUMNS} FROM agent_commands WHERE asset_id = ? ORDER BY created_at DESC"
        ))
        .bind(asset_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn take_pending(
        &self,
        asset_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<AgentCommand>, DbError> {
        let rows: Vec<SqliteCommandRow> = sqlx::query_as(&format!(
            r#"
            UPDATE agent_commands SET status = 'dispatched', dispatched_at = ?
            WHERE asset_id = ? AND status = 'pending'
            RETURNING {COMMAND_COLUMNS}
            "#
        ))
        .bind(fmt_ts(now))
        .bind(asset_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        let mut commands = rows
            .into_iter()
            .map(TryInto::try_into)
            .collect::<Result<Vec<AgentCommand>, _>>()?;
        commands.sort_by_key(|c| c.created_at);
        Ok(commands)
    }

    async fn save(&self, command: &AgentCommand) -> Result<AgentCommand, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE agent_commands SET status = ?, output = ?, dispatched_at = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(command.status.as_db_str())
        .bind(&command.output)
        .bind(fmt_opt_ts(command.dispatched_at))
        .bind(fmt_opt_ts(command.completed_at))
        .bind(command.id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("AgentCommand", command.id));
        }
        Ok(command.clone())
    }

    async fn count_pending(&self) -> Result<i64, DbError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM agent_commands WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

pub struct PgAgentCommandRepository {
    pool: sqlx::PgPool,
}

impl PgAgentCommandRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgentCommandRepository for PgAgentCommandRepository {
    async fn create(&self, command: &AgentCommand) -> Result<AgentCommand, DbError> {
        sqlx::query(&format!(
            "INSERT INTO agent_commands ({COMMAND_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(command.id)
        .bind(command.asset_id)
        .bind(&command.command)
        .bind(command.status.as_db_str())
        .bind(&command.output)
        .bind(command.created_by)
        .bind(command.created_at)
        .bind(command.dispatched_at)
        .bind(command.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(command.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<AgentCommand>, DbError> {
        let row: Option<PgCommandRow> =
            sqlx::query_as(&format!("SELECT {COMMAND_COLUMNS} FROM agent_commands WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_for_asset(&self, asset_id: Uuid) -> Result<Vec<AgentCommand>, DbError> {
        let rows: Vec<PgCommandRow> = sqlx::query_as(&format!(
            "SELECT {COMMAND_COLUMNS} FROM agent_commands WHERE asset_id = $1 ORDER BY created_at DESC"
        ))
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn take_pending(
        &self,
        asset_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<AgentCommand>, DbError> {
        // SKIP LOCKED keeps two concurrent polls from taking the same rows.
        let rows: Vec<PgCommandRow> = sqlx::query_as(&format!(
            r#"
            UPDATE agent_commands SET status = 'dispatched', dispatched_at = $1
            WHERE id IN (
                SELECT id FROM agent_commands
                WHERE asset_id = $2 AND status = 'pending'
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {COMMAND_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await?;
        let mut commands = rows
            .into_iter()
            .map(TryInto::try_into)
            .collect::<Result<Vec<AgentCommand>, _>>()?;
        commands.sort_by_key(|c| c.created_at);
        Ok(commands)
    }

    async fn save(&self, command: &AgentCommand) -> Result<AgentCommand, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE agent_commands SET status = $1, output = $2, dispatched_at = $3, completed_at = $4
            WHERE id = $5
            "#,
        )
        .bind(command.status.as_db_str())
        .bind(&command.output)
        .bind(command.dispatched_at)
        .bind(command.completed_at)
        .bind(command.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("AgentCommand", command.id));
        }
        Ok(command.clone())
    }

    async fn count_pending(&self) -> Result<i64, DbError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM agent_commands WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

pub fn create_agent_command_repository(pool: &DbPool) -> Box<dyn AgentCommandRepository> {
    match pool {
        DbPool::Sqlite(pool) => Box::new(SqliteAgentCommandRepository::new(pool.clone())),
        DbPool::Postgres(pool) => Box::new(PgAgentCommandRepository::new(pool.clone())),
    }
}

#[derive(sqlx::FromRow)]
struct SqliteCommandRow {
    id: String,
    asset_id: String,
    command: String,
    status: String,
    output: Option<String>,
    created_by: Option<String>,
    created_at: String,
    dispatched_at: Option<String>,
    completed_at: Option<String>,
}

impl TryFrom<SqliteCommandRow> for AgentCommand {
    type Error = DbError;

    fn try_from(row: SqliteCommandRow) -> Result<Self, Self::Error> {
        Ok(AgentCommand {
            id: parse_uuid(&row.id)?,
            asset_id: parse_uuid(&row.asset_id)?,
            command: row.command,
            status: parse_enum(&row.status, CommandStatus::from_db_str, "command status")?,
            output: row.output,
            created_by: parse_opt_uuid(row.created_by)?,
            created_at: parse_ts(&row.created_at)?,
            dispatched_at: parse_opt_ts(row.dispatched_at)?,
            completed_at: parse_opt_ts(row.completed_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgCommandRow {
    id: Uuid,
    asset_id: Uuid,
    command: String,
    status: String,
    output: Option<String>,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    dispatched_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<PgCommandRow> for AgentCommand {
    type Error = DbError;

    fn try_from(row: PgCommandRow) -> Result<Self, Self::Error> {
        Ok(AgentCommand {
            id: row.id,
            asset_id: row.asset_id,
            command: row.command,
            status: parse_enum(&row.status, CommandStatus::from_db_str, "command status")?,
            output: row.output,
            created_by: row.created_by,
            created_at: row.created_at,
            dispatched_at: row.dispatched_at,
            completed_at: row.completed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_asset_repository, test_pool};
    use crate::models::{Asset, AssetType};
    use chrono::Duration;

    #[tokio::test]
    async fn test_pending_commands_are_taken_once() {
        let pool = test_pool().await;
        let asset = Asset::new("SRV-2", "build box", AssetType::Server);
        create_asset_repository(&pool).create(&asset).await.unwrap();
        let repo = create_agent_command_repository(&pool);

        let mut first = AgentCommand::new(asset.id, "inventory", None);
        first.created_at -= Duration::minutes(5);
        repo.create(&first).await.unwrap();
        repo.create(&AgentCommand::new(asset.id, "restart-service", None))
            .await
            .unwrap();
        assert_eq!(repo.count_pending().await.unwrap(), 2);

        let now = Utc::now();
        let taken = repo.take_pending(asset.id, now).await.unwrap();
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].command, "inventory");
        assert!(taken.iter().all(|c| c.status == CommandStatus::Dispatched));
        assert!(repo.take_pending(asset.id, now).await.unwrap().is_empty());
        assert_eq!(repo.count_pending().await.unwrap(), 0);

        let mut done = taken[0].clone();
        done.status = CommandStatus::Completed;
        done.output = Some("ok".into());
        done.completed_at = Some(now);
        repo.save(&done).await.unwrap();
        let loaded = repo.get(done.id).await.unwrap().unwrap();
        assert_eq!(loaded.output.as_deref(), Some("ok"));
        assert_eq!(repo.list_for_asset(asset.id).await.unwrap().len(), 2);
    }
}
