use super::convert::{fmt_ts, parse_enum, parse_ts, parse_uuid};
use super::{DbError, DbPool};
use crate::models::{Notification, RecipientType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create(&self, notification: &Notification) -> Result<Notification, DbError>;
    async fn get(&self, id: Uuid) -> Result<Option<Notification>, DbError>;
    /// Newest first, capped at `limit`.
    async fn list_for(
        &self,
        recipient_type: RecipientType,
        recipient_id: Uuid,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Notification>, DbError>;
    async fn count_unread(
        &self,
        recipient_type: RecipientType,
        recipient_id: Uuid,
    ) -> Result<i64, DbError>;
    /// Only the recipient can mark their notification; returns false otherwise.
    async fn mark_read(
        &self,
        id: Uuid,
        recipient_type: RecipientType,
        recipient_id: Uuid,
    ) -> Result<bool, DbError>;
    /// Returns the number of notifications changed.
    async fn mark_all_read(
        &self,
        recipient_type: RecipientType,
        recipient_id: Uuid,
    ) -> Result<u64, DbError>;
}

const NOTIFICATION_COLUMNS: &str =
    "id, recipient_type, recipient_id, title, body, link, is_read, created_at";

pub struct SqliteNotificationRepository {
    pool: sqlx::SqlitePool,
}

impl SqliteNotificationRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for SqliteNotificationRepository {
    async fn create(&self, notification: &Notification) -> Result<Notification, DbError> {
        sqlx::query(&format!(
            "INSERT INTO notifications ({NOTIFICATION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(notification.id.to_string())
        .bind(notification.recipient_type.as_db_str())
        .bind(notification.recipient_id.to_string())
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(&notification.link)
        .bind(notification.read)
        .bind(fmt_ts(notification.created_at))
        .execute(&self.pool)
        .await?;
        Ok(notification.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>, DbError> {
        let row: Option<SqliteNotificationRow> = sqlx::query_as(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_for(
        &self,
        recipient_type: RecipientType,
        recipient_id: Uuid,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Notification>, DbError> {
        let rows: Vec<SqliteNotificationRow> = sqlx::query_as(&format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS} FROM notifications
            WHERE recipient_type = ?1 AND recipient_id = ?2 AND (NOT ?3 OR is_read = 0)
            ORDER BY created_at DESC
            LIMIT ?4
            "#
        ))
        .bind(recipient_type.as_db_str())
        .bind(recipient_id.to_string())
        .bind(unread_only)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count_unread(
        &self,
        recipient_type: RecipientType,
        recipient_id: Uuid,
    ) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE recipient_type = ? AND recipient_id = ? AND is_read = 0",
        )
        .bind(recipient_type.as_db_str())
        .bind(recipient_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn mark_read(
        &self,
        id: Uuid,
        recipient_type: RecipientType,
        recipient_id: Uuid,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = 1 WHERE id = ? AND recipient_type = ? AND recipient_id = ?",
        )
        .bind(id.to_string())
        .bind(recipient_type.as_db_str())
        .bind(recipient_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_read(
        &self,
        recipient_type: RecipientType,
        recipient_id: Uuid,
    ) -> Result<u64, DbError> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = 1 WHERE recipient_type = ? AND recipient_id = ? AND is_read = 0",
        )
        .bind(recipient_type.as_db_str())
        .bind(recipient_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

pub struct PgNotificationRepository {
    pool: sqlx::PgPool,
}

impl PgNotificationRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn create(&self, notification: &Notification) -> Result<Notification, DbError> {
        sqlx::query(&format!(
            "INSERT INTO notifications ({NOTIFICATION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(notification.id)
        .bind(notification.recipient_type.as_db_str())
        .bind(notification.recipient_id)
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(&notification.link)
        .bind(notification.read)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;
        Ok(notification.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>, DbError> {
        let row: Option<PgNotificationRow> = sqlx::query_as(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_for(
        &self,
        recipient_type: RecipientType,
        recipient_id: Uuid,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Notification>, DbError> {
        let rows: Vec<PgNotificationRow> = sqlx::query_as(&format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS} FROM notifications
            WHERE recipient_type = $1 AND recipient_id = $2 AND (NOT $3 OR NOT is_read)
            ORDER BY created_at DESC
            LIMIT $4
            "#
        ))
        .bind(recipient_type.as_db_str())
        .bind(recipient_id)
        .bind(unread_only)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count_unread(
        &self,
        recipient_type: RecipientType,
        recipient_id: Uuid,
    ) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE recipient_type = $1 AND recipient_id = $2 AND NOT is_read",
        )
        .bind(recipient_type.as_db_str())
        .bind(recipient_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn mark_read(
        &self,
        id: Uuid,
        recipient_type: RecipientType,
        recipient_id: Uuid,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = TRUE WHERE id = $1 AND recipient_type = $2 AND recipient_id = $3",
        )
        .bind(id)
        .bind(recipient_type.as_db_str())
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_read(
        &self,
        recipient_type: RecipientType,
        recipient_id: Uuid,
    ) -> Result<u64, DbError> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = TRUE WHERE recipient_type = $1 AND recipient_id = $2 AND NOT is_read",
        )
        .bind(recipient_type.as_db_str())
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

pub fn create_notification_repository(pool: &DbPool) -> Box<dyn NotificationRepository> {
    match pool {
        DbPool::Sqlite(pool) => Box::new(SqliteNotificationRepository::new(pool.clone())),
        DbPool::Postgres(pool) => Box::new(PgNotificationRepository::new(pool.clone())),
    }
}

#[derive(sqlx::FromRow)]
struct SqliteNotificationRow {
    id: String,
    recipient_type: String,
    recipient_id: String,
    title: String,
    body: Option<String>,
    link: Option<String>,
    is_read: bool,
    created_at: String,
}

impl TryFrom<SqliteNotificationRow> for Notification {
    type Error = DbError;

    fn try_from(row: SqliteNotificationRow) -> Result<Self, Self::Error> {
        Ok(Notification {
            id: parse_uuid(&row.id)?,
            recipient_type: parse_enum(&row.recipient_type, RecipientType::from_db_str, "recipient type")?,
            recipient_id: parse_uuid(&row.recipient_id)?,
            title: row.title,
            body: row.body,
            link: row.link,
            read: row.is_read,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgNotificationRow {
    id: Uuid,
    recipient_type: String,
    recipient_id: Uuid,
    title: String,
    body: Option<String>,
    link: Option<String>,
    is_read: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<PgNotificationRow> for Notification {
    type Error = DbError;

    fn try_from(row: PgNotificationRow) -> Result<Self, Self::Error> {
        Ok(Notification {
            id: row.id,
            recipient_type: parse_enum(&row.recipient_type, RecipientType::from_db_str, "recipient type")?,
            recipient_id: row.recipient_id,
            title: row.title,
            body: row.body,
            link: row.link,
            read: row.is_read,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_unread_and_mark_read() {
        let pool = test_pool().await;
        let repo = create_notification_repository(&pool);
        let employee_id = Uuid::new_v4();
        let other = Uuid::new_v4();

        let first = Notification::for_employee(employee_id, "Ticket #1 updated").with_link("/portal/tickets/1");
        repo.create(&first).await.unwrap();
        repo.create(&Notification::for_employee(employee_id, "Booking confirmed"))
            .await
            .unwrap();
        repo.create(&Notification::for_employee(other, "Not yours"))
            .await
            .unwrap();

        assert_eq!(repo.count_unread(RecipientType::Employee, employee_id).await.unwrap(), 2);
        // Another recipient cannot mark it.
        assert!(!repo.mark_read(first.id, RecipientType::Employee, other).await.unwrap());
        assert!(repo.mark_read(first.id, RecipientType::Employee, employee_id).await.unwrap());

        let unread = repo
            .list_for(RecipientType::Employee, employee_id, true, 10)
            .await
            .unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].title, "Booking confirmed");

        assert_eq!(repo.mark_all_read(RecipientType::Employee, employee_id).await.unwrap(), 1);
        let all = repo
            .list_for(RecipientType::Employee, employee_id, false, 10)
            .await
            .unwrap();
        assert!(all.iter().all(|n| n.read));
        assert_eq!(repo.count_unread(RecipientType::Employee, other).await.unwrap(), 1);
        assert!(repo.list_for(RecipientType::User, employee_id, false, 10).await.unwrap().is_empty());
    }
}
