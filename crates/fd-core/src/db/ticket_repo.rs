use super::convert::{fmt_opt_ts, fmt_ts, opt_uuid, parse_enum, parse_opt_ts, parse_opt_uuid, parse_ts, parse_uuid};
use super::{DbError, DbPool, PaginatedResult, Pagination};
use crate::models::{Ticket, TicketFilter, TicketPriority, TicketSource, TicketStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait TicketRepository: Send + Sync {
    /// Inserts the ticket and assigns the next sequential number.
    async fn create(&self, ticket: &Ticket) -> Result<Ticket, DbError>;

    async fn get(&self, id: Uuid) -> Result<Option<Ticket>, DbError>;

    async fn get_by_number(&self, number: i64) -> Result<Option<Ticket>, DbError>;

    /// Newest first. `now` is the reference time for `breached_only`.
    async fn list(
        &self,
        filter: &TicketFilter,
        pagination: &Pagination,
        now: DateTime<Utc>,
    ) -> Result<PaginatedResult<Ticket>, DbError>;

    async fn save(&self, ticket: &Ticket) -> Result<Ticket, DbError>;

    async fn delete(&self, id: Uuid) -> Result<bool, DbError>;

    async fn count_open(&self) -> Result<i64, DbError>;

    async fn count_breached(&self, now: DateTime<Utc>) -> Result<i64, DbError>;
}

const TICKET_COLUMNS: &str = "id, number, title, description, priority, status, source, requester_id, assignee_id, asset_id, service_item_id, sla_breach_at, completed_at, created_at, updated_at";

const TERMINAL_STATUSES: &str = "('resolved', 'closed', 'cancelled', 'completed')";

pub struct SqliteTicketRepository {
    pool: sqlx::SqlitePool,
}

impl SqliteTicketRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

fn sqlite_breached_clause(now_param: &str) -> String {
    format!(
        "(sla_breach_at IS NOT NULL AND ((status NOT IN {TERMINAL_STATUSES} AND sla_breach_at < {now_param}) \
         OR (status IN {TERMINAL_STATUSES} AND completed_at IS NOT NULL AND completed_at > sla_breach_at)))"
    )
}

fn sqlite_ticket_filter() -> String {
    format!(
        r#"
        WHERE (?1 IS NULL OR status = ?1)
          AND (?2 IS NULL OR priority = ?2)
          AND (?3 IS NULL OR assignee_id = ?3)
          AND (?4 IS NULL OR requester_id = ?4)
          AND (?5 IS NULL OR source = ?5)
          AND (?6 = 0 OR {breached})
          AND (?8 = 0 OR status NOT IN {TERMINAL_STATUSES})
        "#,
        breached = sqlite_breached_clause("?7"),
    )
}

macro_rules! bind_sqlite_ticket_filter {
    ($query:expr, $filter:expr, $now:expr) => {
        $query
            .bind($filter.status.map(|s| s.as_db_str()))
            .bind($filter.priority.map(|p| p.as_db_str()))
            .bind(opt_uuid($filter.assignee_id))
            .bind(opt_uuid($filter.requester_id))
            .bind($filter.source.map(|s| s.as_db_str()))
            .bind($filter.breached_only)
            .bind(fmt_ts($now))
            .bind($filter.open_only)
    };
}

/// Inserts on a caller-supplied connection or transaction.
pub(super) async fn insert_sqlite_ticket(
    conn: &mut sqlx::SqliteConnection,
    ticket: &Ticket,
) -> Result<Ticket, DbError> {
    let number: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO tickets (id, number, title, description, priority, status, source,
            requester_id, assignee_id, asset_id, service_item_id, sla_breach_at, completed_at,
            created_at, updated_at)
        VALUES (?, (SELECT COALESCE(MAX(number), 0) + 1 FROM tickets), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING number
        "#,
    )
    .bind(ticket.id.to_string())
    .bind(&ticket.title)
    .bind(&ticket.description)
    .bind(ticket.priority.as_db_str())
    .bind(ticket.status.as_db_str())
    .bind(ticket.source.as_db_str())
    .bind(opt_uuid(ticket.requester_id))
    .bind(opt_uuid(ticket.assignee_id))
    .bind(opt_uuid(ticket.asset_id))
    .bind(opt_uuid(ticket.service_item_id))
    .bind(fmt_opt_ts(ticket.sla_breach_at))
    .bind(fmt_opt_ts(ticket.completed_at))
    .bind(fmt_ts(ticket.created_at))
    .bind(fmt_ts(ticket.updated_at))
    .fetch_one(conn)
    .await?;

    Ok(Ticket {
        number,
        ..ticket.clone()
    })
}

#[async_trait]
impl TicketRepository for SqliteTicketRepository {
    async fn create(&self, ticket: &Ticket) -> Result<Ticket, DbError> {
        let mut conn = self.pool.acquire().await?;
        insert_sqlite_ticket(&mut conn, ticket).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Ticket>, DbError> {
        let row: Option<SqliteTicketRow> =
            sqlx::query_as(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_number(&self, number: i64) -> Result<Option<Ticket>, DbError> {
        let row: Option<SqliteTicketRow> =
            sqlx::query_as(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE number = ?"))
                .bind(number)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(
        &self,
        filter: &TicketFilter,
        pagination: &Pagination,
        now: DateTime<Utc>,
    ) -> Result<PaginatedResult<Ticket>, DbError> {
        let where_clause = sqlite_ticket_filter();

        let count_sql = format!("SELECT COUNT(*) FROM tickets {where_clause}");
        let total: i64 = bind_sqlite_ticket_filter!(sqlx::query_scalar(&count_sql), filter, now)
            .fetch_one(&self.pool)
            .await?;

        let list_sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets {where_clause} ORDER BY created_at DESC, number DESC LIMIT ?9 OFFSET ?10"
        );
        let rows: Vec<SqliteTicketRow> =
            bind_sqlite_ticket_filter!(sqlx::query_as(&list_sql), filter, now)
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

    async fn save(&self, ticket: &Ticket) -> Result<Ticket, DbError> {
        let updated_at = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE tickets SET
                title = ?, description = ?, priority = ?, status = ?, source = ?,
                requester_id = ?, assignee_id = ?, asset_id = ?, service_item_id = ?,
                sla_breach_at = ?, completed_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&ticket.title)
        .bind(&ticket.description)
        .bind(ticket.priority.as_db_str())
        .bind(ticket.status.as_db_str())
        .bind(ticket.source.as_db_str())
        .bind(opt_uuid(ticket.requester_id))
        .bind(opt_uuid(ticket.assignee_id))
        .bind(opt_uuid(ticket.asset_id))
        .bind(opt_uuid(ticket.service_item_id))
        .bind(fmt_opt_ts(ticket.sla_breach_at))
        .bind(fmt_opt_ts(ticket.completed_at))
        .bind(fmt_ts(updated_at))
        .bind(ticket.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Ticket", ticket.id));
        }
        Ok(Ticket {
            updated_at,
            ..ticket.clone()
        })
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM tickets WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_open(&self) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM tickets WHERE status NOT IN {TERMINAL_STATUSES}"
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_breached(&self, now: DateTime<Utc>) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM tickets WHERE {}",
            sqlite_breached_clause("?1")
        ))
        .bind(fmt_ts(now))
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

pub struct PgTicketRepository {
    pool: sqlx::PgPool,
}

impl PgTicketRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

fn pg_breached_clause(now_param: &str) -> String {
    format!(
        "(sla_breach_at IS NOT NULL AND ((status NOT IN {TERMINAL_STATUSES} AND sla_breach_at < {now_param}) \
         OR (status IN {TERMINAL_STATUSES} AND completed_at IS NOT NULL AND completed_at > sla_breach_at)))"
    )
}

fn pg_ticket_filter() -> String {
    format!(
        r#"
        WHERE ($1::text IS NULL OR status = $1)
          AND ($2::text IS NULL OR priority = $2)
          AND ($3::uuid IS NULL OR assignee_id = $3)
          AND ($4::uuid IS NULL OR requester_id = $4)
          AND ($5::text IS NULL OR source = $5)
          AND (NOT $6 OR {breached})
          AND (NOT $8 OR status NOT IN {TERMINAL_STATUSES})
        "#,
        breached = pg_breached_clause("$7"),
    )
}

macro_rules! bind_pg_ticket_filter {
    ($query:expr, $filter:expr, $now:expr) => {
        $query
            .bind($filter.status.map(|s| s.as_db_str()))
            .bind($filter.priority.map(|p| p.as_db_str()))
            .bind($filter.assignee_id)
            .bind($filter.requester_id)
            .bind($filter.source.map(|s| s.as_db_str()))
            .bind($filter.breached_only)
            .bind($now)
            .bind($filter.open_only)
    };
}

pub(super) async fn insert_pg_ticket(
    conn: &mut sqlx::PgConnection,
    ticket: &Ticket,
) -> Result<Ticket, DbError> {
    let number: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO tickets (id, title, description, priority, status, source,
            requester_id, assignee_id, asset_id, service_item_id, sla_breach_at, completed_at,
            created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING number
        "#,
    )
    .bind(ticket.id)
    .bind(&ticket.title)
    .bind(&ticket.description)
    .bind(ticket.priority.as_db_str())
    .bind(ticket.status.as_db_str())
    .bind(ticket.source.as_db_str())
    .bind(ticket.requester_id)
    .bind(ticket.assignee_id)
    .bind(ticket.asset_id)
    .bind(ticket.service_item_id)
    .bind(ticket.sla_breach_at)
    .bind(ticket.completed_at)
    .bind(ticket.created_at)
    .bind(ticket.updated_at)
    .fetch_one(conn)
    .await?;

    Ok(Ticket {
        number,
        ..ticket.clone()
    })
}

#[async_trait]
impl TicketRepository for PgTicketRepository {
    async fn create(&self, ticket: &Ticket) -> Result<Ticket, DbError> {
        let mut conn = self.pool.acquire().await?;
        insert_pg_ticket(&mut conn, ticket).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Ticket>, DbError> {
        let row: Option<PgTicketRow> =
            sqlx::query_as(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_number(&self, number: i64) -> Result<Option<Ticket>, DbError> {
        let row: Option<PgTicketRow> =
            sqlx::query_as(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE number = $1"))
                .bind(number)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(
        &self,
        filter: &TicketFilter,
        pagination: &Pagination,
        now: DateTime<Utc>,
    ) -> Result<PaginatedResult<Ticket>, DbError> {
        let where_clause = pg_ticket_filter();

        let count_sql = format!("SELECT COUNT(*) FROM tickets {where_clause}");
        let total: i64 = bind_pg_ticket_filter!(sqlx::query_scalar(&count_sql), filter, now)
            .fetch_one(&self.pool)
            .await?;

        let list_sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets {where_clause} ORDER BY created_at DESC, number DESC LIMIT $9 OFFSET $10"
        );
        let rows: Vec<PgTicketRow> = bind_pg_ticket_filter!(sqlx::query_as(&list_sql), filter, now)
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

    async fn save(&self, ticket: &Ticket) -> Result<Ticket, DbError> {
        let row: Option<PgTicketRow> = sqlx::query_as(&format!(
            r#"
            UPDATE tickets SET
                title = $1, description = $2, priority = $3, status = $4, source = $5,
                requester_id = $6, assignee_id = $7, asset_id = $8, service_item_id = $9,
                sla_breach_at = $10, completed_at = $11, updated_at = NOW()
            WHERE id = $12
            RETURNING {TICKET_COLUMNS}
            "#
        ))
        .bind(&ticket.title)
        .bind(&ticket.description)
        .bind(ticket.priority.as_db_str())
        .bind(ticket.status.as_db_str())
        .bind(ticket.source.as_db_str())
        .bind(ticket.requester_id)
        .bind(ticket.assignee_id)
        .bind(ticket.asset_id)
        .bind(ticket.service_item_id)
        .bind(ticket.sla_breach_at)
        .bind(ticket.completed_at)
        .bind(ticket.id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into)
            .transpose()?
            .ok_or_else(|| DbError::not_found("Ticket", ticket.id))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM tickets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_open(&self) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM tickets WHERE status NOT IN {TERMINAL_STATUSES}"
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_breached(&self, now: DateTime<Utc>) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM tickets WHERE {}",
            pg_breached_clause("$1")
        ))
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

pub fn create_ticket_repository(pool: &DbPool) -> Box<dyn TicketRepository> {
    match pool {
        DbPool::Sqlite(pool) => Box::new(SqliteTicketRepository::new(pool.clone())),
        DbPool::Postgres(pool) => Box::new(PgTicketRepository::new(pool.clone())),
    }
}

#[derive(sqlx::FromRow)]
struct SqliteTicketRow {
    id: String,
    number: i64,
    title: String,
    description: Option<String>,
    priority: String,
    status: String,
    source: String,
    requester_id: Option<String>,
    assignee_id: Option<String>,
    asset_id: Option<String>,
    service_item_id: Option<String>,
    sla_breach_at: Option<String>,
    completed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteTicketRow> for Ticket {
    type Error = DbError;

    fn try_from(row: SqliteTicketRow) -> Result<Self, Self::Error> {
        Ok(Ticket {
            id: parse_uuid(&row.id)?,
            number: row.number,
            title: row.title,
            description: row.description,
            priority: parse_enum(&row.priority, TicketPriority::from_db_str, "ticket priority")?,
            status: parse_enum(&row.status, TicketStatus::from_db_str, "ticket status")?,
            source: parse_enum(&row.source, TicketSource::from_db_str, "ticket source")?,
            requester_id: parse_opt_uuid(row.requester_id)?,
            assignee_id: parse_opt_uuid(row.assignee_id)?,
            asset_id: parse_opt_uuid(row.asset_id)?,
            service_item_id: parse_opt_uuid(row.service_item_id)?,
            sla_breach_at: parse_opt_ts(row.sla_breach_at)?,
            completed_at: parse_opt_ts(row.completed_at)?,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgTicketRow {
    id: Uuid,
    number: i64,
    title: String,
    description: Option<String>,
    priority: String,
    status: String,
    source: String,
    requester_id: Option<Uuid>,
    assignee_id: Option<Uuid>,
    asset_id: Option<Uuid>,
    service_item_id: Option<Uuid>,
    sla_breach_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PgTicketRow> for Ticket {
    type Error = DbError;

    fn try_from(row: PgTicketRow) -> Result<Self, Self::Error> {
        Ok(Ticket {
            id: row.id,
            number: row.number,
            title: row.title,
            description: row.description,
            priority: parse_enum(&row.priority, TicketPriority::from_db_str, "ticket priority")?,
            status: parse_enum(&row.status, TicketStatus::from_db_str, "ticket status")?,
            source: parse_enum(&row.source, TicketSource::from_db_str, "ticket source")?,
            requester_id: row.requester_id,
            assignee_id: row.assignee_id,
            asset_id: row.asset_id,
            service_item_id: row.service_item_id,
            sla_breach_at: row.sla_breach_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::sla::SlaPolicy;
    use chrono::Duration;

    fn ticket(title: &str, priority: TicketPriority) -> Ticket {
        let mut t = Ticket::new(title, priority, TicketSource::Helpdesk);
        t.apply_sla(&SlaPolicy::default(), None);
        t
    }

    #[tokio::test]
    async fn test_numbers_are_sequential() {
        let pool = test_pool().await;
        let repo = create_ticket_repository(&pool);

        let first = repo.create(&ticket("one", TicketPriority::Low)).await.unwrap();
        let second = repo.create(&ticket("two", TicketPriority::Low)).await.unwrap();
        assert_eq!(first.number, 1);
        assert_eq!(second.number, 2);
        assert_eq!(second.reference(), "TCK-000002");

        let loaded = repo.get_by_number(2).await.unwrap().unwrap();
        assert_eq!(loaded.id, second.id);
    }

    #[tokio::test]
    async fn test_breached_filter_and_counts() {
        let pool = test_pool().await;
        let repo = create_ticket_repository(&pool);
        let now = Utc::now();

        let mut overdue = ticket("overdue", TicketPriority::Critical);
        overdue.sla_breach_at = Some(now - Duration::hours(1));
        repo.create(&overdue).await.unwrap();

        let on_time = ticket("on time", TicketPriority::Low);
        repo.create(&on_time).await.unwrap();

        let mut closed_late = ticket("closed late", TicketPriority::High);
        closed_late.sla_breach_at = Some(now - Duration::hours(3));
        closed_late.transition(TicketStatus::Closed, now - Duration::hours(2));
        repo.create(&closed_late).await.unwrap();

        let mut closed_on_time = ticket("closed on time", TicketPriority::High);
        closed_on_time.sla_breach_at = Some(now - Duration::hours(1));
        closed_on_time.transition(TicketStatus::Resolved, now - Duration::hours(2));
        repo.create(&closed_on_time).await.unwrap();

        let breached = repo
            .list(
                &TicketFilter {
                    breached_only: true,
                    ..Default::default()
                },
                &Pagination::default(),
                now,
            )
            .await
            .unwrap();
        let titles: Vec<_> = breached.items.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(breached.total, 2);
        assert!(titles.contains(&"overdue"));
        assert!(titles.contains(&"closed late"));

        assert_eq!(repo.count_breached(now).await.unwrap(), 2);
        assert_eq!(repo.count_open().await.unwrap(), 2);

        let open = repo
            .list(
                &TicketFilter {
                    open_only: true,
                    priority: Some(TicketPriority::Low),
                    ..Default::default()
                },
                &Pagination::default(),
                now,
            )
            .await
            .unwrap();
        assert_eq!(open.total, 1);
        assert_eq!(open.items[0].id, on_time.id);
    }

    #[tokio::test]
    async fn test_save_persists_transition() {
        let pool = test_pool().await;
        let repo = create_ticket_repository(&pool);
        let mut t = repo.create(&ticket("fix", TicketPriority::Medium)).await.unwrap();

        t.transition(TicketStatus::Completed, Utc::now());
        repo.save(&t).await.unwrap();
        let loaded = repo.get(t.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TicketStatus::Completed);
        assert!(loaded.completed_at.is_some());

        assert!(repo.delete(t.id).await.unwrap());
        assert!(repo.save(&t).await.unwrap_err().is_not_found());
    }
}
