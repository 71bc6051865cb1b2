use super::convert::{fmt_opt_ts, fmt_ts, opt_uuid, parse_enum, parse_opt_ts, parse_ts, parse_uuid};
use super::{DbError, DbPool, PaginatedResult, Pagination};
use crate::models::{Visit, VisitFilter, VisitStatus};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

#[async_trait]
pub trait VisitRepository: Send + Sync {
    async fn create(&self, visit: &Visit) -> Result<Visit, DbError>;
    async fn get(&self, id: Uuid) -> Result<Option<Visit>, DbError>;
    /// Ordered by expected arrival.
    async fn list(
        &self,
        filter: &VisitFilter,
        pagination: &Pagination,
    ) -> Result<PaginatedResult<Visit>, DbError>;
    async fn save(&self, visit: &Visit) -> Result<Visit, DbError>;
    /// Visitors currently checked in.
    async fn count_on_site(&self) -> Result<i64, DbError>;
}

const VISIT_COLUMNS: &str = "id, visitor_name, company, email, phone, host_employee_id, purpose, badge_number, expected_at, checked_in_at, checked_out_at, status, created_at, updated_at";

/// `[start, end)` of a UTC day.
fn day_bounds(date: Option<NaiveDate>) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    match date.and_then(|d| d.and_hms_opt(0, 0, 0)) {
        Some(midnight) => {
            let start = midnight.and_utc();
            (Some(start), Some(start + Duration::days(1)))
        }
        None => (None, None),
    }
}

pub struct SqliteVisitRepository {
    pool: sqlx::SqlitePool,
}

impl SqliteVisitRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

const SQLITE_VISIT_FILTER: &str = r#"
    WHERE (?1 IS NULL OR status = ?1)
      AND (?2 IS NULL OR host_employee_id = ?2)
      AND (?3 IS NULL OR expected_at >= ?3)
      AND (?4 IS NULL OR expected_at < ?4)
"#;

#[async_trait]
impl VisitRepository for SqliteVisitRepository {
    async fn create(&self, visit: &Visit) -> Result<Visit, DbError> {
        sqlx::query(&format!(
            "INSERT INTO visits ({VISIT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(visit.id.to_string())
        .bind(&visit.visitor_name)
        .bind(&visit.company)
        .bind(&visit.email)
        .bind(&visit.phone)
        .bind(visit.host_employee_id.to_string())
        .bind(&visit.purpose)
        .bind(&visit.badge_number)
        .bind(fmt_ts(visit.expected_at))
        .bind(fmt_opt_ts(visit.checked_in_at))
        .bind(fmt_opt_ts(visit.checked_out_at))
        .bind(visit.status.as_db_str())
        .bind(fmt_ts(visit.created_at))
        .bind(fmt_ts(visit.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(visit.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Visit>, DbError> {
        let row: Option<SqliteVisitRow> =
            sqlx::query_as(&format!("SELECT {VISIT_COLUMNS} FROM visits WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(
        &self,
        filter: &VisitFilter,
        pagination: &Pagination,
    ) -> Result<PaginatedResult<Visit>, DbError> {
        let (day_start, day_end) = day_bounds(filter.date);
        let status = filter.status.map(|s| s.as_db_str());
        let host = opt_uuid(filter.host_employee_id);
        let day_start = fmt_opt_ts(day_start);
        let day_end = fmt_opt_ts(day_end);

        let count_sql = format!("SELECT COUNT(*) FROM visits {SQLITE_VISIT_FILTER}");
        let total: i64 = sqlx::query_scalar(&count_sql)
            .bind(status)
            .bind(&host)
            .bind(&day_start)
            .bind(&day_end)
            .fetch_one(&self.pool)
            .await?;

        let list_sql = format!(
            "SELECT {VISIT_COLUMNS} FROM visits {SQLITE_VISIT_FILTER} ORDER BY expected_at LIMIT ?5 OFFSET ?6"
        );
        let rows: Vec<SqliteVisitRow> = sqlx::query_as(&list_sql)
            .bind(status)
            .bind(&host)
            .bind(&day_start)
            .bind(&day_end)
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

    async fn save(&self, visit: &Visit) -> Result<Visit, DbError> {
        let updated_at = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE visits SET
                visitor_name = ?, company = ?, email = ?, phone = ?, host_employee_id = ?,
                purpose = ?, badge_number = ?, expected_at = ?, checked_in_at = ?,
                checked_out_at = ?, status = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&visit.visitor_name)
        .bind(&visit.company)
        .bind(&visit.email)
        .bind(&visit.phone)
        .bind(visit.host_employee_id.to_string())
        .bind(&visit.purpose)
        .bind(&visit.badge_number)
        .bind(fmt_ts(visit.expected_at))
        .bind(fmt_opt_ts(visit.checked_in_at))
        .bind(fmt_opt_ts(visit.checked_out_at))
        .bind(visit.status.as_db_str())
        .bind(fmt_ts(updated_at))
        .bind(visit.id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Visit", visit.id));
        }
        Ok(Visit {
            updated_at,
            ..visit.clone()
        })
    }

    async fn count_on_site(&self) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM visits WHERE status = 'checked_in'")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

pub struct PgVisitRepository {
    pool: sqlx::PgPool,
}

impl PgVisitRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

const PG_VISIT_FILTER: &str = r#"
    WHERE ($1::text IS NULL OR status = $1)
      AND ($2::uuid IS NULL OR host_employee_id = $2)
      AND ($3::timestamptz IS NULL OR expected_at >= $3)
      AND ($4::timestamptz IS NULL OR expected_at < $4)
"#;

#[async_trait]
impl VisitRepository for PgVisitRepository {
    async fn create(&self, visit: &Visit) -> Result<Visit, DbError> {
        sqlx::query(&format!(
            "INSERT INTO visits ({VISIT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(visit.id)
        .bind(&visit.visitor_name)
        .bind(&visit.company)
        .bind(&visit.email)
        .bind(&visit.phone)
        .bind(visit.host_employee_id)
        .bind(&visit.purpose)
        .bind(&visit.badge_number)
        .bind(visit.expected_at)
        .bind(visit.checked_in_at)
        .bind(visit.checked_out_at)
        .bind(visit.status.as_db_str())
        .bind(visit.created_at)
        .bind(visit.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(visit.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Visit>, DbError> {
        let row: Option<PgVisitRow> =
            sqlx::query_as(&format!("SELECT {VISIT_COLUMNS} FROM visits WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(
        &self,
        filter: &VisitFilter,
        pagination: &Pagination,
    ) -> Result<PaginatedResult<Visit>, DbError> {
        let (day_start, day_end) = day_bounds(filter.date);
        let status = filter.status.map(|s| s.as_db_str());

        let count_sql = format!("SELECT COUNT(*) FROM visits {PG_VISIT_FILTER}");
        let total: i64 = sqlx::query_scalar(&count_sql)
            .bind(status)
            .bind(filter.host_employee_id)
            .bind(day_start)
            .bind(day_end)
            .fetch_one(&self.pool)
            .await?;

        let list_sql = format!(
            "SELECT {VISIT_COLUMNS} FROM visits {PG_VISIT_FILTER} ORDER BY expected_at LIMIT $5 OFFSET $6"
        );
        let rows: Vec<PgVisitRow> = sqlx::query_as(&list_sql)
            .bind(status)
            .bind(filter.host_employee_id)
            .bind(day_start)
            .bind(day_end)
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

    async fn save(&self, visit: &Visit) -> Result<Visit, DbError> {
        let row: Option<PgVisitRow> = sqlx::query_as(&format!(
            r#"
            UPDATE visits SET
                visitor_name = $1, company = $2, email = $3, phone = $4, host_employee_id = $5,
                purpose = $6, badge_number = $7, expected_at = $8, checked_in_at = $9,
                checked_out_at = $10, status = $11, updated_at = NOW()
            WHERE id = $12
            RETURNING {VISIT_COLUMNS}
            "#
        ))
        .bind(&visit.visitor_name)
        .bind(&visit.company)
        .bind(&visit.email)
        .bind(&visit.phone)
        .bind(visit.host_employee_id)
        .bind(&visit.purpose)
        .bind(&visit.badge_number)
        .bind(visit.expected_at)
        .bind(visit.checked_in_at)
        .bind(visit.checked_out_at)
        .bind(visit.status.as_db_str())
        .bind(visit.id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into)
            .transpose()?
            .ok_or_else(|| DbError::not_found("Visit", visit.id))
    }

    async fn count_on_site(&self) -> Result<i64, DbError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM visits WHERE status = 'checked_in'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

pub fn create_visit_repository(pool: &DbPool) -> Box<dyn VisitRepository> {
    match pool {
        DbPool::Sqlite(pool) => Box::new(SqliteVisitRepository::new(pool.clone())),
        DbPool::Postgres(pool) => Box::new(PgVisitRepository::new(pool.clone())),
    }
}

#[derive(sqlx::FromRow)]
struct SqliteVisitRow {
    id: String,
    visitor_name: String,
    company: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    host_employee_id: String,
    purpose: Option<String>,
    badge_number: Option<String>,
    expected_at: String,
    checked_in_at: Option<String>,
    checked_out_at: Option<String>,
    status: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteVisitRow> for Visit {
    type Error = DbError;

    fn try_from(row: SqliteVisitRow) -> Result<Self, Self::Error> {
        Ok(Visit {
            id: parse_uuid(&row.id)?,
            visitor_name: row.visitor_name,
            company: row.company,
            email: row.email,
            phone: row.phone,
            host_employee_id: parse_uuid(&row.host_employee_id)?,
            purpose: row.purpose,
            badge_number: row.badge_number,
            expected_at: parse_ts(&row.expected_at)?,
            checked_in_at: parse_opt_ts(row.checked_in_at)?,
            checked_out_at: parse_opt_ts(row.checked_out_at)?,
            status: parse_enum(&row.status, VisitStatus::from_db_str, "visit status")?,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgVisitRow {
    id: Uuid,
    visitor_name: String,
    company: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    host_employee_id: Uuid,
    purpose: Option<String>,
    badge_number: Option<String>,
    expected_at: DateTime<Utc>,
    checked_in_at: Option<DateTime<Utc>>,
    checked_out_at: Option<DateTime<Utc>>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PgVisitRow> for Visit {
    type Error = DbError;

    fn try_from(row: PgVisitRow) -> Result<Self, Self::Error> {
        Ok(Visit {
            id: row.id,
            visitor_name: row.visitor_name,
            company: row.company,
            email: row.email,
            phone: row.phone,
            host_employee_id: row.host_employee_id,
            purpose: row.purpose,
            badge_number: row.badge_number,
            expected_at: row.expected_at,
            checked_in_at: row.checked_in_at,
            checked_out_at: row.checked_out_at,
            status: parse_enum(&row.status, VisitStatus::from_db_str, "visit status")?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_employee_repository, test_pool};
    use crate::models::Employee;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_list_by_day_and_on_site_count() {
        let pool = test_pool().await;
        let host = Employee::new("E-1", "Henry", "Host", "henry@example.com");
        create_employee_repository(&pool).create(&host).await.unwrap();
        let repo = create_visit_repository(&pool);

        let monday = Utc.with_ymd_and_hms(2024, 6, 3, 9, 30, 0).unwrap();
        let mut early = Visit::new("Vera", host.id, monday);
        repo.create(&early).await.unwrap();
        repo.create(&Visit::new("Victor", host.id, monday + Duration::hours(4)))
            .await
            .unwrap();
        repo.create(&Visit::new("Tuesday guest", host.id, monday + Duration::days(1)))
            .await
            .unwrap();

        let on_monday = repo
            .list(
                &VisitFilter {
                    date: NaiveDate::from_ymd_opt(2024, 6, 3),
                    ..Default::default()
                },
                &Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(on_monday.total, 2);
        assert_eq!(on_monday.items[0].visitor_name, "Vera");

        early.check_in(Some("B-7".into()), monday).unwrap();
        repo.save(&early).await.unwrap();
        assert_eq!(repo.count_on_site().await.unwrap(), 1);

        let checked_in = repo
            .list(
                &VisitFilter {
                    status: Some(VisitStatus::CheckedIn),
                    ..Default::default()
                },
                &Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(checked_in.items[0].badge_number.as_deref(), Some("B-7"));
    }
}
