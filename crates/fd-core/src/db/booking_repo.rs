//! Meeting rooms and their bookings.

use super::convert::{fmt_opt_ts, fmt_ts, opt_uuid, parse_enum, parse_opt_ts, parse_opt_uuid, parse_ts, parse_uuid};
use super::{DbError, DbPool, PaginatedResult, Pagination};
use crate::models::{Booking, BookingFilter, BookingStatus, Room};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn create_room(&self, room: &Room) -> Result<Room, DbError>;
    async fn get_room(&self, id: Uuid) -> Result<Option<Room>, DbError>;
    async fn list_rooms(&self) -> Result<Vec<Room>, DbError>;
    async fn save_room(&self, room: &Room) -> Result<Room, DbError>;
    async fn delete_room(&self, id: Uuid) -> Result<bool, DbError>;

    async fn create(&self, booking: &Booking) -> Result<Booking, DbError>;
    async fn get(&self, id: Uuid) -> Result<Option<Booking>, DbError>;
    /// Ordered by start time.
    async fn list(
        &self,
        filter: &BookingFilter,
        pagination: &Pagination,
    ) -> Result<PaginatedResult<Booking>, DbError>;
    async fn save(&self, booking: &Booking) -> Result<Booking, DbError>;

    /// Pending or confirmed bookings of `room_id` intersecting `[start, end)`.
    async fn find_overlapping(
        &self,
        room_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Booking>, DbError>;
}

const BOOKING_COLUMNS: &str =
    "id, room_id, organizer_id, title, start_at, end_at, status, completed_at, created_at, updated_at";

const ROOM_COLUMNS: &str = "id, name, location_id, capacity, created_at, updated_at";

pub struct SqliteBookingRepository {
    pool: sqlx::SqlitePool,
}

impl SqliteBookingRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

const SQLITE_BOOKING_FILTER: &str = r#"
    WHERE (?1 IS NULL OR room_id = ?1)
      AND (?2 IS NULL OR organizer_id = ?2)
      AND (?3 IS NULL OR status = ?3)
      AND (?4 IS NULL OR end_at > ?4)
      AND (?5 IS NULL OR start_at < ?5)
"#;

macro_rules! bind_sqlite_booking_filter {
    ($query:expr, $filter:expr) => {
        $query
            .bind(opt_uuid($filter.room_id))
            .bind(opt_uuid($filter.organizer_id))
            .bind($filter.status.map(|s| s.as_db_str()))
            .bind(fmt_opt_ts($filter.from))
            .bind(fmt_opt_ts($filter.until))
    };
}

#[async_trait]
impl BookingRepository for SqliteBookingRepository {
    async fn create_room(&self, room: &Room) -> Result<Room, DbError> {
        sqlx::query(&format!("INSERT INTO rooms ({ROOM_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)"))
            .bind(room.id.to_string())
            .bind(&room.name)
            .bind(opt_uuid(room.location_id))
            .bind(room.capacity)
            .bind(fmt_ts(room.created_at))
            .bind(fmt_ts(room.updated_at))
            .execute(&self.pool)
            .await?;
        Ok(room.clone())
    }

    async fn get_room(&self, id: Uuid) -> Result<Option<Room>, DbError> {
        let row: Option<SqliteRoomRow> =
            sqlx::query_as(&format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_rooms(&self) -> Result<Vec<Room>, DbError> {
        let rows: Vec<SqliteRoomRow> =
            sqlx::query_as(&format!("SELECT {ROOM_COLUMNS} FROM rooms ORDER BY name"))
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_room(&self, room: &Room) -> Result<Room, DbError> {
        let updated_at = Utc::now();
        let result = sqlx::query(
            "UPDATE rooms SET name = ?, location_id = ?, capacity = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&room.name)
        .bind(opt_uuid(room.location_id))
        .bind(room.capacity)
        .bind(fmt_ts(updated_at))
        .bind(room.id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Room", room.id));
        }
        Ok(Room {
            updated_at,
            ..room.clone()
        })
    }

    async fn delete_room(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM rooms WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create(&self, booking: &Booking) -> Result<Booking, DbError> {
        sqlx::query(&format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(booking.id.to_string())
        .bind(booking.room_id.to_string())
        .bind(booking.organizer_id.to_string())
        .bind(&booking.title)
        .bind(fmt_ts(booking.start_at))
        .bind(fmt_ts(booking.end_at))
        .bind(booking.status.as_db_str())
        .bind(fmt_opt_ts(booking.completed_at))
        .bind(fmt_ts(booking.created_at))
        .bind(fmt_ts(booking.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(booking.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Booking>, DbError> {
        let row: Option<SqliteBookingRow> =
            sqlx::query_as(&format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(
        &self,
        filter: &BookingFilter,
        pagination: &Pagination,
    ) -> Result<PaginatedResult<Booking>, DbError> {
        let count_sql = format!("SELECT COUNT(*) FROM bookings {SQLITE_BOOKING_FILTER}");
        let total: i64 = bind_sqlite_booking_filter!(sqlx::query_scalar(&count_sql), filter)
            .fetch_one(&self.pool)
            .await?;

        let list_sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings {SQLITE_BOOKING_FILTER} ORDER BY start_at LIMIT ?6 OFFSET ?7"
        );
        let rows: Vec<SqliteBookingRow> =
            bind_sqlite_booking_filter!(sqlx::query_as(&list_sql), filter)
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

    async fn save(&self, booking: &Booking) -> Result<Booking, DbError> {
        let updated_at = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE bookings SET
                room_id = ?, organizer_id = ?, title = ?, start_at = ?, end_at = ?,
                status = ?, completed_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(booking.room_id.to_string())
        .bind(booking.organizer_id.to_string())
        .bind(&booking.title)
        .bind(fmt_ts(booking.start_at))
        .bind(fmt_ts(booking.end_at))
        .bind(booking.status.as_db_str())
        .bind(fmt_opt_ts(booking.completed_at))
        .bind(fmt_ts(updated_at))
        .bind(booking.id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Booking", booking.id));
        }
        Ok(Booking {
            updated_at,
            ..booking.clone()
        })
    }

    async fn find_overlapping(
        &self,
        room_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Booking>, DbError> {
        let rows: Vec<SqliteBookingRow> = sqlx::query_as(&format!(
            r#"
            SELECT {BOOKING_COLUMNS} FROM bookings
            WHERE room_id = ?1
              AND status IN ('pending', 'confirmed')
              AND start_at < ?3
              AND end_at > ?2
              AND (?4 IS NULL OR id <> ?4)
            ORDER BY start_at
            "#
        ))
        .bind(room_id.to_string())
        .bind(fmt_ts(start))
        .bind(fmt_ts(end))
        .bind(opt_uuid(exclude))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

pub struct PgBookingRepository {
    pool: sqlx::PgPool,
}

impl PgBookingRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

const PG_BOOKING_FILTER: &str = r#"
    WHERE ($1::uuid IS NULL OR room_id = $1)
      AND ($2::uuid IS NULL OR organizer_id = $2)
      AND ($3::text IS NULL OR status = $3)
      AND ($4::timestamptz IS NULL OR end_at > $4)
      AND ($5::timestamptz IS NULL OR start_at < $5)
"#;

macro_rules! bind_pg_booking_filter {
    ($query:expr, $filter:expr) => {
        $query
            .bind($filter.room_id)
            .bind($filter.organizer_id)
            .bind($filter.status.map(|s| s.as_db_str()))
            .bind($filter.from)
            .bind($filter.until)
    };
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn create_room(&self, room: &Room) -> Result<Room, DbError> {
        sqlx::query(&format!(
            "INSERT INTO rooms ({ROOM_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)"
        ))
        .bind(room.id)
        .bind(&room.name)
        .bind(room.location_id)
        .bind(room.capacity)
        .bind(room.created_at)
        .bind(room.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(room.clone())
    }

    async fn get_room(&self, id: Uuid) -> Result<Option<Room>, DbError> {
        let row: Option<PgRoomRow> =
            sqlx::query_as(&format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Into::into))
    }

    async fn list_rooms(&self) -> Result<Vec<Room>, DbError> {
        let rows: Vec<PgRoomRow> =
            sqlx::query_as(&format!("SELECT {ROOM_COLUMNS} FROM rooms ORDER BY name"))
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn save_room(&self, room: &Room) -> Result<Room, DbError> {
        let row: Option<PgRoomRow> = sqlx::query_as(&format!(
            r#"
            UPDATE rooms SET name = $1, location_id = $2, capacity = $3, updated_at = NOW()
            WHERE id = $4
            RETURNING {ROOM_COLUMNS}
            "#
        ))
        .bind(&room.name)
        .bind(room.location_id)
        .bind(room.capacity)
        .bind(room.id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Into::into)
            .ok_or_else(|| DbError::not_found("Room", room.id))
    }

    async fn delete_room(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM rooms WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create(&self, booking: &Booking) -> Result<Booking, DbError> {
        sqlx::query(&format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(booking.id)
        .bind(booking.room_id)
        .bind(booking.organizer_id)
        .bind(&booking.title)
        .bind(booking.start_at)
        .bind(booking.end_at)
        .bind(booking.status.as_db_str())
        .bind(booking.completed_at)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(booking.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Booking>, DbError> {
        let row: Option<PgBookingRow> =
            sqlx::query_as(&format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(
        &self,
        filter: &BookingFilter,
        pagination: &Pagination,
    ) -> Result<PaginatedResult<Booking>, DbError> {
        let count_sql = format!("SELECT COUNT(*) FROM bookings {PG_BOOKING_FILTER}");
        let total: i64 = bind_pg_booking_filter!(sqlx::query_scalar(&count_sql), filter)
            .fetch_one(&self.pool)
            .await?;

        let list_sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings {PG_BOOKING_FILTER} ORDER BY start_at LIMIT $6 OFFSET $7"
        );
        let rows: Vec<PgBookingRow> = bind_pg_booking_filter!(sqlx::query_as(&list_sql), filter)
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

    async fn save(&self, booking: &Booking) -> Result<Booking, DbError> {
        let row: Option<PgBookingRow> = sqlx::query_as(&format!(
            r#"
            UPDATE bookings SET
                room_id = $1, organizer_id = $2, title = $3, start_at = $4, end_at = $5,
                status = $6, completed_at = $7, updated_at = NOW()
            WHERE id = $8
            RETURNING {BOOKING_COLUMNS}
            "#
        ))
        .bind(booking.room_id)
        .bind(booking.organizer_id)
        .bind(&booking.title)
        .bind(booking.start_at)
        .bind(booking.end_at)
        .bind(booking.status.as_db_str())
        .bind(booking.completed_at)
        .bind(booking.id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into)
            .transpose()?
            .ok_or_else(|| DbError::not_found("Booking", booking.id))
    }

    async fn find_overlapping(
        &self,
        room_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Booking>, DbError> {
        let rows: Vec<PgBookingRow> = sqlx::query_as(&format!(
            r#"
            SELECT {BOOKING_COLUMNS} FROM bookings
            WHERE room_id = $1
              AND status IN ('pending', 'confirmed')
              AND start_at < $3
              AND end_at > $2
              AND ($4::uuid IS NULL OR id <> $4)
            ORDER BY start_at
            "#
        ))
        .bind(room_id)
        .bind(start)
        .bind(end)
        .bind(exclude)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

pub fn create_booking_repository(pool: &DbPool) -> Box<dyn BookingRepository> {
    match pool {
        DbPool::Sqlite(pool) => Box::new(SqliteBookingRepository::new(pool.clone())),
        DbPool::Postgres(pool) => Box::new(PgBookingRepository::new(pool.clone())),
    }
}

#[derive(sqlx::FromRow)]
struct SqliteRoomRow {
    id: String,
    name: String,
    location_id: Option<String>,
    capacity: i32,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteRoomRow> for Room {
    type Error = DbError;

    fn try_from(row: SqliteRoomRow) -> Result<Self, Self::Error> {
        Ok(Room {
            id: parse_uuid(&row.id)?,
            name: row.name,
            location_id: parse_opt_uuid(row.location_id)?,
            capacity: row.capacity,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgRoomRow {
    id: Uuid,
    name: String,
    location_id: Option<Uuid>,
    capacity: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PgRoomRow> for Room {
    fn from(row: PgRoomRow) -> Self {
        Room {
            id: row.id,
            name: row.name,
            location_id: row.location_id,
            capacity: row.capacity,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SqliteBookingRow {
    id: String,
    room_id: String,
    organizer_id: String,
    title: String,
    start_at: String,
    end_at: String,
    status: String,
    completed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteBookingRow> for Booking {
    type Error = DbError;

    fn try_from(row: SqliteBookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: parse_uuid(&row.id)?,
            room_id: parse_uuid(&row.room_id)?,
            organizer_id: parse_uuid(&row.organizer_id)?,
            title: row.title,
            start_at: parse_ts(&row.start_at)?,
            end_at: parse_ts(&row.end_at)?,
            status: parse_enum(&row.status, BookingStatus::from_db_str, "booking status")?,
            completed_at: parse_opt_ts(row.completed_at)?,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgBookingRow {
    id: Uuid,
    room_id: Uuid,
    organizer_id: Uuid,
    title: String,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    status: String,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PgBookingRow> for Booking {
    type Error = DbError;

    fn try_from(row: PgBookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            room_id: row.room_id,
            organizer_id: row.organizer_id,
            title: row.title,
            start_at: row.start_at,
            end_at: row.end_at,
            status: parse_enum(&row.status, BookingStatus::from_db_str, "booking status")?,
            completed_at: row.completed_at,
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
    use chrono::{Duration, TimeZone};

    async fn setup() -> (DbPool, Room, Employee) {
        let pool = test_pool().await;
        let employee = Employee::new("E-1", "Rita", "Room", "rita@example.com");
        create_employee_repository(&pool)
            .create(&employee)
            .await
            .unwrap();
        let room = Room::new("Boardroom", 12);
        create_booking_repository(&pool)
            .create_room(&room)
            .await
            .unwrap();
        (pool, room, employee)
    }

    #[tokio::test]
    async fn test_overlap_is_half_open_and_ignores_cancelled() {
        let (pool, room, employee) = setup().await;
        let repo = create_booking_repository(&pool);
        let nine = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        let ten = nine + Duration::hours(1);
        let eleven = ten + Duration::hours(1);

        let existing = Booking::new(room.id, employee.id, "Standup", nine, ten);
        repo.create(&existing).await.unwrap();
        let mut cancelled = Booking::new(room.id, employee.id, "Cancelled", ten, eleven);
        cancelled.status = BookingStatus::Cancelled;
        repo.create(&cancelled).await.unwrap();

        let clash = repo
            .find_overlapping(room.id, nine + Duration::minutes(30), eleven, None)
            .await
            .unwrap();
        assert_eq!(clash.len(), 1);
        assert_eq!(clash[0].id, existing.id);

        assert!(repo
            .find_overlapping(room.id, ten, eleven, None)
            .await
            .unwrap()
            .is_empty());
        assert!(repo
            .find_overlapping(room.id, nine, ten, Some(existing.id))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_end_before_start_rejected_by_schema() {
        let (pool, room, employee) = setup().await;
        let repo = create_booking_repository(&pool);
        let start = Utc::now();
        let bad = Booking::new(room.id, employee.id, "Backwards", start, start - Duration::hours(1));
        assert!(repo.create(&bad).await.is_err());
    }

    #[tokio::test]
    async fn test_list_by_range() {
        let (pool, room, employee) = setup().await;
        let repo = create_booking_repository(&pool);
        let day = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap();

        for hour in [9, 13, 30] {
            let start = day + Duration::hours(hour);
            repo.create(&Booking::new(room.id, employee.id, format!("at {hour}"), start, start + Duration::hours(1)))
                .await
                .unwrap();
        }

        let same_day = repo
            .list(
                &BookingFilter {
                    from: Some(day),
                    until: Some(day + Duration::days(1)),
                    ..Default::default()
                },
                &Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(same_day.total, 2);
        assert_eq!(same_day.items[0].title, "at 9");
    }
}
