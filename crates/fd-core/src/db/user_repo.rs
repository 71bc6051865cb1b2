//! Admin account persistence, including per-user permission grants.

use super::convert::{fmt_opt_ts, fmt_ts, parse_enum, parse_opt_ts, parse_ts, parse_uuid};
use super::{make_like_pattern, DbError, DbPool};
use crate::auth::{Permission, Role, User, UserFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: &User) -> Result<User, DbError>;

    async fn get(&self, id: Uuid) -> Result<Option<User>, DbError>;

    async fn get_by_username(&self, username: &str) -> Result<Option<User>, DbError>;

    /// Looks up by username first, then by email.
    async fn find_by_login(&self, login: &str) -> Result<Option<User>, DbError>;

    async fn list(&self, filter: &UserFilter) -> Result<Vec<User>, DbError>;

    /// Persists profile fields (username, email, role, display name,
    /// enabled). Grants and the password are changed separately.
    async fn save(&self, user: &User) -> Result<User, DbError>;

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), DbError>;

    async fn update_last_login(&self, id: Uuid) -> Result<(), DbError>;

    async fn delete(&self, id: Uuid) -> Result<bool, DbError>;

    async fn any_exist(&self) -> Result<bool, DbError>;

    /// Returns `false` when the grant already existed.
    async fn grant_permission(&self, user_id: Uuid, permission: Permission) -> Result<bool, DbError>;

    /// Returns `false` when there was nothing to revoke.
    async fn revoke_permission(&self, user_id: Uuid, permission: Permission) -> Result<bool, DbError>;
}

const USER_COLUMNS: &str = "id, username, email, password_hash, role, display_name, enabled, last_login_at, created_at, updated_at";

fn parse_permissions(rows: Vec<String>) -> BTreeSet<Permission> {
    rows.iter()
        .filter_map(|p| Permission::from_db_str(p))
        .collect()
}

pub struct SqliteUserRepository {
    pool: sqlx::SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    async fn with_permissions(&self, row: Option<SqliteUserRow>) -> Result<Option<User>, DbError> {
        let Some(row) = row else { return Ok(None) };
        let grants: Vec<String> =
            sqlx::query_scalar("SELECT permission FROM user_permissions WHERE user_id = ?")
                .bind(&row.id)
                .fetch_all(&self.pool)
                .await?;
        let mut user: User = row.try_into()?;
        user.granted_permissions = parse_permissions(grants);
        Ok(Some(user))
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn create(&self, user: &User) -> Result<User, DbError> {
        let id = user.id.to_string();
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, role, display_name, enabled, last_login_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_db_str())
        .bind(&user.display_name)
        .bind(user.enabled)
        .bind(fmt_opt_ts(user.last_login_at))
        .bind(fmt_ts(user.created_at))
        .bind(fmt_ts(user.updated_at))
        .execute(&self.pool)
        .await?;

        for permission in &user.granted_permissions {
            sqlx::query("INSERT INTO user_permissions (user_id, permission, granted_at) VALUES (?, ?, ?)")
                .bind(&id)
                .bind(permission.as_db_str())
                .bind(fmt_ts(user.created_at))
                .execute(&self.pool)
                .await?;
        }

        Ok(user.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<User>, DbError> {
        let row: Option<SqliteUserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        self.with_permissions(row).await
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>, DbError> {
        let row: Option<SqliteUserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?"))
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;
        self.with_permissions(row).await
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>, DbError> {
        let row: Option<SqliteUserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ?1 OR lower(email) = lower(?1) ORDER BY username = ?1 DESC LIMIT 1"
        ))
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;
        self.with_permissions(row).await
    }

    async fn list(&self, filter: &UserFilter) -> Result<Vec<User>, DbError> {
        let rows: Vec<SqliteUserRow> = sqlx::query_as(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users
            WHERE (?1 IS NULL OR role = ?1)
              AND (?2 IS NULL OR enabled = ?2)
              AND (?3 IS NULL OR username LIKE ?3 ESCAPE '\' OR email LIKE ?3 ESCAPE '\' OR display_name LIKE ?3 ESCAPE '\')
            ORDER BY username ASC
            "#
        ))
        .bind(filter.role.map(|r| r.as_db_str()))
        .bind(filter.enabled)
        .bind(filter.search.as_deref().map(make_like_pattern))
        .fetch_all(&self.pool)
        .await?;

        let grants: Vec<(String, String)> =
            sqlx::query_as("SELECT user_id, permission FROM user_permissions")
                .fetch_all(&self.pool)
                .await?;
        let mut by_user: HashMap<String, Vec<String>> = HashMap::new();
        for (user_id, permission) in grants {
            by_user.entry(user_id).or_default().push(permission);
        }

        rows.into_iter()
            .map(|row| {
                let grants = by_user.remove(&row.id).unwrap_or_default();
                let mut user: User = row.try_into()?;
                user.granted_permissions = parse_permissions(grants);
                Ok(user)
            })
            .collect()
    }

    async fn save(&self, user: &User) -> Result<User, DbError> {
        let updated_at = Utc::now();
        let result = sqlx::query(
            "UPDATE users SET username = ?, email = ?, role = ?, display_name = ?, enabled = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.role.as_db_str())
        .bind(&user.display_name)
        .bind(user.enabled)
        .bind(fmt_ts(updated_at))
        .bind(user.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("User", user.id));
        }

        self.get(user.id)
            .await?
            .ok_or_else(|| DbError::not_found("User", user.id))
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), DbError> {
        let result = sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(password_hash)
            .bind(fmt_ts(Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("User", id));
        }
        Ok(())
    }

    async fn update_last_login(&self, id: Uuid) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET last_login_at = ? WHERE id = ?")
            .bind(fmt_ts(Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn any_exist(&self) -> Result<bool, DbError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn grant_permission(&self, user_id: Uuid, permission: Permission) -> Result<bool, DbError> {
        let result = sqlx::query(
            "INSERT INTO user_permissions (user_id, permission, granted_at) VALUES (?, ?, ?) ON CONFLICT (user_id, permission) DO NOTHING",
        )
        .bind(user_id.to_string())
        .bind(permission.as_db_str())
        .bind(fmt_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_permission(&self, user_id: Uuid, permission: Permission) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM user_permissions WHERE user_id = ? AND permission = ?")
            .bind(user_id.to_string())
            .bind(permission.as_db_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

pub struct PgUserRepository {
    pool: sqlx::PgPool,
}

impl PgUserRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    async fn with_permissions(&self, row: Option<PgUserRow>) -> Result<Option<User>, DbError> {
        let Some(row) = row else { return Ok(None) };
        let grants: Vec<String> =
            sqlx::query_scalar("SELECT permission FROM user_permissions WHERE user_id = $1")
                .bind(row.id)
                .fetch_all(&self.pool)
                .await?;
        let mut user: User = row.try_into()?;
        user.granted_permissions = parse_permissions(grants);
        Ok(Some(user))
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: &User) -> Result<User, DbError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, role, display_name, enabled, last_login_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_db_str())
        .bind(&user.display_name)
        .bind(user.enabled)
        .bind(user.last_login_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await?;

        for permission in &user.granted_permissions {
            sqlx::query("INSERT INTO user_permissions (user_id, permission) VALUES ($1, $2)")
                .bind(user.id)
                .bind(permission.as_db_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(user.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<User>, DbError> {
        let row: Option<PgUserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        self.with_permissions(row).await
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>, DbError> {
        let row: Option<PgUserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1"))
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;
        self.with_permissions(row).await
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>, DbError> {
        let row: Option<PgUserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1 OR lower(email) = lower($1) ORDER BY (username = $1) DESC LIMIT 1"
        ))
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;
        self.with_permissions(row).await
    }

    async fn list(&self, filter: &UserFilter) -> Result<Vec<User>, DbError> {
        let rows: Vec<PgUserRow> = sqlx::query_as(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users
            WHERE ($1::text IS NULL OR role = $1)
              AND ($2::boolean IS NULL OR enabled = $2)
              AND ($3::text IS NULL OR username ILIKE $3 OR email ILIKE $3 OR display_name ILIKE $3)
            ORDER BY username ASC
            "#
        ))
        .bind(filter.role.map(|r| r.as_db_str()))
        .bind(filter.enabled)
        .bind(filter.search.as_deref().map(make_like_pattern))
        .fetch_all(&self.pool)
        .await?;

        let grants: Vec<(Uuid, String)> =
            sqlx::query_as("SELECT user_id, permission FROM user_permissions")
                .fetch_all(&self.pool)
                .await?;
        let mut by_user: HashMap<Uuid, Vec<String>> = HashMap::new();
        for (user_id, permission) in grants {
            by_user.entry(user_id).or_default().push(permission);
        }

        rows.into_iter()
            .map(|row| {
                let grants = by_user.remove(&row.id).unwrap_or_default();
                let mut user: User = row.try_into()?;
                user.granted_permissions = parse_permissions(grants);
                Ok(user)
            })
            .collect()
    }

    async fn save(&self, user: &User) -> Result<User, DbError> {
        let result = sqlx::query(
            "UPDATE users SET username = $1, email = $2, role = $3, display_name = $4, enabled = $5, updated_at = NOW() WHERE id = $6",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.role.as_db_str())
        .bind(&user.display_name)
        .bind(user.enabled)
        .bind(user.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("User", user.id));
        }

        self.get(user.id)
            .await?
            .ok_or_else(|| DbError::not_found("User", user.id))
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), DbError> {
        let result =
            sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
                .bind(password_hash)
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("User", id));
        }
        Ok(())
    }

    async fn update_last_login(&self, id: Uuid) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn any_exist(&self) -> Result<bool, DbError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users)")
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn grant_permission(&self, user_id: Uuid, permission: Permission) -> Result<bool, DbError> {
        let result = sqlx::query(
            "INSERT INTO user_permissions (user_id, permission) VALUES ($1, $2) ON CONFLICT (user_id, permission) DO NOTHING",
        )
        .bind(user_id)
        .bind(permission.as_db_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_permission(&self, user_id: Uuid, permission: Permission) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM user_permissions WHERE user_id = $1 AND permission = $2")
            .bind(user_id)
            .bind(permission.as_db_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

pub fn create_user_repository(pool: &DbPool) -> Box<dyn UserRepository> {
    match pool {
        DbPool::Sqlite(pool) => Box::new(SqliteUserRepository::new(pool.clone())),
        DbPool::Postgres(pool) => Box::new(PgUserRepository::new(pool.clone())),
    }
}

#[derive(sqlx::FromRow)]
struct SqliteUserRow {
    id: String,
    username: String,
    email: String,
    password_hash: String,
    role: String,
    display_name: Option<String>,
    enabled: bool,
    last_login_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteUserRow> for User {
    type Error = DbError;

    fn try_from(row: SqliteUserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: parse_uuid(&row.id)?,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            role: parse_enum(&row.role, Role::from_db_str, "role")?,
            display_name: row.display_name,
            enabled: row.enabled,
            granted_permissions: BTreeSet::new(),
            last_login_at: parse_opt_ts(row.last_login_at)?,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgUserRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    role: String,
    display_name: Option<String>,
    enabled: bool,
    last_login_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PgUserRow> for User {
    type Error = DbError;

    fn try_from(row: PgUserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            role: parse_enum(&row.role, Role::from_db_str, "role")?,
            display_name: row.display_name,
            enabled: row.enabled,
            granted_permissions: BTreeSet::new(),
            last_login_at: row.last_login_at,
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
    async fn test_create_and_lookup() {
        let pool = test_pool().await;
        let repo = create_user_repository(&pool);

        let user = User::new("jdoe", "John.Doe@example.com", "hash", Role::Technician);
        repo.create(&user).await.unwrap();

        let by_name = repo.find_by_login("jdoe").await.unwrap().unwrap();
        assert_eq!(by_name.id, user.id);
        let by_email = repo.find_by_login("john.doe@example.com").await.unwrap().unwrap();
        assert_eq!(by_email.id, user.id);
        assert!(repo.find_by_login("nobody").await.unwrap().is_none());
        assert!(repo.any_exist().await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_username_is_constraint_error() {
        let pool = test_pool().await;
        let repo = create_user_repository(&pool);
        repo.create(&User::new("dup", "a@example.com", "h", Role::Viewer))
            .await
            .unwrap();
        let err = repo
            .create(&User::new("dup", "b@example.com", "h", Role::Viewer))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_grant_and_revoke() {
        let pool = test_pool().await;
        let repo = create_user_repository(&pool);
        let user = User::new("v", "v@example.com", "h", Role::Viewer);
        repo.create(&user).await.unwrap();

        assert!(repo.grant_permission(user.id, Permission::ManageKnowledge).await.unwrap());
        assert!(!repo.grant_permission(user.id, Permission::ManageKnowledge).await.unwrap());

        let loaded = repo.get(user.id).await.unwrap().unwrap();
        assert!(loaded.has_permission(Permission::ManageKnowledge));

        let listed = repo.list(&UserFilter::default()).await.unwrap();
        assert!(listed[0].granted_permissions.contains(&Permission::ManageKnowledge));

        assert!(repo.revoke_permission(user.id, Permission::ManageKnowledge).await.unwrap());
        assert!(!repo.revoke_permission(user.id, Permission::ManageKnowledge).await.unwrap());
        let loaded = repo.get(user.id).await.unwrap().unwrap();
        assert!(!loaded.has_permission(Permission::ManageKnowledge));
    }

    #[tokio::test]
    async fn test_save_and_filter() {
        let pool = test_pool().await;
        let repo = create_user_repository(&pool);
        let mut user = User::new("tech_1", "t1@example.com", "h", Role::Technician);
        repo.create(&user).await.unwrap();
        repo.create(&User::new("other", "o@example.com", "h", Role::Viewer))
            .await
            .unwrap();

        user.enabled = false;
        user.display_name = Some("Tech One".into());
        let saved = repo.save(&user).await.unwrap();
        assert!(!saved.enabled);
        assert_eq!(saved.display(), "Tech One");

        let disabled = repo
            .list(&UserFilter {
                enabled: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(disabled.len(), 1);

        let searched = repo
            .list(&UserFilter {
                search: Some("h_1".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(searched.len(), 1);
        assert_eq!(searched[0].username, "tech_1");
    }

    #[tokio::test]
    async fn test_password_update_and_delete() {
        let pool = test_pool().await;
        let repo = create_user_repository(&pool);
        let user = User::new("p", "p@example.com", "old", Role::Viewer);
        repo.create(&user).await.unwrap();

        repo.update_password(user.id, "new").await.unwrap();
        assert_eq!(repo.get(user.id).await.unwrap().unwrap().password_hash, "new");
        assert!(repo.update_password(Uuid::new_v4(), "x").await.unwrap_err().is_not_found());

        assert!(repo.delete(user.id).await.unwrap());
        assert!(!repo.delete(user.id).await.unwrap());
    }
}
