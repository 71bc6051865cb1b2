//! Knowledge base categories and articles.
//!
//! Tags are a JSON array: TEXT on SQLite, JSONB on PostgreSQL.

use super::convert::{fmt_ts, opt_uuid, parse_opt_uuid, parse_ts, parse_uuid};
use super::{make_like_pattern, DbError, DbPool, PaginatedResult, Pagination};
use crate::models::{ArticleFilter, KnowledgeArticle, KnowledgeCategory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

#[async_trait]
pub trait KnowledgeRepository: Send + Sync {
    async fn create_category(&self, category: &KnowledgeCategory) -> Result<KnowledgeCategory, DbError>;
    async fn get_category(&self, id: Uuid) -> Result<Option<KnowledgeCategory>, DbError>;
    async fn list_categories(&self) -> Result<Vec<KnowledgeCategory>, DbError>;
    async fn save_category(&self, category: &KnowledgeCategory) -> Result<KnowledgeCategory, DbError>;
    async fn delete_category(&self, id: Uuid) -> Result<bool, DbError>;

    async fn create_article(&self, article: &KnowledgeArticle) -> Result<KnowledgeArticle, DbError>;
    async fn get_article(&self, id: Uuid) -> Result<Option<KnowledgeArticle>, DbError>;
    async fn get_article_by_slug(&self, slug: &str) -> Result<Option<KnowledgeArticle>, DbError>;
    /// Newest first. Search matches title and body.
    async fn list_articles(
        &self,
        filter: &ArticleFilter,
        pagination: &Pagination,
    ) -> Result<PaginatedResult<KnowledgeArticle>, DbError>;
    async fn save_article(&self, article: &KnowledgeArticle) -> Result<KnowledgeArticle, DbError>;
    async fn delete_article(&self, id: Uuid) -> Result<bool, DbError>;
    /// Returns the new view count.
    async fn increment_views(&self, id: Uuid) -> Result<i64, DbError>;
}

const ARTICLE_COLUMNS: &str =
    "id, category_id, title, slug, body, tags, published, view_count, author_id, created_at, updated_at";

pub struct SqliteKnowledgeRepository {
    pool: sqlx::SqlitePool,
}

impl SqliteKnowledgeRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

const SQLITE_ARTICLE_FILTER: &str = r#"
    WHERE (?1 IS NULL OR category_id = ?1)
      AND (?2 IS NULL OR published = ?2)
      AND (?3 IS NULL OR title LIKE ?3 ESCAPE '\' OR body LIKE ?3 ESCAPE '\')
"#;

macro_rules! bind_sqlite_article_filter {
    ($query:expr, $filter:expr) => {
        $query
            .bind(opt_uuid($filter.category_id))
            .bind($filter.published)
            .bind($filter.search.as_deref().map(make_like_pattern))
    };
}

#[async_trait]
impl KnowledgeRepository for SqliteKnowledgeRepository {
    async fn create_category(&self, category: &KnowledgeCategory) -> Result<KnowledgeCategory, DbError> {
        sqlx::query(
            "INSERT INTO knowledge_categories (id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(category.id.to_string())
        .bind(&category.name)
        .bind(&category.description)
        .bind(fmt_ts(category.created_at))
        .bind(fmt_ts(category.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(category.clone())
    }

    async fn get_category(&self, id: Uuid) -> Result<Option<KnowledgeCategory>, DbError> {
        let row: Option<SqliteCategoryRow> = sqlx::query_as(
            "SELECT id, name, description, created_at, updated_at FROM knowledge_categories WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_categories(&self) -> Result<Vec<KnowledgeCategory>, DbError> {
        let rows: Vec<SqliteCategoryRow> = sqlx::query_as(
            "SELECT id, name, description, created_at, updated_at FROM knowledge_categories ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_category(&self, category: &KnowledgeCategory) -> Result<KnowledgeCategory, DbError> {
        let updated_at = Utc::now();
        let result = sqlx::query(
            "UPDATE knowledge_categories SET name = ?, description = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&category.name)
        .bind(&category.description)
        .bind(fmt_ts(updated_at))
        .bind(category.id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("KnowledgeCategory", category.id));
        }
        Ok(KnowledgeCategory {
            updated_at,
            ..category.clone()
        })
    }

    async fn delete_category(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM knowledge_categories WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_article(&self, article: &KnowledgeArticle) -> Result<KnowledgeArticle, DbError> {
        sqlx::query(&format!(
            "INSERT INTO knowledge_articles ({ARTICLE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(article.id.to_string())
        .bind(opt_uuid(article.category_id))
        .bind(&article.title)
        .bind(&article.slug)
        .bind(&article.body)
        .bind(serde_json::to_string(&article.tags)?)
        .bind(article.published)
        .bind(article.view_count)
        .bind(opt_uuid(article.author_id))
        .bind(fmt_ts(article.created_at))
        .bind(fmt_ts(article.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(article.clone())
    }

    async fn get_article(&self, id: Uuid) -> Result<Option<KnowledgeArticle>, DbError> {
        let row: Option<SqliteArticleRow> = sqlx::query_as(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM knowledge_articles WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_article_by_slug(&self, slug: &str) -> Result<Option<KnowledgeArticle>, DbError> {
        let row: Option<SqliteArticleRow> = sqlx::query_as(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM knowledge_articles WHERE slug = ?"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_articles(
        &self,
        filter: &ArticleFilter,
        pagination: &Pagination,
    ) -> Result<PaginatedResult<KnowledgeArticle>, DbError> {
        let count_sql = format!("SELECT COUNT(*) FROM knowledge_articles {SQLITE_ARTICLE_FILTER}");
        let total: i64 = bind_sqlite_article_filter!(sqlx::query_scalar(&count_sql), filter)
            .fetch_one(&self.pool)
            .await?;

        let list_sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM knowledge_articles {SQLITE_ARTICLE_FILTER} ORDER BY created_at DESC LIMIT ?4 OFFSET ?5"
        );
        let rows: Vec<SqliteArticleRow> =
            bind_sqlite_article_filter!(sqlx::query_as(&list_sql), filter)
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

    async fn save_article(&self, article: &KnowledgeArticle) -> Result<KnowledgeArticle, DbError> {
        let updated_at = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE knowledge_articles SET
                category_id = ?, title = ?, slug = ?, body = ?, tags = ?, published = ?,
                author_id = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(opt_uuid(article.category_id))
        .bind(&article.title)
        .bind(&article.slug)
        .bind(&article.body)
        .bind(serde_json::to_string(&article.tags)?)
        .bind(article.published)
        .bind(opt_uuid(article.author_id))
        .bind(fmt_ts(updated_at))
        .bind(article.id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("KnowledgeArticle", article.id));
        }
        Ok(KnowledgeArticle {
            updated_at,
            ..article.clone()
        })
    }

    async fn delete_article(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM knowledge_articles WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn increment_views(&self, id: Uuid) -> Result<i64, DbError> {
        let count: Option<i64> = sqlx::query_scalar(
            "UPDATE knowledge_articles SET view_count = view_count + 1 WHERE id = ? RETURNING view_count",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        count.ok_or_else(|| DbError::not_found("KnowledgeArticle", id))
    }
}

pub struct PgKnowledgeRepository {
    pool: sqlx::PgPool,
}

impl PgKnowledgeRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

const PG_ARTICLE_FILTER: &str = r#"
    WHERE ($1::uuid IS NULL OR category_id = $1)
      AND ($2::boolean IS NULL OR published = $2)
      AND ($3::text IS NULL OR title ILIKE $3 OR body ILIKE $3)
"#;

macro_rules! bind_pg_article_filter {
    ($query:expr, $filter:expr) => {
        $query
            .bind($filter.category_id)
            .bind($filter.published)
            .bind($filter.search.as_deref().map(make_like_pattern))
    };
}

#[async_trait]
impl KnowledgeRepository for PgKnowledgeRepository {
    async fn create_category(&self, category: &KnowledgeCategory) -> Result<KnowledgeCategory, DbError> {
        sqlx::query(
            "INSERT INTO knowledge_categories (id, name, description, created_at, updated_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(category.id)
        .bind(&category.name)
        .bind(&category.description)
        .bind(category.created_at)
        .bind(category.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(category.clone())
    }

    async fn get_category(&self, id: Uuid) -> Result<Option<KnowledgeCategory>, DbError> {
        let row: Option<PgCategoryRow> = sqlx::query_as(
            "SELECT id, name, description, created_at, updated_at FROM knowledge_categories WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_categories(&self) -> Result<Vec<KnowledgeCategory>, DbError> {
        let rows: Vec<PgCategoryRow> = sqlx::query_as(
            "SELECT id, name, description, created_at, updated_at FROM knowledge_categories ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn save_category(&self, category: &KnowledgeCategory) -> Result<KnowledgeCategory, DbError> {
        let row: Option<PgCategoryRow> = sqlx::query_as(
            r#"
            UPDATE knowledge_categories SET name = $1, description = $2, updated_at = NOW()
            WHERE id = $3
            RETURNING id, name, description, created_at, updated_at
            "#,
        )
        .bind(&category.name)
        .bind(&category.description)
        .bind(category.id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Into::into)
            .ok_or_else(|| DbError::not_found("KnowledgeCategory", category.id))
    }

    async fn delete_category(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM knowledge_categories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_article(&self, article: &KnowledgeArticle) -> Result<KnowledgeArticle, DbError> {
        sqlx::query(&format!(
            "INSERT INTO knowledge_articles ({ARTICLE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(article.id)
        .bind(article.category_id)
        .bind(&article.title)
        .bind(&article.slug)
        .bind(&article.body)
        .bind(Json(&article.tags))
        .bind(article.published)
        .bind(article.view_count)
        .bind(article.author_id)
        .bind(article.created_at)
        .bind(article.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(article.clone())
    }

    async fn get_article(&self, id: Uuid) -> Result<Option<KnowledgeArticle>, DbError> {
        let row: Option<PgArticleRow> = sqlx::query_as(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM knowledge_articles WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn get_article_by_slug(&self, slug: &str) -> Result<Option<KnowledgeArticle>, DbError> {
        let row: Option<PgArticleRow> = sqlx::query_as(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM knowledge_articles WHERE slug = $1"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_articles(
        &self,
        filter: &ArticleFilter,
        pagination: &Pagination,
    ) -> Result<PaginatedResult<KnowledgeArticle>, DbError> {
        let count_sql = format!("SELECT COUNT(*) FROM knowledge_articles {PG_ARTICLE_FILTER}");
        let total: i64 = bind_pg_article_filter!(sqlx::query_scalar(&count_sql), filter)
            .fetch_one(&self.pool)
            .await?;

        let list_sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM knowledge_articles {PG_ARTICLE_FILTER} ORDER BY created_at DESC LIMIT $4 OFFSET $5"
        );
        let rows: Vec<PgArticleRow> = bind_pg_article_filter!(sqlx::query_as(&list_sql), filter)
            .bind(pagination.limit())
            .bind(pagination.offset())
            .fetch_all(&self.pool)
            .await?;

        let items = rows.into_iter().map(Into::into).collect();
        Ok(PaginatedResult::new(items, total as u64, pagination))
    }

    async fn save_article(&self, article: &KnowledgeArticle) -> Result<KnowledgeArticle, DbError> {
        let row: Option<PgArticleRow> = sqlx::query_as(&format!(
            r#"
            UPDATE knowledge_articles SET
                category_id = $1, title = $2, slug = $3, body = $4, tags = $5, published = $6,
                author_id = $7, updated_at = NOW()
            WHERE id = $8
            RETURNING {ARTICLE_COLUMNS}
            "#
        ))
        .bind(article.category_id)
        .bind(&article.title)
        .bind(&article.slug)
        .bind(&article.body)
        .bind(Json(&article.tags))
        .bind(article.published)
        .bind(article.author_id)
        .bind(article.id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Into::into)
            .ok_or_else(|| DbError::not_found("KnowledgeArticle", article.id))
    }

    async fn delete_article(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM knowledge_articles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn increment_views(&self, id: Uuid) -> Result<i64, DbError> {
        let count: Option<i64> = sqlx::query_scalar(
            "UPDATE knowledge_articles SET view_count = view_count + 1 WHERE id = $1 RETURNING view_count",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        count.ok_or_else(|| DbError::not_found("KnowledgeArticle", id))
    }
}

pub fn create_knowledge_repository(pool: &DbPool) -> Box<dyn KnowledgeRepository> {
    match pool {
        DbPool::Sqlite(pool) => Box::new(SqliteKnowledgeRepository::new(pool.clone())),
        DbPool::Postgres(pool) => Box::new(PgKnowledgeRepository::new(pool.clone())),
    }
}

#[derive(sqlx::FromRow)]
struct SqliteCategoryRow {
    id: String,
    name: String,
    description: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteCategoryRow> for KnowledgeCategory {
    type Error = DbError;

    fn try_from(row: SqliteCategoryRow) -> Result<Self, Self::Error> {
        Ok(KnowledgeCategory {
            id: parse_uuid(&row.id)?,
            name: row.name,
            description: row.description,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgCategoryRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PgCategoryRow> for KnowledgeCategory {
    fn from(row: PgCategoryRow) -> Self {
        KnowledgeCategory {
            id: row.id,
            name: row.name,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SqliteArticleRow {
    id: String,
    category_id: Option<String>,
    title: String,
    slug: String,
    body: String,
    tags: String,
    published: bool,
    view_count: i64,
    author_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteArticleRow> for KnowledgeArticle {
    type Error = DbError;

    fn try_from(row: SqliteArticleRow) -> Result<Self, Self::Error> {
        Ok(KnowledgeArticle {
            id: parse_uuid(&row.id)?,
            category_id: parse_opt_uuid(row.category_id)?,
            title: row.title,
            slug: row.slug,
            body: row.body,
            tags: serde_json::from_str(&row.tags)?,
            published: row.published,
            view_count: row.view_count,
            author_id: parse_opt_uuid(row.author_id)?,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgArticleRow {
    id: Uuid,
    category_id: Option<Uuid>,
    title: String,
    slug: String,
    body: String,
    tags: Json<Vec<String>>,
    published: bool,
    view_count: i64,
    author_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PgArticleRow> for KnowledgeArticle {
    fn from(row: PgArticleRow) -> Self {
        KnowledgeArticle {
            id: row.id,
            category_id: row.category_id,
            title: row.title,
            slug: row.slug,
            body: row.body,
            tags: row.tags.0,
            published: row.published,
            view_count: row.view_count,
            author_id: row.author_id,
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
    async fn test_article_round_trip_with_tags() {
        let pool = test_pool().await;
        let repo = create_knowledge_repository(&pool);

        let mut article = KnowledgeArticle::new("Reset your VPN token", "Open the app...");
        article.tags = vec!["vpn".into(), "access".into()];
        repo.create_article(&article).await.unwrap();

        let loaded = repo
            .get_article_by_slug("reset-your-vpn-token")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.tags, vec!["vpn", "access"]);
        assert!(!loaded.published);
    }

    #[tokio::test]
    async fn test_list_published_and_search() {
        let pool = test_pool().await;
        let repo = create_knowledge_repository(&pool);

        let mut published = KnowledgeArticle::new("Printer setup", "Install the 100% driver");
        published.published = true;
        repo.create_article(&published).await.unwrap();
        repo.create_article(&KnowledgeArticle::new("Draft", "printer notes"))
            .await
            .unwrap();

        let visible = repo
            .list_articles(
                &ArticleFilter {
                    published: Some(true),
                    ..Default::default()
                },
                &Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(visible.total, 1);

        let searched = repo
            .list_articles(
                &ArticleFilter {
                    search: Some("printer".into()),
                    ..Default::default()
                },
                &Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(searched.total, 2);

        let percent = repo
            .list_articles(
                &ArticleFilter {
                    search: Some("100%".into()),
                    ..Default::default()
                },
                &Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(percent.total, 1);
    }

    #[tokio::test]
    async fn test_increment_views() {
        let pool = test_pool().await;
        let repo = create_knowledge_repository(&pool);
        let article = KnowledgeArticle::new("Wi-Fi", "SSID is corp");
        repo.create_article(&article).await.unwrap();

        assert_eq!(repo.increment_views(article.id).await.unwrap(), 1);
        assert_eq!(repo.increment_views(article.id).await.unwrap(), 2);
        assert!(repo.increment_views(Uuid::new_v4()).await.unwrap_err().is_not_found());
    }
}
