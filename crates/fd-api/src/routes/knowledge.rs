//! Knowledge base categories and articles.

use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use fd_core::db::{create_knowledge_repository, PaginatedResult, Pagination};
use fd_core::{
    slugify, Actor, ArticleFilter, AuditAction, AuditEntry, ChangeSet, EntityType,
    KnowledgeArticle, KnowledgeCategory,
};

use crate::auth::{AuthenticatedUser, CanManageKnowledge};
use crate::error::ApiError;
use crate::extract::{clean, double_option, patch, patch_text, ApiJson, ApiPath, ApiQuery};
use crate::middleware::ClientMeta;
use crate::response::{created, ok, ApiResult, Created, Done};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/categories", get(list_categories).post(create_category))
        .route(
            "/categories/:id",
            get(get_category)
                .put(update_category)
                .delete(delete_category),
        )
        .route("/articles", get(list_articles).post(create_article))
        .route(
            "/articles/:id",
            get(get_article)
                .put(update_article)
                .delete(delete_article),
        )
        .route("/articles/:id/publish", post(publish_article))
        .route("/articles/:id/unpublish", post(unpublish_article))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct KnowledgeCategoryRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListArticlesQuery {
    pub category_id: Option<Uuid>,
    pub published: Option<bool>,
    /// Matches title and body.
    #[serde(alias = "q")]
    pub search: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateArticleRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1))]
    pub body: String,
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub published: bool,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateArticleRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub slug: Option<String>,
    #[validate(length(min = 1))]
    pub body: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<Uuid>)]
    pub category_id: Option<Option<Uuid>>,
    pub tags: Option<Vec<String>>,
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

/// Picks `base`, or `base-<n>` for the first free suffix.
async fn unique_slug(state: &AppState, base: &str, own_id: Uuid) -> Result<String, ApiError> {
    let repo = create_knowledge_repository(&state.db);
    let base = if base.is_empty() { "article" } else { base };
    let mut candidate = base.to_string();
    for n in 2..100 {
        match repo.get_article_by_slug(&candidate).await? {
            Some(existing) if existing.id != own_id => candidate = format!("{}-{}", base, n),
            _ => return Ok(candidate),
        }
    }
    Err(ApiError::Conflict(format!("Slug '{}' is taken", base)))
}

async fn load_category(state: &AppState, id: Uuid) -> Result<KnowledgeCategory, ApiError> {
    create_knowledge_repository(&state.db)
        .get_category(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Knowledge category", id))
}

async fn load_article(state: &AppState, id: Uuid) -> Result<KnowledgeArticle, ApiError> {
    create_knowledge_repository(&state.db)
        .get_article(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Article", id))
}

pub async fn list_categories(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> ApiResult<Vec<KnowledgeCategory>> {
    ok(create_knowledge_repository(&state.db)
        .list_categories()
        .await?)
}

pub async fn get_category(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<KnowledgeCategory> {
    ok(load_category(&state, id).await?)
}

pub async fn create_category(
    State(state): State<AppState>,
    CanManageKnowledge(user): CanManageKnowledge,
    ClientMeta(meta): ClientMeta,
    ApiJson(request): ApiJson<KnowledgeCategoryRequest>,
) -> Created<KnowledgeCategory> {
    request.validate()?;
    let mut category = KnowledgeCategory::new(request.name.trim());
    category.description = clean(request.description);
    let category = create_knowledge_repository(&state.db)
        .create_category(&category)
        .await?;

    state
        .audit(
            AuditEntry::new(
                &Actor::user(&user),
                AuditAction::Create,
                EntityType::KnowledgeCategory,
            )
            .entity(category.id, &category.name)
            .with_changes(ChangeSet::created(&category))
            .with_meta(&meta),
        )
        .await;

    created(category)
}

pub async fn update_category(
    State(state): State<AppState>,
    CanManageKnowledge(user): CanManageKnowledge,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<KnowledgeCategoryRequest>,
) -> ApiResult<KnowledgeCategory> {
    request.validate()?;
    let old = load_category(&state, id).await?;
    let mut category = old.clone();
    category.name = request.name.trim().to_string();
    patch_text(&mut category.description, request.description);
    category.updated_at = Utc::now();
    let category = create_knowledge_repository(&state.db)
        .save_category(&category)
        .await?;

    state
        .audit(
            AuditEntry::new(
                &Actor::user(&user),
                AuditAction::Update,
                EntityType::KnowledgeCategory,
            )
            .entity(category.id, &category.name)
            .with_changes(ChangeSet::between(&old, &category))
            .with_meta(&meta),
        )
        .await;

    ok(category)
}

pub async fn delete_category(
    State(state): State<AppState>,
    CanManageKnowledge(user): CanManageKnowledge,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Done> {
    let category = load_category(&state, id).await?;
    create_knowledge_repository(&state.db)
        .delete_category(id)
        .await?;

    state
        .audit(
            AuditEntry::new(
                &Actor::user(&user),
                AuditAction::Delete,
                EntityType::KnowledgeCategory,
            )
            .entity(category.id, &category.name)
            .with_changes(ChangeSet::deleted(&category))
            .with_meta(&meta),
        )
        .await;

    ok(Done { id })
}

#[utoipa::path(
    get,
    path = "/api/v1/knowledge/articles",
    params(
        ("category_id" = Option<Uuid>, Query, description = "Category"),
        ("published" = Option<bool>, Query, description = "Publication state"),
        ("search" = Option<String>, Query, description = "Title and body search")
    ),
    responses((status = 200, description = "Paginated articles, newest first")),
    tag = "Knowledge"
)]
pub async fn list_articles(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiQuery(query): ApiQuery<ListArticlesQuery>,
) -> ApiResult<PaginatedResult<KnowledgeArticle>> {
    let filter = ArticleFilter {
        category_id: query.category_id,
        published: query.published,
        search: clean(query.search),
    };
    let pagination = Pagination::from_query(query.page, query.per_page);
    ok(create_knowledge_repository(&state.db)
        .list_articles(&filter, &pagination)
        .await?)
}

/// Returns the article and counts the view.
#[utoipa::path(
    get,
    path = "/api/v1/knowledge/articles/{id}",
    params(("id" = Uuid, Path, description = "Article ID")),
    responses(
        (status = 200, description = "Article"),
        (status = 404, description = "Not found", body = crate::error::ErrorResponse)
    ),
    tag = "Knowledge"
)]
pub async fn get_article(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<KnowledgeArticle> {
    let mut article = load_article(&state, id).await?;
    article.view_count = create_knowledge_repository(&state.db)
        .increment_views(id)
        .await?;
    ok(article)
}

#[utoipa::path(
    post,
    path = "/api/v1/knowledge/articles",
    request_body = CreateArticleRequest,
    responses((status = 201, description = "Article created")),
    tag = "Knowledge"
)]
pub async fn create_article(
    State(state): State<AppState>,
    CanManageKnowledge(user): CanManageKnowledge,
    ClientMeta(meta): ClientMeta,
    ApiJson(request): ApiJson<CreateArticleRequest>,
) -> Created<KnowledgeArticle> {
    request.validate()?;
    if let Some(category_id) = request.category_id {
        load_category(&state, category_id).await?;
    }

    let mut article = KnowledgeArticle::new(request.title.trim(), request.body);
    article.slug = unique_slug(&state, &article.slug, article.id).await?;
    article.category_id = request.category_id;
    article.tags = clean_tags(request.tags);
    article.published = request.published;
    article.author_id = Some(user.id);
    let article = create_knowledge_repository(&state.db)
        .create_article(&article)
        .await?;

    state
        .audit(
            AuditEntry::new(
                &Actor::user(&user),
                AuditAction::Create,
                EntityType::KnowledgeArticle,
            )
            .entity(article.id, &article.title)
            .with_changes(ChangeSet::created(&article))
            .with_meta(&meta),
        )
        .await;

    created(article)
}

pub async fn update_article(
    State(state): State<AppState>,
    CanManageKnowledge(user): CanManageKnowledge,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<UpdateArticleRequest>,
) -> ApiResult<KnowledgeArticle> {
    request.validate()?;
    let old = load_article(&state, id).await?;
    let mut article = old.clone();

    if let Some(title) = clean(request.title) {
        article.title = title;
    }
    if let Some(slug) = clean(request.slug) {
        article.slug = unique_slug(&state, &slugify(&slug), id).await?;
    }
    if let Some(body) = request.body {
        article.body = body;
    }
    if let Some(Some(category_id)) = request.category_id {
        load_category(&state, category_id).await?;
    }
    patch(&mut article.category_id, request.category_id);
    if let Some(tags) = request.tags {
        article.tags = clean_tags(tags);
    }
    article.updated_at = Utc::now();

    let article = create_knowledge_repository(&state.db)
        .save_article(&article)
        .await?;
    audit_article_change(&state, &user, &meta, AuditAction::Update, &old, &article).await;

    ok(article)
}

async fn set_published(
    state: &AppState,
    user: &fd_core::User,
    meta: &fd_core::RequestMeta,
    id: Uuid,
    published: bool,
) -> Result<KnowledgeArticle, ApiError> {
    let old = load_article(state, id).await?;
    if old.published == published {
        return Ok(old);
    }
    let mut article = old.clone();
    article.published = published;
    article.updated_at = Utc::now();
    let article = create_knowledge_repository(&state.db)
        .save_article(&article)
        .await?;
    audit_article_change(state, user, meta, AuditAction::Update, &old, &article).await;
    Ok(article)
}

async fn audit_article_change(
    state: &AppState,
    user: &fd_core::User,
    meta: &fd_core::RequestMeta,
    action: AuditAction,
    old: &KnowledgeArticle,
    new: &KnowledgeArticle,
) {
    state
        .audit(
            AuditEntry::new(&Actor::user(user), action, EntityType::KnowledgeArticle)
                .entity(new.id, &new.title)
                .with_changes(ChangeSet::between(old, new))
                .with_meta(meta),
        )
        .await;
}

#[utoipa::path(
    post,
    path = "/api/v1/knowledge/articles/{id}/publish",
    params(("id" = Uuid, Path, description = "Article ID")),
    responses((status = 200, description = "Article published")),
    tag = "Knowledge"
)]
pub async fn publish_article(
    State(state): State<AppState>,
    CanManageKnowledge(user): CanManageKnowledge,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<KnowledgeArticle> {
    ok(set_published(&state, &user, &meta, id, true).await?)
}

pub async fn unpublish_article(
    State(state): State<AppState>,
    CanManageKnowledge(user): CanManageKnowledge,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<KnowledgeArticle> {
    ok(set_published(&state, &user, &meta, id, false).await?)
}

pub async fn delete_article(
    State(state): State<AppState>,
    CanManageKnowledge(user): CanManageKnowledge,
    ClientMeta(meta): ClientMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Done> {
    let article = load_article(&state, id).await?;
    create_knowledge_repository(&state.db)
        .delete_article(id)
        .await?;

    state
        .audit(
            AuditEntry::new(
                &Actor::user(&user),
                AuditAction::Delete,
                EntityType::KnowledgeArticle,
            )
            .entity(article.id, &article.title)
            .with_changes(ChangeSet::deleted(&article))
            .with_meta(&meta),
        )
        .await;

    ok(Done { id })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_tags_dedupes_and_lowercases() {
        let tags = clean_tags(vec![
            "VPN".into(),
            " vpn ".into(),
            "".into(),
            "Printing".into(),
        ]);
        assert_eq!(tags, vec!["vpn".to_string(), "printing".to_string()]);
    }
}
