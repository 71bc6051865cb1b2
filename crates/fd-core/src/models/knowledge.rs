use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeCategory {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeCategory {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeArticle {
    pub id: Uuid,
    pub category_id: Option<Uuid>,
    pub title: String,
    pub slug: String,
    pub body: String,
    pub tags: Vec<String>,
    pub published: bool,
    pub view_count: i64,
    pub author_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeArticle {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        let title = title.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            category_id: None,
            slug: slugify(&title),
            title,
            body: body.into(),
            tags: Vec::new(),
            published: false,
            view_count: 0,
            author_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Lowercase ASCII slug: alphanumerics kept, every other run becomes `-`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("article");
    }
    slug
}

#[derive(Debug, Clone, Default)]
pub struct ArticleFilter {
    pub category_id: Option<Uuid>,
    pub published: Option<bool>,
    /// Matches title, body or tags.
    pub search: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Reset your VPN password"), "reset-your-vpn-password");
        assert_eq!(slugify("  Wi-Fi: guest access!  "), "wi-fi-guest-access");
        assert_eq!(slugify("???"), "article");
    }

    #[test]
    fn test_new_article_is_draft() {
        let a = KnowledgeArticle::new("Printer setup", "Step 1");
        assert_eq!(a.slug, "printer-setup");
        assert!(!a.published);
        assert_eq!(a.view_count, 0);
    }
}
