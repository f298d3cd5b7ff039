use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_request: DateTime<Utc>,
    /// JSON-serialized `Vec<Vec<f32>>` of k-means centers, if computed.
    pub clusters: Option<String>,
    pub clusters_updated_at: Option<DateTime<Utc>>,
    pub is_frozen: bool,
    pub frozen_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn cluster_centers(&self) -> Option<Vec<Vec<f32>>> {
        self.clusters
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    /// The URL the user first subscribed with, kept when a permanent
    /// redirect changed the canonical `url`.
    pub original_url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub logo: Option<String>,
    pub consecutive_failures: i64,
    pub last_error: Option<String>,
    pub is_disabled: bool,
    pub created_at: DateTime<Utc>,
    /// Last successful fetch.
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: String,
    pub comments_url: Option<String>,
    pub pub_date: Option<DateTime<Utc>>,
    pub updated: DateTime<Utc>,
    /// JSON-serialized `Vec<f32>`, if computed.
    pub embedding: Option<String>,
}

impl Article {
    pub fn embedding_vector(&self) -> Option<Vec<f32>> {
        self.embedding
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

/// A feed document parsed from upstream bytes, before persistence.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    /// Final URL after redirects; becomes (or updates) the canonical URL.
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub logo: Option<String>,
    pub articles: Vec<ParsedArticle>,
}

#[derive(Debug, Clone)]
pub struct ParsedArticle {
    pub title: Option<String>,
    pub url: String,
    pub description: Option<String>,
    pub comments_url: Option<String>,
    pub pub_date: Option<DateTime<Utc>>,
}

/// Aggregate counters for the `stats` CLI command and observability.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub users_total: i64,
    pub users_active_30d: i64,
    pub users_frozen: i64,
    pub feeds_total: i64,
    pub feeds_disabled: i64,
    pub articles_total: i64,
    pub articles_with_embeddings: i64,
    pub user_article_links: i64,
    pub user_feed_links: i64,
}

/// Per-run summary returned by full maintenance.
#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceSummary {
    pub frozen_users: u64,
    pub removed_embeddings: u64,
    pub deleted_articles: u64,
    pub orphan_article_links: u64,
    pub orphan_feed_links: u64,
    pub vacuumed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_centers_roundtrip() {
        let user = User {
            id: "u1".to_string(),
            created_at: Utc::now(),
            last_request: Utc::now(),
            clusters: Some("[[0.1,0.2],[0.3,0.4]]".to_string()),
            clusters_updated_at: Some(Utc::now()),
            is_frozen: false,
            frozen_at: None,
        };

        let centers = user.cluster_centers().unwrap();
        assert_eq!(centers.len(), 2);
        assert_eq!(centers[0], vec![0.1, 0.2]);
    }

    #[test]
    fn test_cluster_centers_absent_or_invalid() {
        let mut user = User {
            id: "u1".to_string(),
            created_at: Utc::now(),
            last_request: Utc::now(),
            clusters: None,
            clusters_updated_at: None,
            is_frozen: false,
            frozen_at: None,
        };
        assert!(user.cluster_centers().is_none());

        user.clusters = Some("not json".to_string());
        assert!(user.cluster_centers().is_none());
    }

    #[test]
    fn test_embedding_vector_parses_json() {
        let article = Article {
            id: 1,
            feed_id: 1,
            title: None,
            description: None,
            url: "https://example.com/a".to_string(),
            comments_url: None,
            pub_date: None,
            updated: Utc::now(),
            embedding: Some("[1.0, 0.0, -0.5]".to_string()),
        };

        assert_eq!(article.embedding_vector().unwrap(), vec![1.0, 0.0, -0.5]);
    }
}
