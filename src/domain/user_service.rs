use crate::domain::models::Article;
use crate::domain::recommend::nearest_center;
use crate::infrastructure::repository;
use sqlx::SqlitePool;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UserServiceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("user not found")]
    NotFound,

    #[error("clusters not yet computed")]
    ClustersNotReady,
}

/// Group a user's clicked articles by their nearest cluster center.
///
/// The outer vector has one slot per center; slots may be empty. Errors
/// with [`UserServiceError::ClustersNotReady`] until both clusters and at
/// least one article embedding exist.
pub async fn clustered_articles(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Vec<Vec<Article>>, UserServiceError> {
    let user = repository::get_user(pool, user_id)
        .await?
        .ok_or(UserServiceError::NotFound)?;

    let centers = user
        .cluster_centers()
        .ok_or(UserServiceError::ClustersNotReady)?;

    let articles = repository::list_user_clicked_articles(pool, user_id).await?;
    let embedded: Vec<(Article, Vec<f32>)> = articles
        .into_iter()
        .filter_map(|article| {
            article
                .embedding_vector()
                .map(|vector| (article, vector))
        })
        .collect();

    if embedded.is_empty() {
        return Err(UserServiceError::ClustersNotReady);
    }

    let mut groups: Vec<Vec<Article>> = (0..centers.len()).map(|_| Vec::new()).collect();
    for (article, vector) in embedded {
        let slot = nearest_center(&vector, &centers).unwrap_or(0);
        groups[slot].push(article);
    }

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ParsedArticle, ParsedFeed};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");

        pool
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let pool = setup_test_db().await;
        let result = clustered_articles(&pool, "ghost").await;
        assert!(matches!(result, Err(UserServiceError::NotFound)));
    }

    #[tokio::test]
    async fn test_user_without_clusters_is_not_ready() {
        let pool = setup_test_db().await;
        repository::upsert_user(&pool, "u1").await.unwrap();

        let result = clustered_articles(&pool, "u1").await;
        assert!(matches!(result, Err(UserServiceError::ClustersNotReady)));
    }

    #[tokio::test]
    async fn test_articles_grouped_by_nearest_center() {
        let pool = setup_test_db().await;
        repository::upsert_user(&pool, "u1").await.unwrap();
        repository::set_user_clusters(&pool, "u1", "[[1.0,0.0],[0.0,1.0]]")
            .await
            .unwrap();

        let feed = repository::create_feed(
            &pool,
            &ParsedFeed {
                url: "https://example.com/feed".to_string(),
                title: "Feed".to_string(),
                description: None,
                language: None,
                logo: None,
                articles: Vec::new(),
            },
        )
        .await
        .unwrap();

        for (i, embedding) in [[0.9f32, 0.1], [0.1, 0.9], [1.0, 0.0]].iter().enumerate() {
            let article = repository::insert_article_if_absent(
                &pool,
                feed.id,
                &ParsedArticle {
                    title: Some(format!("A{}", i)),
                    url: format!("https://example.com/a{}", i),
                    description: None,
                    comments_url: None,
                    pub_date: None,
                },
            )
            .await
            .unwrap()
            .unwrap();
            repository::set_article_embedding(
                &pool,
                article.id,
                &serde_json::to_string(&embedding.to_vec()).unwrap(),
            )
            .await
            .unwrap();
            repository::insert_user_article_click(&pool, "u1", article.id)
                .await
                .unwrap();
        }

        let groups = clustered_articles(&pool, "u1").await.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1].len(), 1);
    }
}
