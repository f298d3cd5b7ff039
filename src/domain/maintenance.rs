use crate::config::Config;
use crate::domain::models::MaintenanceSummary;
use crate::infrastructure::repository;
use sqlx::SqlitePool;

/// The nightly sweep: freeze dormant users, age out embeddings and unread
/// articles, drop dangling link rows, then reclaim space.
pub async fn run_full_maintenance(
    pool: &SqlitePool,
    config: &Config,
) -> Result<MaintenanceSummary, sqlx::Error> {
    tracing::info!("Starting full maintenance cycle");

    let frozen_users =
        repository::freeze_dormant_users(pool, config.dormant_threshold_days).await?;
    tracing::info!(
        "Froze {} dormant users (inactive >{} days)",
        frozen_users,
        config.dormant_threshold_days
    );

    let removed_embeddings =
        repository::remove_old_embeddings(pool, config.embedding_retention_days).await?;
    tracing::info!("Removed embeddings from {} old articles", removed_embeddings);

    let deleted_articles =
        repository::cleanup_old_articles(pool, config.article_retention_days).await?;
    tracing::info!(
        "Deleted {} old articles (>{} days, unread)",
        deleted_articles,
        config.article_retention_days
    );

    let orphan_article_links = repository::cleanup_orphan_user_article_links(pool).await?;
    let orphan_feed_links = repository::cleanup_orphan_user_feed_links(pool).await?;
    tracing::info!(
        "Deleted {} orphan user-article links, {} orphan user-feed links",
        orphan_article_links,
        orphan_feed_links
    );

    repository::vacuum_database(pool).await?;
    tracing::info!("Database vacuumed and analyzed");

    let summary = MaintenanceSummary {
        frozen_users,
        removed_embeddings,
        deleted_articles,
        orphan_article_links,
        orphan_feed_links,
        vacuumed: true,
    };

    tracing::info!("Full maintenance completed: {:?}", summary);
    Ok(summary)
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
    async fn test_full_maintenance_summary() {
        let pool = setup_test_db().await;
        let mut config = Config::for_tests();
        // Negative retention makes everything eligible immediately
        config.dormant_threshold_days = -1;
        config.article_retention_days = -1;
        config.embedding_retention_days = -1;

        repository::upsert_user(&pool, "dormant").await.unwrap();
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
        let article = repository::insert_article_if_absent(
            &pool,
            feed.id,
            &ParsedArticle {
                title: Some("Old".to_string()),
                url: "https://example.com/old".to_string(),
                description: None,
                comments_url: None,
                pub_date: None,
            },
        )
        .await
        .unwrap()
        .unwrap();
        repository::set_article_embedding(&pool, article.id, "[0.0]")
            .await
            .unwrap();

        let summary = run_full_maintenance(&pool, &config).await.unwrap();

        assert_eq!(summary.frozen_users, 1);
        assert_eq!(summary.removed_embeddings, 1);
        assert_eq!(summary.deleted_articles, 1);
        assert!(summary.vacuumed);
    }
}
