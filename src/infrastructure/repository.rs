use crate::domain::models::{Article, DatabaseStats, Feed, ParsedArticle, ParsedFeed, User};
use chrono::{Duration, Utc};
use sqlx::{Error as SqlxError, SqlitePool};

/// Classify transient SQLite write contention so the job middleware can
/// retry with backoff instead of failing the job.
pub fn is_busy_error(err: &SqlxError) -> bool {
    match err {
        SqlxError::Database(db_err) => {
            let message = db_err.message();
            message.contains("database is locked") || message.contains("database table is locked")
        }
        _ => false,
    }
}

// User operations

pub async fn upsert_user(pool: &SqlitePool, user_id: &str) -> Result<User, SqlxError> {
    let now = Utc::now();

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, created_at, last_request, is_frozen)
        VALUES (?, ?, ?, 0)
        ON CONFLICT(id) DO UPDATE
        SET last_request = excluded.last_request,
            is_frozen = 0,
            frozen_at = NULL
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(user)
}

pub async fn touch_user(pool: &SqlitePool, user_id: &str) -> Result<(), SqlxError> {
    sqlx::query(
        r#"
        UPDATE users
        SET last_request = ?,
            is_frozen = 0,
            frozen_at = NULL
        WHERE id = ?
        "#,
    )
    .bind(Utc::now())
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_user(pool: &SqlitePool, user_id: &str) -> Result<Option<User>, SqlxError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    Ok(user)
}

pub async fn set_user_clusters(
    pool: &SqlitePool,
    user_id: &str,
    clusters_json: &str,
) -> Result<(), SqlxError> {
    sqlx::query(
        r#"
        UPDATE users
        SET clusters = ?,
            clusters_updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(clusters_json)
    .bind(Utc::now())
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(())
}

// Feed operations

/// Look up a feed by its canonical URL or, if a redirect renamed it, by the
/// URL the user originally subscribed with.
pub async fn find_feed(pool: &SqlitePool, url: &str) -> Result<Option<Feed>, SqlxError> {
    let feed = sqlx::query_as::<_, Feed>(
        r#"
        SELECT * FROM feeds
        WHERE url = ? OR original_url = ?
        "#,
    )
    .bind(url)
    .bind(url)
    .fetch_optional(pool)
    .await?;

    Ok(feed)
}

/// Exact canonical-URL lookup, used to detect redirect collisions.
pub async fn get_feed_by_url(pool: &SqlitePool, url: &str) -> Result<Option<Feed>, SqlxError> {
    let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE url = ?")
        .bind(url)
        .fetch_optional(pool)
        .await?;

    Ok(feed)
}

pub async fn get_feed_by_id(pool: &SqlitePool, feed_id: i64) -> Result<Option<Feed>, SqlxError> {
    let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE id = ?")
        .bind(feed_id)
        .fetch_optional(pool)
        .await?;

    Ok(feed)
}

pub async fn get_feeds_by_ids(pool: &SqlitePool, feed_ids: &[i64]) -> Result<Vec<Feed>, SqlxError> {
    let mut feeds = Vec::with_capacity(feed_ids.len());
    for feed_id in feed_ids {
        if let Some(feed) = get_feed_by_id(pool, *feed_id).await? {
            feeds.push(feed);
        }
    }
    Ok(feeds)
}

/// Persist a freshly fetched feed that is not yet known to the store.
pub async fn create_feed(pool: &SqlitePool, parsed: &ParsedFeed) -> Result<Feed, SqlxError> {
    let now = Utc::now();

    let feed = sqlx::query_as::<_, Feed>(
        r#"
        INSERT INTO feeds (url, title, description, language, logo, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(url) DO UPDATE
        SET title = excluded.title,
            description = excluded.description,
            language = excluded.language,
            logo = excluded.logo,
            updated_at = excluded.updated_at
        RETURNING *
        "#,
    )
    .bind(&parsed.url)
    .bind(&parsed.title)
    .bind(&parsed.description)
    .bind(&parsed.language)
    .bind(&parsed.logo)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(feed)
}

/// Record a successful fetch: refresh metadata, reset failure tracking and
/// stamp `updated_at`.
pub async fn update_feed_fetch_success(
    pool: &SqlitePool,
    feed_id: i64,
    parsed: &ParsedFeed,
) -> Result<(), SqlxError> {
    sqlx::query(
        r#"
        UPDATE feeds
        SET title = ?,
            description = COALESCE(?, description),
            language = COALESCE(?, language),
            logo = COALESCE(?, logo),
            consecutive_failures = 0,
            last_error = NULL,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&parsed.title)
    .bind(&parsed.description)
    .bind(&parsed.language)
    .bind(&parsed.logo)
    .bind(Utc::now())
    .bind(feed_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record a failed fetch. Returns the new failure count and whether the
/// feed crossed the disable threshold.
pub async fn update_feed_fetch_failure(
    pool: &SqlitePool,
    feed_id: i64,
    error: &str,
    max_failures: i64,
) -> Result<(i64, bool), SqlxError> {
    let feed = sqlx::query_as::<_, Feed>(
        r#"
        UPDATE feeds
        SET consecutive_failures = consecutive_failures + 1,
            last_error = ?,
            is_disabled = CASE
                WHEN consecutive_failures + 1 >= ? THEN 1
                ELSE is_disabled
            END
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(error)
    .bind(max_failures)
    .bind(feed_id)
    .fetch_one(pool)
    .await?;

    Ok((feed.consecutive_failures, feed.is_disabled))
}

/// Adopt a redirect's final URL as the canonical one, preserving the URL the
/// feed was first subscribed with so lookups keep working.
pub async fn update_feed_canonical_url(
    pool: &SqlitePool,
    feed_id: i64,
    old_url: &str,
    new_url: &str,
) -> Result<(), SqlxError> {
    sqlx::query(
        r#"
        UPDATE feeds
        SET original_url = COALESCE(original_url, ?),
            url = ?
        WHERE id = ?
        "#,
    )
    .bind(old_url)
    .bind(new_url)
    .bind(feed_id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn disable_feed(pool: &SqlitePool, feed_id: i64, reason: &str) -> Result<(), SqlxError> {
    sqlx::query(
        r#"
        UPDATE feeds
        SET is_disabled = 1,
            last_error = ?
        WHERE id = ?
        "#,
    )
    .bind(reason)
    .bind(feed_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Feeds worth refreshing on the periodic schedule: subscribed to by a user
/// active within the last 30 days, user not frozen, feed not disabled.
pub async fn list_active_feeds(pool: &SqlitePool) -> Result<Vec<Feed>, SqlxError> {
    let one_month_ago = Utc::now() - Duration::days(30);

    let feeds = sqlx::query_as::<_, Feed>(
        r#"
        SELECT DISTINCT f.* FROM feeds f
        INNER JOIN user_feeds uf ON uf.feed_id = f.id
        INNER JOIN users u ON u.id = uf.user_id
        WHERE u.last_request > ?
          AND u.is_frozen = 0
          AND f.is_disabled = 0
        ORDER BY f.id ASC
        "#,
    )
    .bind(one_month_ago)
    .fetch_all(pool)
    .await?;

    Ok(feeds)
}

/// Reset all disabled feeds so they get one more chance; returns their ids.
pub async fn reset_disabled_feeds(pool: &SqlitePool) -> Result<Vec<i64>, SqlxError> {
    let feeds = sqlx::query_as::<_, Feed>(
        r#"
        UPDATE feeds
        SET consecutive_failures = 0,
            is_disabled = 0
        WHERE is_disabled = 1
        RETURNING *
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(feeds.into_iter().map(|feed| feed.id).collect())
}

// Article operations

/// Idempotent on `(url, feed_id)`: re-fetching a feed never duplicates an
/// article. Returns the row only when it was actually inserted.
pub async fn insert_article_if_absent(
    pool: &SqlitePool,
    feed_id: i64,
    article: &ParsedArticle,
) -> Result<Option<Article>, SqlxError> {
    let result = sqlx::query_as::<_, Article>(
        r#"
        INSERT INTO articles (feed_id, title, description, url, comments_url, pub_date, updated)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(url, feed_id) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(feed_id)
    .bind(&article.title)
    .bind(&article.description)
    .bind(&article.url)
    .bind(&article.comments_url)
    .bind(article.pub_date)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await?;

    Ok(result)
}

pub async fn get_article_by_id(
    pool: &SqlitePool,
    article_id: i64,
) -> Result<Option<Article>, SqlxError> {
    let article = sqlx::query_as::<_, Article>("SELECT * FROM articles WHERE id = ?")
        .bind(article_id)
        .fetch_optional(pool)
        .await?;

    Ok(article)
}

/// The `n` newest articles of a feed by publication date, ties broken by id.
/// Articles without a publication date sort last.
pub async fn list_recent_articles(
    pool: &SqlitePool,
    feed_id: i64,
    n: i64,
) -> Result<Vec<Article>, SqlxError> {
    let articles = sqlx::query_as::<_, Article>(
        r#"
        SELECT * FROM articles
        WHERE feed_id = ?
        ORDER BY pub_date DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(feed_id)
    .bind(n)
    .fetch_all(pool)
    .await?;

    Ok(articles)
}

pub async fn touch_article_updated(pool: &SqlitePool, article_id: i64) -> Result<(), SqlxError> {
    sqlx::query("UPDATE articles SET updated = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(article_id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn articles_missing_embeddings(
    pool: &SqlitePool,
    article_ids: &[i64],
) -> Result<Vec<Article>, SqlxError> {
    let mut articles = Vec::new();
    for article_id in article_ids {
        let article = sqlx::query_as::<_, Article>(
            "SELECT * FROM articles WHERE id = ? AND embedding IS NULL",
        )
        .bind(article_id)
        .fetch_optional(pool)
        .await?;
        if let Some(article) = article {
            articles.push(article);
        }
    }
    Ok(articles)
}

pub async fn set_article_embedding(
    pool: &SqlitePool,
    article_id: i64,
    embedding_json: &str,
) -> Result<(), SqlxError> {
    sqlx::query("UPDATE articles SET embedding = ? WHERE id = ?")
        .bind(embedding_json)
        .bind(article_id)
        .execute(pool)
        .await?;

    Ok(())
}

// Link operations

pub async fn link_user_feed(
    pool: &SqlitePool,
    user_id: &str,
    feed_id: i64,
) -> Result<(), SqlxError> {
    sqlx::query(
        r#"
        INSERT INTO user_feeds (user_id, feed_id, created_at)
        VALUES (?, ?, ?)
        ON CONFLICT(user_id, feed_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(feed_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Record one click event. Repeated clicks on the same article are kept as
/// separate rows; `created_at` is part of the primary key.
pub async fn insert_user_article_click(
    pool: &SqlitePool,
    user_id: &str,
    article_id: i64,
) -> Result<(), SqlxError> {
    sqlx::query(
        r#"
        INSERT INTO user_articles (user_id, article_id, created_at)
        VALUES (?, ?, ?)
        ON CONFLICT(user_id, article_id, created_at) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(article_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn count_user_clicked_articles(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<i64, SqlxError> {
    let count: (i64,) = sqlx::query_as(
        "SELECT COUNT(DISTINCT article_id) FROM user_articles WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(count.0)
}

/// Distinct articles the user has clicked, oldest click first.
pub async fn list_user_clicked_articles(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Vec<Article>, SqlxError> {
    let articles = sqlx::query_as::<_, Article>(
        r#"
        SELECT a.* FROM articles a
        INNER JOIN (
            SELECT article_id, MIN(created_at) AS first_click
            FROM user_articles
            WHERE user_id = ?
            GROUP BY article_id
        ) ua ON ua.article_id = a.id
        ORDER BY ua.first_click ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(articles)
}

// Maintenance bulk updates

pub async fn freeze_dormant_users(pool: &SqlitePool, days: i64) -> Result<u64, SqlxError> {
    let threshold = Utc::now() - Duration::days(days);
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        UPDATE users
        SET is_frozen = 1,
            frozen_at = ?
        WHERE last_request < ?
          AND is_frozen = 0
        "#,
    )
    .bind(now)
    .bind(threshold)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn unfreeze_user(pool: &SqlitePool, user_id: &str) -> Result<bool, SqlxError> {
    let result = sqlx::query(
        r#"
        UPDATE users
        SET is_frozen = 0,
            frozen_at = NULL,
            last_request = ?
        WHERE id = ?
          AND is_frozen = 1
        "#,
    )
    .bind(Utc::now())
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete articles past the retention window that nobody ever clicked.
pub async fn cleanup_old_articles(pool: &SqlitePool, days: i64) -> Result<u64, SqlxError> {
    let threshold = Utc::now() - Duration::days(days);

    let result = sqlx::query(
        r#"
        DELETE FROM articles
        WHERE updated < ?
          AND id NOT IN (SELECT DISTINCT article_id FROM user_articles)
        "#,
    )
    .bind(threshold)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn cleanup_orphan_user_article_links(pool: &SqlitePool) -> Result<u64, SqlxError> {
    let result = sqlx::query(
        "DELETE FROM user_articles WHERE article_id NOT IN (SELECT id FROM articles)",
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn cleanup_orphan_user_feed_links(pool: &SqlitePool) -> Result<u64, SqlxError> {
    let result = sqlx::query("DELETE FROM user_feeds WHERE feed_id NOT IN (SELECT id FROM feeds)")
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Delete users inactive past the threshold that hold no links at all.
pub async fn cleanup_inactive_users(pool: &SqlitePool, days: i64) -> Result<u64, SqlxError> {
    let threshold = Utc::now() - Duration::days(days);

    let result = sqlx::query(
        r#"
        DELETE FROM users
        WHERE last_request < ?
          AND id NOT IN (SELECT DISTINCT user_id FROM user_articles)
          AND id NOT IN (SELECT DISTINCT user_id FROM user_feeds)
        "#,
    )
    .bind(threshold)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Null out embeddings for articles that fell out of the embedding window.
pub async fn remove_old_embeddings(pool: &SqlitePool, days: i64) -> Result<u64, SqlxError> {
    let threshold = Utc::now() - Duration::days(days);

    let result = sqlx::query(
        r#"
        UPDATE articles
        SET embedding = NULL
        WHERE updated < ?
          AND embedding IS NOT NULL
        "#,
    )
    .bind(threshold)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn vacuum_database(pool: &SqlitePool) -> Result<(), SqlxError> {
    sqlx::query("VACUUM").execute(pool).await?;
    sqlx::query("ANALYZE").execute(pool).await?;

    Ok(())
}

pub async fn get_database_stats(pool: &SqlitePool) -> Result<DatabaseStats, SqlxError> {
    let one_month_ago = Utc::now() - Duration::days(30);

    let users_total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    let users_active_30d: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM users WHERE last_request > ?")
            .bind(one_month_ago)
            .fetch_one(pool)
            .await?;
    let users_frozen: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE is_frozen = 1")
        .fetch_one(pool)
        .await?;
    let feeds_total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM feeds")
        .fetch_one(pool)
        .await?;
    let feeds_disabled: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM feeds WHERE is_disabled = 1")
        .fetch_one(pool)
        .await?;
    let articles_total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles")
        .fetch_one(pool)
        .await?;
    let articles_with_embeddings: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM articles WHERE embedding IS NOT NULL")
            .fetch_one(pool)
            .await?;
    let user_article_links: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_articles")
        .fetch_one(pool)
        .await?;
    let user_feed_links: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_feeds")
        .fetch_one(pool)
        .await?;

    Ok(DatabaseStats {
        users_total: users_total.0,
        users_active_30d: users_active_30d.0,
        users_frozen: users_frozen.0,
        feeds_total: feeds_total.0,
        feeds_disabled: feeds_disabled.0,
        articles_total: articles_total.0,
        articles_with_embeddings: articles_with_embeddings.0,
        user_article_links: user_article_links.0,
        user_feed_links: user_feed_links.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn sample_parsed_feed(url: &str) -> ParsedFeed {
        ParsedFeed {
            url: url.to_string(),
            title: "Test Feed".to_string(),
            description: Some("A test feed".to_string()),
            language: Some("en".to_string()),
            logo: None,
            articles: Vec::new(),
        }
    }

    fn sample_article(url: &str) -> ParsedArticle {
        ParsedArticle {
            title: Some("Test Article".to_string()),
            url: url.to_string(),
            description: Some("<p>body</p>".to_string()),
            comments_url: None,
            pub_date: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn test_upsert_user_creates_and_touches() {
        let pool = setup_test_db().await;

        let user = upsert_user(&pool, "u1").await.unwrap();
        assert_eq!(user.id, "u1");
        assert!(!user.is_frozen);

        // Freeze, then upsert again: the flag must clear
        freeze_dormant_users(&pool, -1).await.unwrap();
        let frozen = get_user(&pool, "u1").await.unwrap().unwrap();
        assert!(frozen.is_frozen);

        let user = upsert_user(&pool, "u1").await.unwrap();
        assert!(!user.is_frozen);
        assert!(user.frozen_at.is_none());
    }

    #[tokio::test]
    async fn test_touch_user_updates_without_insert() {
        let pool = setup_test_db().await;

        // Touching an unknown id must not create a row
        touch_user(&pool, "ghost").await.unwrap();
        assert!(get_user(&pool, "ghost").await.unwrap().is_none());

        let before = upsert_user(&pool, "u1").await.unwrap();
        freeze_dormant_users(&pool, -1).await.unwrap();

        touch_user(&pool, "u1").await.unwrap();

        let after = get_user(&pool, "u1").await.unwrap().unwrap();
        assert!(!after.is_frozen);
        assert!(after.frozen_at.is_none());
        assert!(after.last_request >= before.last_request);
    }

    #[tokio::test]
    async fn test_find_feed_by_url_and_original_url() {
        let pool = setup_test_db().await;

        let feed = create_feed(&pool, &sample_parsed_feed("https://example.com/feed"))
            .await
            .unwrap();

        update_feed_canonical_url(
            &pool,
            feed.id,
            "https://example.com/feed",
            "https://example.com/rss.xml",
        )
        .await
        .unwrap();

        let by_new = find_feed(&pool, "https://example.com/rss.xml")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_new.id, feed.id);

        let by_old = find_feed(&pool, "https://example.com/feed")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_old.id, feed.id);
        assert_eq!(
            by_old.original_url.as_deref(),
            Some("https://example.com/feed")
        );
    }

    #[tokio::test]
    async fn test_canonical_url_update_keeps_first_original() {
        let pool = setup_test_db().await;

        let feed = create_feed(&pool, &sample_parsed_feed("https://a.example/feed"))
            .await
            .unwrap();

        update_feed_canonical_url(&pool, feed.id, "https://a.example/feed", "https://b.example/feed")
            .await
            .unwrap();
        update_feed_canonical_url(&pool, feed.id, "https://b.example/feed", "https://c.example/feed")
            .await
            .unwrap();

        let feed = get_feed_by_id(&pool, feed.id).await.unwrap().unwrap();
        assert_eq!(feed.url, "https://c.example/feed");
        // Only the first rename is preserved
        assert_eq!(feed.original_url.as_deref(), Some("https://a.example/feed"));
    }

    #[tokio::test]
    async fn test_insert_article_if_absent_is_idempotent() {
        let pool = setup_test_db().await;

        let feed = create_feed(&pool, &sample_parsed_feed("https://example.com/feed"))
            .await
            .unwrap();

        let inserted = insert_article_if_absent(&pool, feed.id, &sample_article("https://example.com/a1"))
            .await
            .unwrap();
        assert!(inserted.is_some());

        let duplicate = insert_article_if_absent(&pool, feed.id, &sample_article("https://example.com/a1"))
            .await
            .unwrap();
        assert!(duplicate.is_none());

        // Same URL under a different feed is a distinct article
        let other = create_feed(&pool, &sample_parsed_feed("https://other.example/feed"))
            .await
            .unwrap();
        let cross_feed = insert_article_if_absent(&pool, other.id, &sample_article("https://example.com/a1"))
            .await
            .unwrap();
        assert!(cross_feed.is_some());
    }

    #[tokio::test]
    async fn test_list_recent_articles_orders_by_pub_date() {
        let pool = setup_test_db().await;

        let feed = create_feed(&pool, &sample_parsed_feed("https://example.com/feed"))
            .await
            .unwrap();

        for i in 0..5 {
            let article = ParsedArticle {
                title: Some(format!("Article {}", i)),
                url: format!("https://example.com/a{}", i),
                description: None,
                comments_url: None,
                pub_date: Some(Utc::now() - Duration::hours(i)),
            };
            insert_article_if_absent(&pool, feed.id, &article)
                .await
                .unwrap();
        }

        let recent = list_recent_articles(&pool, feed.id, 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].title.as_deref(), Some("Article 0"));
        assert_eq!(recent[2].title.as_deref(), Some("Article 2"));
    }

    #[tokio::test]
    async fn test_failure_tracking_disables_at_threshold() {
        let pool = setup_test_db().await;

        let feed = create_feed(&pool, &sample_parsed_feed("https://example.com/feed"))
            .await
            .unwrap();

        for attempt in 1..=4 {
            let (failures, disabled) =
                update_feed_fetch_failure(&pool, feed.id, "connection refused", 5)
                    .await
                    .unwrap();
            assert_eq!(failures, attempt);
            assert!(!disabled);
        }

        let (failures, disabled) = update_feed_fetch_failure(&pool, feed.id, "timeout", 5)
            .await
            .unwrap();
        assert_eq!(failures, 5);
        assert!(disabled);

        // Success resets both
        update_feed_fetch_success(&pool, feed.id, &sample_parsed_feed("https://example.com/feed"))
            .await
            .unwrap();
        let feed = get_feed_by_id(&pool, feed.id).await.unwrap().unwrap();
        assert_eq!(feed.consecutive_failures, 0);
        assert!(feed.last_error.is_none());
    }

    #[tokio::test]
    async fn test_click_events_accumulate_per_event() {
        let pool = setup_test_db().await;

        upsert_user(&pool, "u1").await.unwrap();
        let feed = create_feed(&pool, &sample_parsed_feed("https://example.com/feed"))
            .await
            .unwrap();
        let article = insert_article_if_absent(&pool, feed.id, &sample_article("https://example.com/a1"))
            .await
            .unwrap()
            .unwrap();

        insert_user_article_click(&pool, "u1", article.id)
            .await
            .unwrap();
        insert_user_article_click(&pool, "u1", article.id)
            .await
            .unwrap();

        // Distinct count stays one no matter how many clicks
        assert_eq!(count_user_clicked_articles(&pool, "u1").await.unwrap(), 1);

        let clicked = list_user_clicked_articles(&pool, "u1").await.unwrap();
        assert_eq!(clicked.len(), 1);
        assert_eq!(clicked[0].id, article.id);
    }

    #[tokio::test]
    async fn test_freeze_and_unfreeze() {
        let pool = setup_test_db().await;

        upsert_user(&pool, "u1").await.unwrap();

        // Negative threshold makes every user dormant
        let frozen = freeze_dormant_users(&pool, -1).await.unwrap();
        assert_eq!(frozen, 1);

        assert!(unfreeze_user(&pool, "u1").await.unwrap());
        // Already unfrozen: no-op
        assert!(!unfreeze_user(&pool, "u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_old_articles_spares_clicked() {
        let pool = setup_test_db().await;

        upsert_user(&pool, "u1").await.unwrap();
        let feed = create_feed(&pool, &sample_parsed_feed("https://example.com/feed"))
            .await
            .unwrap();
        let kept = insert_article_if_absent(&pool, feed.id, &sample_article("https://example.com/kept"))
            .await
            .unwrap()
            .unwrap();
        insert_article_if_absent(&pool, feed.id, &sample_article("https://example.com/gone"))
            .await
            .unwrap()
            .unwrap();

        insert_user_article_click(&pool, "u1", kept.id)
            .await
            .unwrap();

        // Negative retention ages out everything unread
        let deleted = cleanup_old_articles(&pool, -1).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(get_article_by_id(&pool, kept.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_orphan_link_cleanup() {
        let pool = setup_test_db().await;

        upsert_user(&pool, "u1").await.unwrap();
        let feed = create_feed(&pool, &sample_parsed_feed("https://example.com/feed"))
            .await
            .unwrap();
        let article = insert_article_if_absent(&pool, feed.id, &sample_article("https://example.com/a1"))
            .await
            .unwrap()
            .unwrap();

        link_user_feed(&pool, "u1", feed.id).await.unwrap();
        insert_user_article_click(&pool, "u1", article.id)
            .await
            .unwrap();

        // Deleting the feed cascades to its articles but not to link rows
        sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed.id)
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(cleanup_orphan_user_article_links(&pool).await.unwrap(), 1);
        assert_eq!(cleanup_orphan_user_feed_links(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove_old_embeddings() {
        let pool = setup_test_db().await;

        let feed = create_feed(&pool, &sample_parsed_feed("https://example.com/feed"))
            .await
            .unwrap();
        let article = insert_article_if_absent(&pool, feed.id, &sample_article("https://example.com/a1"))
            .await
            .unwrap()
            .unwrap();

        set_article_embedding(&pool, article.id, "[0.1,0.2]")
            .await
            .unwrap();

        let removed = remove_old_embeddings(&pool, -1).await.unwrap();
        assert_eq!(removed, 1);

        let article = get_article_by_id(&pool, article.id).await.unwrap().unwrap();
        assert!(article.embedding.is_none());
    }

    #[tokio::test]
    async fn test_cleanup_inactive_users_requires_no_links() {
        let pool = setup_test_db().await;

        upsert_user(&pool, "linked").await.unwrap();
        upsert_user(&pool, "bare").await.unwrap();
        let feed = create_feed(&pool, &sample_parsed_feed("https://example.com/feed"))
            .await
            .unwrap();
        link_user_feed(&pool, "linked", feed.id).await.unwrap();

        let deleted = cleanup_inactive_users(&pool, -1).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(get_user(&pool, "linked").await.unwrap().is_some());
        assert!(get_user(&pool, "bare").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_disabled_feeds() {
        let pool = setup_test_db().await;

        let feed = create_feed(&pool, &sample_parsed_feed("https://example.com/feed"))
            .await
            .unwrap();
        disable_feed(&pool, feed.id, "kept failing").await.unwrap();

        let revived = reset_disabled_feeds(&pool).await.unwrap();
        assert_eq!(revived, vec![feed.id]);

        let feed = get_feed_by_id(&pool, feed.id).await.unwrap().unwrap();
        assert!(!feed.is_disabled);
        assert_eq!(feed.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_database_stats_counts() {
        let pool = setup_test_db().await;

        upsert_user(&pool, "u1").await.unwrap();
        let feed = create_feed(&pool, &sample_parsed_feed("https://example.com/feed"))
            .await
            .unwrap();
        let article = insert_article_if_absent(&pool, feed.id, &sample_article("https://example.com/a1"))
            .await
            .unwrap()
            .unwrap();
        link_user_feed(&pool, "u1", feed.id).await.unwrap();
        insert_user_article_click(&pool, "u1", article.id)
            .await
            .unwrap();

        let stats = get_database_stats(&pool).await.unwrap();
        assert_eq!(stats.users_total, 1);
        assert_eq!(stats.feeds_total, 1);
        assert_eq!(stats.articles_total, 1);
        assert_eq!(stats.user_feed_links, 1);
        assert_eq!(stats.user_article_links, 1);
        assert_eq!(stats.articles_with_embeddings, 0);
    }
}
