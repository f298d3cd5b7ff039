use crate::domain::{embedding, maintenance, recommend};
use crate::infrastructure::jobs::{Job, JobContext, QueueName};
use crate::infrastructure::repository;
use crate::infrastructure::ssrf::is_safe_redirect;
use anyhow::Result;
use futures::future::join_all;

/// Fetch a batch of feeds concurrently, merge their articles and keep the
/// per-feed failure accounting. Returns the ids of newly inserted articles.
pub async fn fetch_feed_batch(ctx: &JobContext, feed_ids: &[i64]) -> Result<Vec<i64>> {
    let feeds = repository::get_feeds_by_ids(&ctx.pool, feed_ids).await?;

    let results = join_all(feeds.iter().map(|feed| ctx.fetcher.fetch_feed(&feed.url))).await;

    let mut new_article_ids = Vec::new();
    let mut fetched = 0usize;

    for (feed, result) in feeds.iter().zip(results) {
        let parsed = match result {
            Ok(parsed) => parsed,
            Err(error) => {
                tracing::warn!("Error fetching feed {} ({}): {}", feed.id, feed.url, error);
                let (failures, disabled) = repository::update_feed_fetch_failure(
                    &ctx.pool,
                    feed.id,
                    &error.to_string(),
                    ctx.config.feed_max_failures,
                )
                .await?;
                if disabled {
                    tracing::warn!(
                        "Disabled feed {} ({}) after {} consecutive failures",
                        feed.id,
                        feed.url,
                        failures
                    );
                }
                continue;
            }
        };

        // A redirect may have moved the feed to a new canonical URL.
        if parsed.url != feed.url {
            match repository::get_feed_by_url(&ctx.pool, &parsed.url).await? {
                Some(existing) if existing.id != feed.id => {
                    tracing::warn!(
                        "Feed {} redirected to {} which already exists as feed {}, disabling",
                        feed.id,
                        parsed.url,
                        existing.id
                    );
                    repository::disable_feed(
                        &ctx.pool,
                        feed.id,
                        &format!("Redirects to existing feed {}", existing.id),
                    )
                    .await?;
                    continue;
                }
                _ => {
                    if is_safe_redirect(&feed.url, &parsed.url) {
                        tracing::info!(
                            "Updating feed {} URL: {} -> {}",
                            feed.id,
                            feed.url,
                            parsed.url
                        );
                        repository::update_feed_canonical_url(
                            &ctx.pool,
                            feed.id,
                            &feed.url,
                            &parsed.url,
                        )
                        .await?;
                    } else {
                        tracing::warn!(
                            "Feed {} redirected off-host to {}, keeping stored URL",
                            feed.id,
                            parsed.url
                        );
                    }
                }
            }
        }

        fetched += 1;
        repository::update_feed_fetch_success(&ctx.pool, feed.id, &parsed).await?;

        for article in &parsed.articles {
            if let Some(inserted) =
                repository::insert_article_if_absent(&ctx.pool, feed.id, article).await?
            {
                new_article_ids.push(inserted.id);
            }
        }
    }

    if !new_article_ids.is_empty() {
        ctx.queues.enqueue(
            QueueName::Gpu,
            Job::ComputeEmbeddings(new_article_ids.clone()),
        );
    }

    tracing::info!(
        "Fetched {}/{} feeds, added {} new articles",
        fetched,
        feeds.len(),
        new_article_ids.len()
    );
    Ok(new_article_ids)
}

/// Embed articles that don't have a vector yet. Runs on the GPU queue,
/// whose single worker serializes the oracle calls.
pub async fn compute_embeddings_batch(ctx: &JobContext, article_ids: &[i64]) -> Result<()> {
    let Some(embedder) = &ctx.embedder else {
        tracing::warn!("No embedding oracle configured, skipping embedding computation");
        return Ok(());
    };

    let articles = repository::articles_missing_embeddings(&ctx.pool, article_ids).await?;
    if articles.is_empty() {
        return Ok(());
    }

    let embedded = embedding::compute_embeddings(embedder.as_ref(), &ctx.pool, &articles).await?;
    tracing::info!("Computed embeddings for {} articles", embedded);
    Ok(())
}

/// Record a click: touch the user, keep the article alive, append the click
/// event and kick off cluster recomputation once the history is thick
/// enough to learn from.
pub async fn log_user_action(
    ctx: &JobContext,
    user_id: &str,
    article_id: i64,
    link_url: &str,
) -> Result<()> {
    match repository::get_user(&ctx.pool, user_id).await? {
        Some(user) => {
            if user.is_frozen {
                tracing::info!("Auto-unfroze user {} due to activity", user_id);
            }
            repository::touch_user(&ctx.pool, user_id).await?;
        }
        None => {
            repository::upsert_user(&ctx.pool, user_id).await?;
        }
    }

    let Some(article) = repository::get_article_by_id(&ctx.pool, article_id).await? else {
        tracing::warn!("Article {} not found for click by {}", article_id, user_id);
        return Ok(());
    };

    repository::touch_article_updated(&ctx.pool, article.id).await?;
    repository::insert_user_article_click(&ctx.pool, user_id, article.id).await?;

    let clicked = repository::count_user_clicked_articles(&ctx.pool, user_id).await?;
    if clicked >= recommend::MIN_CLUSTER_ARTICLES as i64 {
        ctx.queues.enqueue(
            QueueName::Medium,
            Job::RecomputeUserClusters(user_id.to_string()),
        );
    }

    tracing::info!(
        "Logged action for user {}, article {} ({})",
        user_id,
        article_id,
        link_url
    );
    Ok(())
}

/// Re-derive a user's cluster centers from their click history. Idempotent;
/// a concurrent run just writes last.
pub async fn recompute_user_clusters(ctx: &JobContext, user_id: &str) -> Result<()> {
    let articles = repository::list_user_clicked_articles(&ctx.pool, user_id).await?;

    match recommend::cluster_user_articles(&articles, recommend::DEFAULT_CLUSTERS) {
        Ok(centers) => {
            let json = serde_json::to_string(&centers)?;
            repository::set_user_clusters(&ctx.pool, user_id, &json).await?;
            tracing::info!("Recomputed clusters for user {}", user_id);
        }
        Err(recommend::ClusterError::NotEnoughArticles { have, min }) => {
            tracing::debug!(
                "Skipping cluster recompute for user {}: {}/{} embedded articles",
                user_id,
                have,
                min
            );
        }
    }

    Ok(())
}

/// Enqueue a low-priority fetch for every feed someone still reads.
pub async fn fetch_all_feeds(ctx: &JobContext) -> Result<()> {
    let feeds = repository::list_active_feeds(&ctx.pool).await?;
    let batch_size = ctx.config.feed_fetch_batch_size.max(1);

    for chunk in feeds.chunks(batch_size) {
        let ids: Vec<i64> = chunk.iter().map(|feed| feed.id).collect();
        ctx.queues.enqueue(QueueName::Low, Job::FetchFeedBatch(ids));
    }

    tracing::info!(
        "Scheduled {} active feeds in batches of {}",
        feeds.len(),
        batch_size
    );
    Ok(())
}

/// Give disabled feeds another chance: reset their failure tracking and
/// fetch them once.
pub async fn retry_disabled_feeds(ctx: &JobContext) -> Result<()> {
    let revived = repository::reset_disabled_feeds(&ctx.pool).await?;
    let batch_size = ctx.config.feed_fetch_batch_size.max(1);

    for chunk in revived.chunks(batch_size) {
        ctx.queues
            .enqueue(QueueName::Low, Job::FetchFeedBatch(chunk.to_vec()));
    }

    tracing::info!("Re-enabled {} disabled feeds", revived.len());
    Ok(())
}

pub async fn run_full_maintenance_job(ctx: &JobContext) -> Result<()> {
    maintenance::run_full_maintenance(&ctx.pool, &ctx.config).await?;
    Ok(())
}
