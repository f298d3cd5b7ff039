use crate::domain::recommend;
use crate::infrastructure::fetcher::FetchError;
use crate::infrastructure::jobs::{Job, JobContext, QueueName};
use crate::infrastructure::repository;
use crate::infrastructure::rewriter::{write_user_feed, RewriteError, TrackerUrls};
use chrono::Utc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// How many of a feed's newest articles go into a response.
pub const RECENT_ARTICLES: i64 = 30;

const REFRESH_POLL_INTERVAL: Duration = Duration::from_millis(500);
const REFRESH_POLL_CEILING: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum FeedServiceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Never surfaced verbatim; the API maps it to a generic 403.
    #[error("request blocked")]
    Ssrf,

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("feed generation failed: {0}")]
    Rewrite(#[from] RewriteError),
}

impl From<FetchError> for FeedServiceError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Ssrf => FeedServiceError::Ssrf,
            FetchError::InvalidUrl(msg) => FeedServiceError::InvalidUrl(msg),
            FetchError::TooManyRedirects => {
                FeedServiceError::Upstream("too many redirects".to_string())
            }
            FetchError::Upstream(msg) => FeedServiceError::Upstream(msg),
        }
    }
}

fn normalize_feed_url(feed_url: &str) -> Result<String, FeedServiceError> {
    let url = Url::parse(feed_url).map_err(|e| FeedServiceError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url.to_string()),
        scheme => Err(FeedServiceError::InvalidUrl(format!(
            "unsupported scheme: {scheme}"
        ))),
    }
}

/// Serve a user's personalized view of a feed.
///
/// Unknown feeds are fetched synchronously on this path (the user is
/// waiting); known-but-stale feeds refresh through a high-priority job that
/// is polled for up to ten seconds before stored articles are served as-is.
pub async fn get_user_feed(
    ctx: &JobContext,
    urls: &TrackerUrls,
    user_id: &str,
    feed_url: &str,
) -> Result<String, FeedServiceError> {
    let feed_url = normalize_feed_url(feed_url)?;

    let user = repository::upsert_user(&ctx.pool, user_id).await?;

    let feed = match repository::find_feed(&ctx.pool, &feed_url).await? {
        Some(feed) => feed,
        None => {
            let parsed = ctx.fetcher.fetch_feed(&feed_url).await?;

            // The fetch may have redirected onto a feed we already track
            match repository::get_feed_by_url(&ctx.pool, &parsed.url).await? {
                Some(existing) => existing,
                None => {
                    let feed = repository::create_feed(&ctx.pool, &parsed).await?;
                    let mut new_article_ids = Vec::new();
                    for article in &parsed.articles {
                        if let Some(inserted) =
                            repository::insert_article_if_absent(&ctx.pool, feed.id, article)
                                .await?
                        {
                            new_article_ids.push(inserted.id);
                        }
                    }
                    if !new_article_ids.is_empty() {
                        ctx.queues
                            .enqueue(QueueName::Gpu, Job::ComputeEmbeddings(new_article_ids));
                    }
                    feed
                }
            }
        }
    };

    repository::link_user_feed(&ctx.pool, user_id, feed.id).await?;

    let stale_after = chrono::Duration::hours(ctx.config.feed_refresh_interval_hours);
    if Utc::now() - feed.updated_at > stale_after {
        tracing::debug!("Feed {} is stale, refreshing on the high queue", feed.id);
        let handle = ctx
            .queues
            .enqueue(QueueName::High, Job::FetchFeedBatch(vec![feed.id]));
        let status = handle
            .wait(REFRESH_POLL_INTERVAL, REFRESH_POLL_CEILING)
            .await;
        if !status.is_finished() {
            tracing::warn!(
                "Refresh of feed {} did not finish in time, serving stored articles",
                feed.id
            );
        }
    }

    let articles = repository::list_recent_articles(&ctx.pool, feed.id, RECENT_ARTICLES).await?;

    let articles = match user.cluster_centers() {
        Some(centers) => recommend::filter_articles(articles, &centers),
        None => articles,
    };

    // The refresh may have updated feed metadata or its canonical URL
    let feed = repository::get_feed_by_id(&ctx.pool, feed.id)
        .await?
        .unwrap_or(feed);

    Ok(write_user_feed(&feed, &articles, user_id, urls)?)
}

/// A redirect target becomes a Location header verbatim, so control bytes
/// (CR/LF and friends, decoded out of the tracker path segment) must be
/// rejected before any header is built. The URL parser cannot be trusted
/// for this: it silently strips tabs and newlines.
fn ensure_redirectable(link_url: &str) -> Result<(), FeedServiceError> {
    if link_url.bytes().any(|b| b < 0x20 || b == 0x7f) {
        return Err(FeedServiceError::InvalidUrl(
            "control characters in redirect target".to_string(),
        ));
    }
    Ok(())
}

/// Validate a click target and hand the bookkeeping to the medium queue.
/// The caller redirects immediately; the link row appears asynchronously.
pub fn log_click(
    ctx: &JobContext,
    user_id: &str,
    article_id: i64,
    link_url: &str,
) -> Result<(), FeedServiceError> {
    ensure_redirectable(link_url)?;

    let url = Url::parse(link_url).map_err(|e| FeedServiceError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(FeedServiceError::InvalidUrl(format!(
                "unsupported scheme: {scheme}"
            )))
        }
    }

    ctx.queues.enqueue(
        QueueName::Medium,
        Job::LogUserAction {
            user_id: user_id.to_string(),
            article_id,
            link_url: link_url.to_string(),
        },
    );

    Ok(())
}
