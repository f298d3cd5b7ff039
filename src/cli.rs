use crate::domain::{maintenance, tasks};
use crate::infrastructure::jobs::JobContext;
use crate::infrastructure::repository;
use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "feedlens", version, about = "Personalizing RSS/Atom feed proxy")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the API server with workers and the periodic scheduler (default)
    Serve,
    /// Fetch every active feed now
    FetchFeeds,
    /// Null out embeddings older than the retention window
    CleanEmbeddings,
    /// Freeze users dormant past the threshold
    FreezeUsers {
        /// Dormancy threshold in days (default from environment)
        days: Option<i64>,
    },
    /// Unfreeze one user
    Unfreeze { user: String },
    /// Delete unread articles older than the retention window
    CleanArticles {
        /// Retention in days (default from environment)
        days: Option<i64>,
    },
    /// Delete link rows whose user, feed or article is gone
    CleanOrphans,
    /// Delete long-inactive users holding no links
    CleanUsers {
        /// Inactivity threshold in days (default from environment)
        days: Option<i64>,
    },
    /// Reclaim database space and refresh query statistics
    Vacuum,
    /// Print database statistics
    Stats,
    /// Run the full maintenance cycle once
    Maintenance,
}

/// Execute an administrative command directly against the store.
///
/// Unlike the server, the CLI has no long-lived workers, so feed fetching
/// runs the batches inline and finishes the embedding pass itself.
pub async fn run_command(command: Command, ctx: &JobContext) -> Result<()> {
    match command {
        Command::Serve => unreachable!("serve is handled by main"),
        Command::FetchFeeds => {
            let feeds = repository::list_active_feeds(&ctx.pool).await?;
            let batch_size = ctx.config.feed_fetch_batch_size.max(1);
            println!("Fetching {} active feeds...", feeds.len());

            let mut new_article_ids = Vec::new();
            for chunk in feeds.chunks(batch_size) {
                let ids: Vec<i64> = chunk.iter().map(|feed| feed.id).collect();
                new_article_ids.extend(tasks::fetch_feed_batch(ctx, &ids).await?);
            }
            println!("Added {} new articles", new_article_ids.len());

            if !new_article_ids.is_empty() && ctx.embedder.is_some() {
                tasks::compute_embeddings_batch(ctx, &new_article_ids).await?;
                println!("Embedding pass complete");
            }
        }
        Command::CleanEmbeddings => {
            let removed =
                repository::remove_old_embeddings(&ctx.pool, ctx.config.embedding_retention_days)
                    .await?;
            println!("Removed embeddings from {} articles", removed);
        }
        Command::FreezeUsers { days } => {
            let days = days.unwrap_or(ctx.config.dormant_threshold_days);
            let frozen = repository::freeze_dormant_users(&ctx.pool, days).await?;
            println!("Froze {} users dormant for more than {} days", frozen, days);
        }
        Command::Unfreeze { user } => {
            if repository::unfreeze_user(&ctx.pool, &user).await? {
                println!("Unfroze user {}", user);
            } else {
                println!("User {} was not frozen (or does not exist)", user);
            }
        }
        Command::CleanArticles { days } => {
            let days = days.unwrap_or(ctx.config.article_retention_days);
            let deleted = repository::cleanup_old_articles(&ctx.pool, days).await?;
            println!("Deleted {} unread articles older than {} days", deleted, days);
        }
        Command::CleanOrphans => {
            let article_links = repository::cleanup_orphan_user_article_links(&ctx.pool).await?;
            let feed_links = repository::cleanup_orphan_user_feed_links(&ctx.pool).await?;
            println!(
                "Deleted {} orphan user-article links, {} orphan user-feed links",
                article_links, feed_links
            );
        }
        Command::CleanUsers { days } => {
            let days = days.unwrap_or(ctx.config.inactive_user_days);
            let deleted = repository::cleanup_inactive_users(&ctx.pool, days).await?;
            println!("Deleted {} inactive users", deleted);
        }
        Command::Vacuum => {
            repository::vacuum_database(&ctx.pool).await?;
            println!("Database vacuumed and analyzed");
        }
        Command::Stats => {
            let stats = repository::get_database_stats(&ctx.pool).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Maintenance => {
            let summary = maintenance::run_full_maintenance(&ctx.pool, &ctx.config).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
