use clap::Parser;
use feedlens::api::{self, AppState};
use feedlens::cli::{Cli, Command};
use feedlens::config::Config;
use feedlens::domain::embedding::{Embedder, RemoteEmbedder};
use feedlens::infrastructure::database::setup_database;
use feedlens::infrastructure::fetcher::FeedFetcher;
use feedlens::infrastructure::jobs::{self, JobContext, JobQueues, QueueReceivers};
use feedlens::infrastructure::rewriter::TrackerUrls;
use feedlens::infrastructure::scheduler;
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Default to info level in production; use RUST_LOG env var to override
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedlens=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    tracing::info!("Connecting to database: {}", config.database_url);
    let pool = setup_database(&config.database_url).await?;

    tracing::info!("Running database migrations");
    sqlx::migrate!().run(&pool).await?;
    tracing::info!("Migrations complete");

    let fetcher = Arc::new(FeedFetcher::new(&config.egress_mode())?);
    let embedder: Option<Arc<dyn Embedder>> = config
        .embedding_api_url
        .as_deref()
        .map(|url| Arc::new(RemoteEmbedder::new(url)) as Arc<dyn Embedder>);
    if embedder.is_none() {
        tracing::warn!("EMBEDDING_API_URL not set; personalization will stay in date order");
    }

    let (queues, receivers) = JobQueues::new();
    let ctx = JobContext {
        pool,
        fetcher,
        embedder,
        config: Arc::new(config.clone()),
        queues,
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, ctx, receivers).await,
        command => Ok(feedlens::cli::run_command(command, &ctx).await?),
    }
}

async fn serve(
    config: Config,
    ctx: JobContext,
    receivers: QueueReceivers,
) -> Result<(), Box<dyn std::error::Error>> {
    // Queue workers: one task per queue, jobs run one at a time per worker
    let _workers = jobs::start_workers(ctx.clone(), receivers);

    tracing::info!("Starting periodic scheduler");
    let _scheduler = scheduler::start_scheduler(ctx.clone()).await?;

    let state = AppState {
        ctx,
        urls: TrackerUrls::new(&config.api_base_url, &config.root_path),
    };

    let app = api::build_router(state)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http());

    let bind_addr = format!("{}:{}", config.host, config.port);
    tracing::info!("feedlens server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
