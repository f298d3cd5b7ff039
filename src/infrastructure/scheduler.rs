use crate::infrastructure::jobs::{Job, JobContext, QueueName};
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};

/// Start the periodic scheduler: hourly feed refresh, nightly maintenance,
/// weekly revival of disabled feeds. Each tick just enqueues onto the low
/// queue; the workers do the actual work.
pub async fn start_scheduler(ctx: JobContext) -> Result<JobScheduler, Box<dyn std::error::Error>> {
    let scheduler = JobScheduler::new().await?;

    // Fetch all active feeds every hour
    let fetch_ctx = ctx.clone();
    scheduler
        .add(CronJob::new_async("0 0 * * * *", move |_uuid, _lock| {
            let ctx = fetch_ctx.clone();
            Box::pin(async move {
                tracing::info!("Scheduler: enqueueing fetch_all_feeds");
                ctx.queues.enqueue(QueueName::Low, Job::FetchAllFeeds);
            })
        })?)
        .await?;

    // Full maintenance daily at 04:00 UTC
    let maintenance_ctx = ctx.clone();
    scheduler
        .add(CronJob::new_async("0 0 4 * * *", move |_uuid, _lock| {
            let ctx = maintenance_ctx.clone();
            Box::pin(async move {
                tracing::info!("Scheduler: enqueueing run_full_maintenance");
                ctx.queues.enqueue(QueueName::Low, Job::RunFullMaintenance);
            })
        })?)
        .await?;

    // Retry disabled feeds weekly on Sunday at 03:00 UTC
    let retry_ctx = ctx;
    scheduler
        .add(CronJob::new_async("0 0 3 * * Sun", move |_uuid, _lock| {
            let ctx = retry_ctx.clone();
            Box::pin(async move {
                tracing::info!("Scheduler: enqueueing retry_disabled_feeds");
                ctx.queues.enqueue(QueueName::Low, Job::RetryDisabledFeeds);
            })
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!("Periodic scheduler started (hourly fetch, daily maintenance, weekly feed retry)");

    Ok(scheduler)
}
