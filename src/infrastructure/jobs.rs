use crate::config::Config;
use crate::domain::embedding::Embedder;
use crate::domain::tasks;
use crate::infrastructure::fetcher::FeedFetcher;
use crate::infrastructure::repository::is_busy_error;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

/// Transient SQLite contention: retried with backoff without touching the
/// job's retry budget.
const BUSY_MAX_RETRIES: u32 = 3;
const BUSY_BASE_DELAY: Duration = Duration::from_millis(100);
const BUSY_MAX_DELAY: Duration = Duration::from_secs(2);

const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueName {
    High,
    Medium,
    Low,
    Gpu,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::High => "high",
            QueueName::Medium => "medium",
            QueueName::Low => "low",
            QueueName::Gpu => "gpu",
        }
    }

    /// Per-job execution ceiling; overrunning it is a terminal failure that
    /// consumes one retry.
    pub fn timeout(&self) -> Duration {
        match self {
            QueueName::High => Duration::from_secs(20),
            QueueName::Medium => Duration::from_secs(60),
            QueueName::Low => Duration::from_secs(180),
            QueueName::Gpu => Duration::from_secs(300),
        }
    }

    pub fn default_retries(&self) -> u32 {
        match self {
            QueueName::High => 2,
            _ => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Job {
    FetchFeedBatch(Vec<i64>),
    ComputeEmbeddings(Vec<i64>),
    LogUserAction {
        user_id: String,
        article_id: i64,
        link_url: String,
    },
    RecomputeUserClusters(String),
    FetchAllFeeds,
    RunFullMaintenance,
    RetryDisabledFeeds,
}

impl Job {
    fn describe(&self) -> String {
        match self {
            Job::FetchFeedBatch(ids) => format!("fetch_feed_batch({} feeds)", ids.len()),
            Job::ComputeEmbeddings(ids) => format!("compute_embeddings({} articles)", ids.len()),
            Job::LogUserAction { user_id, article_id, .. } => {
                format!("log_user_action({user_id}, {article_id})")
            }
            Job::RecomputeUserClusters(user_id) => format!("recompute_user_clusters({user_id})"),
            Job::FetchAllFeeds => "fetch_all_feeds".to_string(),
            Job::RunFullMaintenance => "run_full_maintenance".to_string(),
            Job::RetryDisabledFeeds => "retry_disabled_feeds".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed(String),
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed(_))
    }
}

/// Pollable view of a submitted job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: Uuid,
    status: watch::Receiver<JobStatus>,
}

impl JobHandle {
    pub fn poll(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    /// Poll at `interval` until the job finishes or `ceiling` elapses.
    /// Returns the last observed status either way.
    pub async fn wait(&self, interval: Duration, ceiling: Duration) -> JobStatus {
        let deadline = Instant::now() + ceiling;
        loop {
            let status = self.poll();
            if status.is_finished() || Instant::now() >= deadline {
                return status;
            }
            tokio::time::sleep(interval.min(deadline - Instant::now())).await;
        }
    }
}

pub(crate) struct QueuedJob {
    id: Uuid,
    pub(crate) job: Job,
    retries_left: u32,
    status: watch::Sender<JobStatus>,
}

/// Handles for submitting work onto the four queues.
#[derive(Clone)]
pub struct JobQueues {
    high: mpsc::UnboundedSender<QueuedJob>,
    medium: mpsc::UnboundedSender<QueuedJob>,
    low: mpsc::UnboundedSender<QueuedJob>,
    gpu: mpsc::UnboundedSender<QueuedJob>,
}

/// Receiving ends, consumed by [`start_workers`].
pub struct QueueReceivers {
    pub(crate) high: mpsc::UnboundedReceiver<QueuedJob>,
    pub(crate) medium: mpsc::UnboundedReceiver<QueuedJob>,
    pub(crate) low: mpsc::UnboundedReceiver<QueuedJob>,
    pub(crate) gpu: mpsc::UnboundedReceiver<QueuedJob>,
}

impl JobQueues {
    pub fn new() -> (Self, QueueReceivers) {
        let (high_tx, high_rx) = mpsc::unbounded_channel();
        let (medium_tx, medium_rx) = mpsc::unbounded_channel();
        let (low_tx, low_rx) = mpsc::unbounded_channel();
        let (gpu_tx, gpu_rx) = mpsc::unbounded_channel();

        (
            JobQueues {
                high: high_tx,
                medium: medium_tx,
                low: low_tx,
                gpu: gpu_tx,
            },
            QueueReceivers {
                high: high_rx,
                medium: medium_rx,
                low: low_rx,
                gpu: gpu_rx,
            },
        )
    }

    fn sender(&self, queue: QueueName) -> &mpsc::UnboundedSender<QueuedJob> {
        match queue {
            QueueName::High => &self.high,
            QueueName::Medium => &self.medium,
            QueueName::Low => &self.low,
            QueueName::Gpu => &self.gpu,
        }
    }

    pub fn enqueue(&self, queue: QueueName, job: Job) -> JobHandle {
        self.enqueue_with_retries(queue, job, queue.default_retries())
    }

    pub fn enqueue_with_retries(&self, queue: QueueName, job: Job, retries: u32) -> JobHandle {
        let id = Uuid::new_v4();
        let (status_tx, status_rx) = watch::channel(JobStatus::Pending);

        tracing::debug!("Enqueueing {} on {} queue", job.describe(), queue.as_str());

        let queued = QueuedJob {
            id,
            job,
            retries_left: retries,
            status: status_tx,
        };

        if let Err(err) = self.sender(queue).send(queued) {
            tracing::error!("{} queue is closed, dropping job", queue.as_str());
            let _ = err.0.status.send(JobStatus::Failed("queue closed".to_string()));
        }

        JobHandle { id, status: status_rx }
    }
}

/// Everything a worker needs to execute jobs. Built once at startup and
/// cloned into each worker task.
#[derive(Clone)]
pub struct JobContext {
    pub pool: SqlitePool,
    pub fetcher: Arc<FeedFetcher>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub config: Arc<Config>,
    pub queues: JobQueues,
}

/// Spawn one worker task per queue. Each worker executes one job at a time;
/// the single GPU worker is what serializes embedding work.
pub fn start_workers(ctx: JobContext, receivers: QueueReceivers) -> Vec<JoinHandle<()>> {
    vec![
        spawn_worker(ctx.clone(), QueueName::High, receivers.high),
        spawn_worker(ctx.clone(), QueueName::Medium, receivers.medium),
        spawn_worker(ctx.clone(), QueueName::Low, receivers.low),
        spawn_worker(ctx, QueueName::Gpu, receivers.gpu),
    ]
}

fn spawn_worker(
    ctx: JobContext,
    queue: QueueName,
    mut receiver: mpsc::UnboundedReceiver<QueuedJob>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("{} queue worker started", queue.as_str());
        while let Some(queued) = receiver.recv().await {
            run_job(&ctx, queue, queued).await;
        }
        tracing::info!("{} queue worker stopped", queue.as_str());
    })
}

fn is_busy(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<sqlx::Error>()
            .map(is_busy_error)
            .unwrap_or(false)
    })
}

fn backoff(base: Duration, cap: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(cap)
}

async fn run_job(ctx: &JobContext, queue: QueueName, mut queued: QueuedJob) {
    let description = queued.job.describe();
    let _ = queued.status.send(JobStatus::Running);

    let mut busy_attempts = 0u32;
    let mut retry_attempts = 0u32;
    loop {
        let outcome = tokio::time::timeout(queue.timeout(), execute_job(ctx, &queued.job)).await;

        let error = match outcome {
            Ok(Ok(())) => {
                tracing::debug!("Job {} ({}) done", queued.id, description);
                let _ = queued.status.send(JobStatus::Done);
                return;
            }
            Ok(Err(err)) => err,
            Err(_) => anyhow::anyhow!("timed out after {:?}", queue.timeout()),
        };

        // DB-busy retries are middleware-level: invisible to the retry
        // budget until they run out.
        if is_busy(&error) && busy_attempts < BUSY_MAX_RETRIES {
            let delay = backoff(BUSY_BASE_DELAY, BUSY_MAX_DELAY, busy_attempts);
            busy_attempts += 1;
            tracing::warn!(
                "Database busy on {} (attempt {}/{}), retrying in {:?}",
                description,
                busy_attempts,
                BUSY_MAX_RETRIES,
                delay
            );
            tokio::time::sleep(delay).await;
            continue;
        }

        if queued.retries_left > 0 {
            queued.retries_left -= 1;
            let delay = backoff(RETRY_BASE_DELAY, RETRY_MAX_DELAY, retry_attempts);
            retry_attempts += 1;
            tracing::warn!(
                "Job {} ({}) failed: {:#}; {} retries left, backing off {:?}",
                queued.id,
                description,
                error,
                queued.retries_left,
                delay
            );
            tokio::time::sleep(delay).await;
            continue;
        }

        tracing::error!("Job {} ({}) failed permanently: {:#}", queued.id, description, error);
        let _ = queued.status.send(JobStatus::Failed(format!("{error:#}")));
        return;
    }
}

async fn execute_job(ctx: &JobContext, job: &Job) -> anyhow::Result<()> {
    match job {
        Job::FetchFeedBatch(feed_ids) => tasks::fetch_feed_batch(ctx, feed_ids).await.map(|_| ()),
        Job::ComputeEmbeddings(article_ids) => tasks::compute_embeddings_batch(ctx, article_ids).await,
        Job::LogUserAction {
            user_id,
            article_id,
            link_url,
        } => tasks::log_user_action(ctx, user_id, *article_id, link_url).await,
        Job::RecomputeUserClusters(user_id) => tasks::recompute_user_clusters(ctx, user_id).await,
        Job::FetchAllFeeds => tasks::fetch_all_feeds(ctx).await,
        Job::RunFullMaintenance => tasks::run_full_maintenance_job(ctx).await,
        Job::RetryDisabledFeeds => tasks::retry_disabled_feeds(ctx).await,
    }
}
