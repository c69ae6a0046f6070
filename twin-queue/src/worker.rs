use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::{Job, JobQueue, QueueError, QueueName, QueuePolicy, QueueResult, RateLimit};

/// What a worker does with a dequeued job. Errors bubble back to the
/// queue, which applies the job's retry policy.
pub type JobHandler =
    Arc<dyn Fn(Job) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Rolling-window limiter on job starts.
struct RateLimiter {
    limit: RateLimit,
    stamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            stamps: Mutex::new(VecDeque::new()),
        }
    }

    /// None when a start is allowed now, else how long until the window
    /// frees up.
    fn check_delay(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut stamps = self.stamps.lock();
        while let Some(front) = stamps.front() {
            if now.duration_since(*front) >= self.limit.per {
                stamps.pop_front();
            } else {
                break;
            }
        }
        if (stamps.len() as u32) < self.limit.max {
            None
        } else {
            stamps
                .front()
                .map(|front| (*front + self.limit.per).saturating_duration_since(now))
        }
    }

    fn record(&self) {
        self.stamps.lock().push_back(Instant::now());
    }
}

/// Handle for managing worker lifecycle
pub struct WorkerHandle {
    queue_name: QueueName,
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Gracefully shut the worker down: stop dequeuing, then wait for
    /// in-flight jobs to finish.
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(());
        self.join_handle
            .await
            .map_err(|e| QueueError::internal(format!("worker join error: {e}")))
    }

    pub fn queue_name(&self) -> QueueName {
        self.queue_name
    }
}

/// Worker pool over one queue: dequeues eligible jobs and runs them
/// through the handler at the policy's concurrency and start rate.
pub struct Worker;

impl Worker {
    pub fn start(
        queue: Arc<dyn JobQueue>,
        queue_name: QueueName,
        policy: QueuePolicy,
        handler: JobHandler,
    ) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join_handle = tokio::spawn(run(queue, queue_name, policy, handler, shutdown_rx));
        info!(queue = %queue_name, "worker started");
        WorkerHandle {
            queue_name,
            shutdown_tx,
            join_handle,
        }
    }
}

async fn run(
    queue: Arc<dyn JobQueue>,
    queue_name: QueueName,
    policy: QueuePolicy,
    handler: JobHandler,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let concurrency = policy.concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let limiter = policy.rate_limit.map(RateLimiter::new);

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!(queue = %queue_name, "worker shutdown requested");
                break;
            }
            _ = process_next(&queue, queue_name, &semaphore, limiter.as_ref(), &handler) => {}
        }
    }

    // Wait for in-flight jobs: all permits come back when their tasks
    // finish.
    let _ = semaphore.acquire_many(concurrency as u32).await;
    info!(queue = %queue_name, "worker stopped");
}

async fn process_next(
    queue: &Arc<dyn JobQueue>,
    queue_name: QueueName,
    semaphore: &Arc<Semaphore>,
    limiter: Option<&RateLimiter>,
    handler: &JobHandler,
) {
    // Rate gate before dequeuing so a throttled job keeps its place.
    if let Some(limiter) = limiter {
        if let Some(delay) = limiter.check_delay() {
            tokio::time::sleep(delay.min(Duration::from_millis(200))).await;
            return;
        }
    }

    let job = match queue.dequeue(queue_name).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return;
        }
        Err(e) => {
            error!(queue = %queue_name, error = %e, "dequeue failed");
            tokio::time::sleep(Duration::from_secs(1)).await;
            return;
        }
    };

    let permit = semaphore
        .clone()
        .acquire_owned()
        .await
        .expect("worker semaphore closed");
    if let Some(limiter) = limiter {
        limiter.record();
    }

    let queue = queue.clone();
    let handler = handler.clone();
    tokio::spawn(async move {
        let _permit = permit;
        debug!(queue = %job.queue, job = %job.job_name, attempt = job.attempt_count, "processing job");
        let result = handler(job.clone()).await;
        let ack = match result {
            Ok(()) => queue.ack_success(&job).await,
            Err(e) => queue.ack_failure(&job, e.to_string()).await,
        };
        if let Err(e) = ack {
            error!(queue = %job.queue, job = %job.job_name, error = %e, "ack failed");
        }
    });
}
