use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::queue::parse_cron;
use crate::{
    EnqueueOpts, Job, JobId, JobQueue, QueueError, QueueName, QueuePolicy, QueueResult, QueueStats,
};

struct StoredJob {
    job: Job,
    run_at: DateTime<Utc>,
}

struct RepeatingEntry {
    queue: QueueName,
    job_name: String,
    schedule: cron::Schedule,
    payload: serde_json::Value,
    next_fire: Option<DateTime<Utc>>,
}

struct Inner {
    queues: RwLock<HashMap<QueueName, VecDeque<StoredJob>>>,
    repeating: RwLock<Vec<RepeatingEntry>>,
    stats: RwLock<QueueStats>,
    closed: AtomicBool,
}

impl Inner {
    fn push(&self, job: Job, run_at: DateTime<Utc>) {
        let mut queues = self.queues.write();
        queues
            .entry(job.queue)
            .or_default()
            .push_back(StoredJob { job, run_at });
    }

    /// Enqueue every repeating job whose fire time has passed and
    /// advance its schedule.
    fn materialize_due(&self) {
        let now = Utc::now();
        let mut due = Vec::new();
        {
            let mut repeating = self.repeating.write();
            for entry in repeating.iter_mut() {
                while let Some(fire) = entry.next_fire {
                    if fire > now {
                        break;
                    }
                    due.push((entry.queue, entry.job_name.clone(), entry.payload.clone()));
                    entry.next_fire = entry.schedule.after(&fire).next();
                }
            }
        }

        for (queue, job_name, payload) in due {
            let policy = QueuePolicy::defaults_for(queue);
            let job = Job {
                id: JobId::new(),
                queue,
                job_name,
                payload,
                attempt_count: 0,
                max_attempts: policy.attempts,
                backoff_base_ms: policy.backoff_base.map(|d| d.as_millis() as u64),
            };
            debug!(queue = %queue, job = %job.job_name, "repeating job fired");
            self.push(job, now);
        }
    }
}

/// In-memory queue backend for testing and single-node development.
///
/// A ticker task materializes cron repeating jobs and makes retried
/// jobs eligible once their backoff elapses. `close` stops the ticker
/// and refuses further enqueues; the in-memory transport has nothing
/// slower to force-disconnect.
pub struct MemoryJobQueue {
    inner: Arc<Inner>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        let inner = Arc::new(Inner {
            queues: RwLock::new(HashMap::new()),
            repeating: RwLock::new(Vec::new()),
            stats: RwLock::new(QueueStats::default()),
            closed: AtomicBool::new(false),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(200));
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if inner.closed.load(Ordering::SeqCst) {
                    break;
                }
                inner.materialize_due();
            }
        });

        Self {
            inner,
            ticker: Mutex::new(Some(ticker)),
        }
    }

    fn ensure_open(&self) -> QueueResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn upsert_repeating(
        &self,
        queue: QueueName,
        job_name: &str,
        cron_pattern: &str,
        payload: serde_json::Value,
    ) -> QueueResult<()> {
        self.ensure_open()?;
        let schedule = parse_cron(cron_pattern)?;
        let next_fire = schedule.after(&Utc::now()).next();

        let mut repeating = self.inner.repeating.write();
        repeating.retain(|e| !(e.queue == queue && e.job_name == job_name));
        repeating.push(RepeatingEntry {
            queue,
            job_name: job_name.to_string(),
            schedule,
            payload,
            next_fire,
        });
        debug!(queue = %queue, job = job_name, pattern = cron_pattern, "registered repeating job");
        Ok(())
    }

    async fn enqueue(
        &self,
        queue: QueueName,
        job_name: &str,
        payload: serde_json::Value,
        opts: EnqueueOpts,
    ) -> QueueResult<JobId> {
        self.ensure_open()?;
        let id = JobId::new();
        let job = Job {
            id: id.clone(),
            queue,
            job_name: job_name.to_string(),
            payload,
            attempt_count: 0,
            max_attempts: opts.attempts.max(1),
            backoff_base_ms: opts.backoff.map(|d| d.as_millis() as u64),
        };
        let run_at = Utc::now()
            + chrono::Duration::from_std(opts.delay.unwrap_or_default())
                .unwrap_or_else(|_| chrono::Duration::zero());
        self.inner.push(job, run_at);
        Ok(id)
    }

    async fn dequeue(&self, queue: QueueName) -> QueueResult<Option<Job>> {
        let now = Utc::now();
        let mut queues = self.inner.queues.write();
        let Some(pending) = queues.get_mut(&queue) else {
            return Ok(None);
        };

        // First eligible wins; later jobs keep their FIFO position.
        let index = pending.iter().position(|stored| stored.run_at <= now);
        Ok(index.map(|index| {
            let mut stored = pending.remove(index).expect("index from position");
            stored.job.attempt_count += 1;
            stored.job
        }))
    }

    async fn ack_success(&self, job: &Job) -> QueueResult<()> {
        self.inner.stats.write().for_queue_mut(job.queue).completed += 1;
        Ok(())
    }

    async fn ack_failure(&self, job: &Job, error: String) -> QueueResult<()> {
        if job.attempt_count < job.max_attempts {
            let backoff = job
                .backoff_base()
                .map(|base| base * 2u32.saturating_pow(job.attempt_count.saturating_sub(1)))
                .unwrap_or_default();
            let run_at = Utc::now()
                + chrono::Duration::from_std(backoff).unwrap_or_else(|_| chrono::Duration::zero());
            warn!(
                queue = %job.queue,
                job = %job.job_name,
                attempt = job.attempt_count,
                error = %error,
                "job failed, retrying"
            );
            self.inner.push(job.clone(), run_at);
        } else {
            warn!(
                queue = %job.queue,
                job = %job.job_name,
                attempt = job.attempt_count,
                error = %error,
                "job failed permanently"
            );
            self.inner.stats.write().for_queue_mut(job.queue).failed += 1;
        }
        Ok(())
    }

    async fn close(&self) -> QueueResult<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Some(ticker) = self.ticker.lock().take() {
            ticker.abort();
        }
        Ok(())
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let mut stats = self.inner.stats.read().clone();
        let queues = self.inner.queues.read();
        let repeating = self.inner.repeating.read();
        for queue in QueueName::ALL {
            let snapshot = stats.for_queue_mut(queue);
            snapshot.queued = queues.get(&queue).map(VecDeque::len).unwrap_or(0);
            snapshot.repeating = repeating.iter().filter(|e| e.queue == queue).count();
        }
        Ok(stats)
    }
}
