use async_trait::async_trait;

use crate::{EnqueueOpts, Job, JobId, QueueName, QueueResult, QueueStats};

/// Queue abstraction: producers register repeating cron jobs and
/// one-shot jobs; worker pools consume through `dequeue` and the acks.
///
/// Failure handling lives behind `ack_failure`: the backend reschedules
/// the job with the exponential backoff carried on it while attempts
/// remain, and marks it failed otherwise.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Register (or replace) a repeating job keyed by `(queue,
    /// job_name)` firing on the cron pattern. Patterns may carry five
    /// fields (minute-resolution) or six (with a leading seconds
    /// field).
    async fn upsert_repeating(
        &self,
        queue: QueueName,
        job_name: &str,
        cron_pattern: &str,
        payload: serde_json::Value,
    ) -> QueueResult<()>;

    /// Enqueue a one-shot job.
    async fn enqueue(
        &self,
        queue: QueueName,
        job_name: &str,
        payload: serde_json::Value,
        opts: EnqueueOpts,
    ) -> QueueResult<JobId>;

    /// Pop the next eligible job, incrementing its attempt count.
    async fn dequeue(&self, queue: QueueName) -> QueueResult<Option<Job>>;

    async fn ack_success(&self, job: &Job) -> QueueResult<()>;

    async fn ack_failure(&self, job: &Job, error: String) -> QueueResult<()>;

    /// Stop repeating jobs and refuse further enqueues. Idempotent.
    async fn close(&self) -> QueueResult<()>;

    async fn stats(&self) -> QueueResult<QueueStats>;
}

/// Normalize a cron pattern for the `cron` crate, which expects a
/// seconds field: classic five-field patterns get `0` prepended.
pub fn parse_cron(pattern: &str) -> QueueResult<cron::Schedule> {
    use std::str::FromStr;

    let fields = pattern.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {pattern}")
    } else {
        pattern.to_string()
    };

    cron::Schedule::from_str(&normalized)
        .map_err(|e| crate::QueueError::invalid_cron(pattern, e.to_string()))
}
