use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The four queues the framework runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Collectors,
    Harvesters,
    Priority,
    Uploads,
}

impl QueueName {
    pub const ALL: [QueueName; 4] = [
        QueueName::Collectors,
        QueueName::Harvesters,
        QueueName::Priority,
        QueueName::Uploads,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Collectors => "collectors",
            QueueName::Harvesters => "harvesters",
            QueueName::Priority => "priority",
            QueueName::Uploads => "uploads",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An in-flight unit of work handed to a worker. Retry settings travel
/// with the job so the queue can reschedule a failure without a
/// registry lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: QueueName,
    /// Dispatch key; the scheduler keys jobs by component name.
    pub job_name: String,
    pub payload: serde_json::Value,
    /// 1-based; incremented by the queue on each dequeue.
    pub attempt_count: u32,
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts.
    pub backoff_base_ms: Option<u64>,
}

impl Job {
    pub fn backoff_base(&self) -> Option<Duration> {
        self.backoff_base_ms.map(Duration::from_millis)
    }
}

/// Options for a one-shot enqueue.
#[derive(Debug, Clone)]
pub struct EnqueueOpts {
    pub attempts: u32,
    pub backoff: Option<Duration>,
    pub delay: Option<Duration>,
}

impl Default for EnqueueOpts {
    fn default() -> Self {
        Self {
            attempts: 1,
            backoff: None,
            delay: None,
        }
    }
}

impl EnqueueOpts {
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff = Some(base);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// One-shot options matching a queue's retention policy.
    pub fn from_policy(policy: &QueuePolicy) -> Self {
        Self {
            attempts: policy.attempts,
            backoff: policy.backoff_base,
            delay: None,
        }
    }
}

/// Start-rate cap for a worker pool: at most `max` job starts per
/// rolling `per` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max: u32,
    pub per: Duration,
}

/// Per-queue worker and retention policy.
#[derive(Debug, Clone)]
pub struct QueuePolicy {
    pub concurrency: usize,
    pub rate_limit: Option<RateLimit>,
    pub attempts: u32,
    pub backoff_base: Option<Duration>,
}

impl QueuePolicy {
    /// The framework defaults per queue.
    pub fn defaults_for(queue: QueueName) -> Self {
        match queue {
            QueueName::Collectors => Self {
                concurrency: 5,
                rate_limit: Some(RateLimit {
                    max: 10,
                    per: Duration::from_secs(60),
                }),
                attempts: 3,
                backoff_base: Some(Duration::from_secs(2)),
            },
            QueueName::Harvesters => Self {
                concurrency: 3,
                rate_limit: Some(RateLimit {
                    max: 20,
                    per: Duration::from_secs(60),
                }),
                attempts: 5,
                backoff_base: Some(Duration::from_secs(5)),
            },
            QueueName::Priority => Self {
                concurrency: 1,
                rate_limit: None,
                attempts: 2,
                backoff_base: None,
            },
            QueueName::Uploads => Self {
                concurrency: 2,
                rate_limit: Some(RateLimit {
                    max: 5,
                    per: Duration::from_secs(60),
                }),
                attempts: 1,
                backoff_base: None,
            },
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

/// Point-in-time counters for one queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub queued: usize,
    pub repeating: usize,
    pub completed: u64,
    pub failed: u64,
}

/// Counters for all queues, keyed in `QueueName::ALL` order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub collectors: QueueSnapshot,
    pub harvesters: QueueSnapshot,
    pub priority: QueueSnapshot,
    pub uploads: QueueSnapshot,
}

impl QueueStats {
    pub fn for_queue(&self, queue: QueueName) -> &QueueSnapshot {
        match queue {
            QueueName::Collectors => &self.collectors,
            QueueName::Harvesters => &self.harvesters,
            QueueName::Priority => &self.priority,
            QueueName::Uploads => &self.uploads,
        }
    }

    pub fn for_queue_mut(&mut self, queue: QueueName) -> &mut QueueSnapshot {
        match queue {
            QueueName::Collectors => &mut self.collectors,
            QueueName::Harvesters => &mut self.harvesters,
            QueueName::Priority => &mut self.priority,
            QueueName::Uploads => &mut self.uploads,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_table_matches_the_defaults() {
        let collectors = QueuePolicy::defaults_for(QueueName::Collectors);
        assert_eq!(collectors.concurrency, 5);
        assert_eq!(collectors.attempts, 3);
        assert_eq!(collectors.rate_limit.unwrap().max, 10);

        let priority = QueuePolicy::defaults_for(QueueName::Priority);
        assert_eq!(priority.concurrency, 1);
        assert!(priority.rate_limit.is_none());

        let uploads = QueuePolicy::defaults_for(QueueName::Uploads);
        assert_eq!(uploads.attempts, 1);
    }
}
