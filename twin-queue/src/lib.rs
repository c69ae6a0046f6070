//! # twin-queue: job queues for TwinRS
//!
//! Four named queues drive the framework: collectors, harvesters,
//! priority, and uploads, each with its own concurrency, start-rate,
//! and retry policy. Producers register cron repeating jobs or enqueue
//! one-shots; [`Worker`] pools consume them and report failures back to
//! the queue, which applies the retry policy.
//!
//! The crate ships the in-memory backend. Durable transports (Redis
//! and friends) implement [`JobQueue`] out of tree.

mod error;
mod memory;
pub mod queue;
mod types;
pub mod worker;

pub use error::{QueueError, QueueResult};
pub use memory::MemoryJobQueue;
pub use queue::{parse_cron, JobQueue};
pub use types::{
    EnqueueOpts, Job, JobId, QueueName, QueuePolicy, QueueSnapshot, QueueStats, RateLimit,
};
pub use worker::{JobHandler, Worker, WorkerHandle};
