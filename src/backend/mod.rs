//! Pluggable queue backend abstraction.
//!
//! Every queue producer talks to its broker only through this trait, so
//! the rest of the pool never has to know whether jobs are sitting in an
//! in-memory `VecDeque` or a durable AMQP queue.

pub mod memory;
pub mod amqp;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{AckToken, Job, QueueArgs, QueueStatus};

/// A caller-supplied predicate over a queued job, used by `filter`.
/// Boxed rather than generic since it crosses the `QueueBackend` trait
/// object boundary.
pub type JobPredicate = Box<dyn Fn(&Job) -> bool + Send + Sync>;

/// A job pulled off the backend, plus the credentials needed to settle it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub job: Job,
    pub ack: AckToken,
}

/// Static facts about a backend connection, surfaced for diagnostics.
#[derive(Debug, Clone)]
pub struct BackendInfo {
    pub kind: &'static str,
    pub connected: bool,
}

/// The contract a queue producer drives to move jobs in and out of
/// durable storage.
///
/// Implementations are expected to be cheaply cloneable handles around a
/// shared connection, mirroring how a real broker client is used: one
/// logical connection, many channels/consumers layered over it.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Ensures the named queue exists with the given arguments. Must be
    /// idempotent — called once per queue producer on startup and again
    /// on every reconnect.
    async fn declare(&self, args: &QueueArgs) -> Result<()>;

    /// Publishes a job onto the named queue.
    async fn publish(&self, queue: &str, job: &Job) -> Result<()>;

    /// Pulls at most one job off the queue without blocking. Returns
    /// `None` if the queue is empty.
    async fn poll(&self, queue: &str) -> Result<Option<Delivery>>;

    /// Registers standing demand for deliveries, up to `prefetch` jobs
    /// in flight at a time. Returns a consumer tag identifying the
    /// subscription (for `cancel`) plus the channel pushed deliveries
    /// arrive on. The queue producer owns draining this channel; a
    /// delivery that arrives with no outstanding demand must be nacked
    /// with `redeliver=true` rather than buffered.
    async fn subscribe(&self, queue: &str, prefetch: u16) -> Result<(String, mpsc::UnboundedReceiver<Delivery>)>;

    /// Cancels a subscription previously returned by `subscribe`.
    async fn cancel(&self, consumer_tag: &str) -> Result<()>;

    /// Best-effort snapshot of ready jobs matching `predicate`. Backends
    /// that cannot inspect queued messages without consuming them (most
    /// brokers) may return an empty list; this is explicitly a snapshot,
    /// not a live view, and never includes in-flight jobs.
    async fn filter(&self, queue: &str, predicate: &JobPredicate) -> Result<Vec<Job>>;

    /// Acknowledges successful processing of a delivered job.
    async fn ack(&self, token: &AckToken) -> Result<()>;

    /// Rejects a delivered job. `requeue` controls whether the broker
    /// should make it available for redelivery or drop it.
    async fn reject(&self, token: &AckToken, requeue: bool) -> Result<()>;

    /// Current depth/suspension state of the named queue, where the
    /// backend can report it.
    async fn status(&self, queue: &str) -> Result<QueueStatus>;

    /// Static connection info, for logging and health checks.
    fn info(&self) -> BackendInfo;
}
