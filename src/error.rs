//! Error types for honeyqueue

use thiserror::Error;

/// Errors that can occur anywhere in the job pool
#[derive(Debug, Error)]
pub enum JobError {
    /// Backend connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Backend-specific protocol error
    #[error("Backend error: {0}")]
    Backend(String),

    /// Publish failure
    #[error("Failed to publish job to queue '{queue}': {reason}")]
    Publish { queue: String, reason: String },

    /// Subscribe failure
    #[error("Failed to subscribe to queue '{queue}': {reason}")]
    Subscribe { queue: String, reason: String },

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A pool, queue, monitor, or job was not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Consumer/subscription creation or management error
    #[error("Consumer error: {0}")]
    Consumer(String),

    /// Acknowledgement failure
    #[error("Failed to acknowledge job: {0}")]
    Ack(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// `await_result` called by an identity other than `job.from.owner`
    #[error("Owner mismatch: job belongs to a different submitter")]
    OwnerMismatch,

    /// User worker module `init` failed
    #[error("Worker init failed: {0}")]
    WorkerInit(String),

    /// User task panicked or otherwise crashed the worker
    #[error("Worker crashed: {0}")]
    WorkerCrashed(String),
}

/// Result type alias for job pool operations
pub type Result<T> = std::result::Result<T, JobError>;
