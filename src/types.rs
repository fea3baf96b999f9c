//! Core job and pool types
//!
//! All wire types use camelCase JSON serialization, following the same
//! convention the rest of this codebase's payload formats use.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a submitter, used to guard `await_result` against
/// cross-owner reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The reply address a job carries when the submitter expects a result.
///
/// Only `owner` may `await_result` on the job this address is attached to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyAddress {
    pub owner: OwnerId,
    pub request_id: uuid::Uuid,
}

impl ReplyAddress {
    pub fn new(owner: OwnerId) -> Self {
        Self {
            owner,
            request_id: uuid::Uuid::new_v4(),
        }
    }
}

/// The callable unit of work a job carries.
///
/// `Method`/`MethodArgs` address a named operation on the pool's
/// `WorkerModule` — jobs travel across the wire, so the task can't be a
/// closure; it names what to call and carries its JSON arguments instead.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Task {
    /// Invoke a named method on the worker module with no arguments.
    Method { method: String },
    /// Invoke a named method on the worker module with positional
    /// JSON arguments.
    MethodArgs {
        method: String,
        args: Vec<serde_json::Value>,
    },
}

impl Task {
    pub fn method(name: impl Into<String>) -> Self {
        Task::Method { method: name.into() }
    }

    pub fn method_args(name: impl Into<String>, args: Vec<serde_json::Value>) -> Self {
        Task::MethodArgs {
            method: name.into(),
            args,
        }
    }

    pub fn method_name(&self) -> &str {
        match self {
            Task::Method { method } => method,
            Task::MethodArgs { method, .. } => method,
        }
    }

    pub fn args(&self) -> &[serde_json::Value] {
        match self {
            Task::Method { .. } => &[],
            Task::MethodArgs { args, .. } => args,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.method_name())
    }
}

/// Backend-specific credentials needed to ack/nack a delivered job.
///
/// Opaque to every component except the queue producer and the backend
/// that issued it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckToken {
    pub delivery_tag: u64,
}

/// A single unit of work moving through the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: uuid::Uuid,
    pub task: Task,

    /// Present iff the submitter expects a reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ReplyAddress>,

    /// Filled in after the worker executes the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,

    /// Stamped with the processing node's identity when a monitor accepts
    /// the job for dispatch to its worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by: Option<String>,

    /// Backend ack credentials, attached when the job is delivered from
    /// the backend. Not present on a freshly constructed job.
    #[serde(skip)]
    pub private: Option<AckToken>,
}

impl Job {
    pub fn new(task: Task) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            task,
            from: None,
            result: None,
            by: None,
            private: None,
        }
    }

    pub fn with_reply(task: Task, owner: OwnerId) -> Self {
        Self {
            from: Some(ReplyAddress::new(owner)),
            ..Self::new(task)
        }
    }
}

/// The outcome of executing a job's task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum JobResult {
    Ok { value: serde_json::Value },
    Err { message: String },
}

/// A pool identifier: a bare local name, or a `(global, name)` pair that
/// is additionally visible cluster-wide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "camelCase")]
pub enum PoolId {
    Local { name: String },
    Global { name: String },
}

impl PoolId {
    pub fn local(name: impl Into<String>) -> Self {
        PoolId::Local { name: name.into() }
    }

    pub fn global(name: impl Into<String>) -> Self {
        PoolId::Global { name: name.into() }
    }

    pub fn name(&self) -> &str {
        match self {
            PoolId::Local { name } | PoolId::Global { name } => name,
        }
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolId::Local { name } => write!(f, "{}", name),
            PoolId::Global { name } => write!(f, "global:{}", name),
        }
    }
}

/// The three named groups every pool maintains in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Queues,
    WorkerMonitors,
    Workers,
}

/// Lookup scope for registry queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Only participants on this node.
    Local,
    /// Participants across the cluster (only meaningful for `PoolId::Global`).
    Cluster,
}

/// Snapshot of a queue producer's backend-reported state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub depth: u64,
    pub suspended: bool,
}

/// Snapshot of a pool's overall state, returned by `status(pool)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub queue: QueueStatus,
    pub workers_total: usize,
    pub workers_busy: usize,
}

/// Per-pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub pool: PoolId,
    pub num_queues: usize,
    pub num_workers: usize,
    pub init_retry_secs: u64,
    pub queue_args: QueueArgs,
}

impl PoolConfig {
    pub fn new(pool: PoolId) -> Self {
        Self {
            pool,
            num_queues: 1,
            num_workers: 1,
            init_retry_secs: 5,
            queue_args: QueueArgs::default(),
        }
    }

    pub fn with_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn with_queues(mut self, n: usize) -> Self {
        self.num_queues = n;
        self
    }

    pub fn with_init_retry_secs(mut self, secs: u64) -> Self {
        self.init_retry_secs = secs;
        self
    }
}

/// Backend-facing queue configuration shared by every producer in a pool.
#[derive(Debug, Clone)]
pub struct QueueArgs {
    pub queue_name: String,
    pub durable: bool,
    pub exchange: String,
    pub prefetch: u16,
}

impl Default for QueueArgs {
    fn default() -> Self {
        Self {
            queue_name: "honeyqueue.jobs".to_string(),
            durable: true,
            exchange: String::new(),
            prefetch: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_method_name_and_args() {
        let t = Task::method("noop");
        assert_eq!(t.method_name(), "noop");
        assert!(t.args().is_empty());

        let t = Task::method_args("add", vec![serde_json::json!(1), serde_json::json!(2)]);
        assert_eq!(t.method_name(), "add");
        assert_eq!(t.args().len(), 2);
    }

    #[test]
    fn test_job_new_has_no_reply() {
        let job = Job::new(Task::method("noop"));
        assert!(job.from.is_none());
        assert!(job.result.is_none());
        assert!(job.by.is_none());
    }

    #[test]
    fn test_job_with_reply_owner_matches() {
        let owner = OwnerId::new("submitter-1");
        let job = Job::with_reply(Task::method("noop"), owner.clone());
        assert_eq!(job.from.unwrap().owner, owner);
    }

    #[test]
    fn test_pool_id_display() {
        assert_eq!(PoolId::local("p1").to_string(), "p1");
        assert_eq!(PoolId::global("p1").to_string(), "global:p1");
    }

    #[test]
    fn test_job_serialization_roundtrip() {
        let job = Job::new(Task::method_args("mul", vec![serde_json::json!(3)]));
        let json = serde_json::to_string(&job).unwrap();
        let parsed: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, job.id);
        assert_eq!(parsed.task.method_name(), "mul");
    }

    #[test]
    fn test_job_result_serialization() {
        let ok = JobResult::Ok {
            value: serde_json::json!(42),
        };
        let json = serde_json::to_string(&ok).unwrap();
        assert!(json.contains("\"outcome\":\"ok\""));

        let err = JobResult::Err {
            message: "boom".to_string(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"outcome\":\"err\""));
    }

    #[test]
    fn test_pool_config_builder() {
        let cfg = PoolConfig::new(PoolId::local("p1"))
            .with_workers(4)
            .with_queues(2)
            .with_init_retry_secs(10);
        assert_eq!(cfg.num_workers, 4);
        assert_eq!(cfg.num_queues, 2);
        assert_eq!(cfg.init_retry_secs, 10);
    }

    #[test]
    fn test_queue_args_default() {
        let args = QueueArgs::default();
        assert!(args.durable);
        assert_eq!(args.prefetch, 10);
    }
}
