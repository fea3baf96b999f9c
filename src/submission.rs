//! Submission API: the facade callers use to hand work to a pool and,
//! optionally, wait for its result.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::instrument;
use uuid::Uuid;

use crate::backend::JobPredicate;
use crate::error::{JobError, Result};
use crate::metrics::PoolMetrics;
use crate::queue::QueueHandle;
use crate::types::{Job, JobResult, OwnerId, PoolStatus, QueueArgs, Task};

/// Reverse index from `request_id` to the waiter expecting its result.
/// Lives for as long as the pool does; entries are removed once claimed,
/// once the submitter gives up, or once `await_result` times out.
struct ReplyTable {
    owners: HashMap<Uuid, OwnerId>,
    waiters: HashMap<Uuid, oneshot::Sender<JobResult>>,
}

impl ReplyTable {
    fn new() -> Self {
        Self {
            owners: HashMap::new(),
            waiters: HashMap::new(),
        }
    }
}

/// Caller-facing handle for one pool: round-robins submissions across its
/// queues and matches replies back to the submitter that asked for one.
#[derive(Clone)]
pub struct Pool {
    queues: Vec<QueueHandle>,
    next_queue: Arc<std::sync::atomic::AtomicUsize>,
    reply_table: Arc<Mutex<ReplyTable>>,
    queue_args: QueueArgs,
    metrics: Arc<PoolMetrics>,
}

impl Pool {
    /// Wraps a set of already-spawned queue producers into a submission
    /// facade. `reply_rx` is fed by every worker monitor attached to
    /// these queues.
    pub fn new(
        queues: Vec<QueueHandle>,
        queue_args: QueueArgs,
        mut reply_rx: mpsc::UnboundedReceiver<(Uuid, JobResult)>,
        metrics: Arc<PoolMetrics>,
    ) -> Self {
        let reply_table = Arc::new(Mutex::new(ReplyTable::new()));
        let table_for_task = reply_table.clone();

        tokio::spawn(async move {
            while let Some((request_id, result)) = reply_rx.recv().await {
                let mut table = table_for_task.lock().await;
                table.owners.remove(&request_id);
                if let Some(waiter) = table.waiters.remove(&request_id) {
                    let _ = waiter.send(result);
                }
            }
        });

        Self {
            queues,
            next_queue: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            reply_table,
            queue_args,
            metrics,
        }
    }

    fn pick_queue(&self) -> &QueueHandle {
        let i = self
            .next_queue
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            % self.queues.len();
        &self.queues[i]
    }

    /// Enqueues `task` with no reply expected. Fire-and-forget.
    #[instrument(skip(self, task))]
    pub async fn submit_no_reply(&self, task: Task) -> Result<Uuid> {
        let job = Job::new(task);
        let id = job.id;
        self.pick_queue().enqueue(job).await?;
        Ok(id)
    }

    /// Enqueues `task` on behalf of `owner` and returns a request id that
    /// only `owner` may later resolve with `await_result`.
    #[instrument(skip(self, task, owner))]
    pub async fn submit(&self, owner: OwnerId, task: Task) -> Result<Uuid> {
        let job = Job::with_reply(task, owner.clone());
        let request_id = job.from.as_ref().expect("just constructed with_reply").request_id;

        {
            let mut table = self.reply_table.lock().await;
            table.owners.insert(request_id, owner);
        }

        self.pick_queue().enqueue(job).await?;
        Ok(request_id)
    }

    /// Waits up to `timeout` for the job identified by `request_id` to
    /// complete. Returns `Ok(None)` if nothing arrived in time — a
    /// crashed worker never sends a reply, so a timed-out job shows up
    /// here rather than as an error. A reply that arrives after the
    /// timeout finds its waiter entry already gone and is silently
    /// dropped; the owner/waiter bookkeeping for this request is removed
    /// either way so a late reply can't leak an entry forever.
    ///
    /// Returns `JobError::OwnerMismatch` if `owner` didn't submit it, or
    /// `JobError::NotFound` if no such request is outstanding.
    #[instrument(skip(self, owner))]
    pub async fn await_result(
        &self,
        owner: &OwnerId,
        request_id: Uuid,
        timeout: Duration,
    ) -> Result<Option<JobResult>> {
        let rx = {
            let mut table = self.reply_table.lock().await;
            match table.owners.get(&request_id) {
                Some(registered) if registered == owner => {}
                Some(_) => return Err(JobError::OwnerMismatch),
                None => return Err(JobError::NotFound(request_id.to_string())),
            }
            let (tx, rx) = oneshot::channel();
            table.waiters.insert(request_id, tx);
            rx
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => Ok(Some(result)),
            Ok(Err(_)) => Ok(None),
            Err(_elapsed) => {
                let mut table = self.reply_table.lock().await;
                table.owners.remove(&request_id);
                table.waiters.remove(&request_id);
                Ok(None)
            }
        }
    }

    pub fn suspend(&self) {
        for q in &self.queues {
            q.suspend();
        }
    }

    pub fn resume(&self) {
        for q in &self.queues {
            q.resume();
        }
    }

    /// Best-effort snapshot of ready jobs across every queue in the pool
    /// matching `predicate`. See `QueueBackend::filter` for the exact
    /// guarantees a given backend makes.
    pub async fn filter(&self, predicate: JobPredicate) -> Result<Vec<Job>> {
        let predicate = Arc::new(predicate);
        let mut matches = Vec::new();
        for q in &self.queues {
            let predicate = predicate.clone();
            matches.extend(
                q.filter(Box::new(move |job| predicate(job)))
                    .await?,
            );
        }
        Ok(matches)
    }

    /// Aggregated status across every queue in the pool.
    pub async fn status(&self) -> Result<PoolStatus> {
        let mut depth = 0u64;
        let mut suspended = false;
        for q in &self.queues {
            let s = q.status().await?;
            depth += s.depth;
            suspended |= s.suspended;
        }
        Ok(PoolStatus {
            queue: crate::types::QueueStatus { depth, suspended },
            workers_total: self.metrics.workers_total(),
            workers_busy: self.metrics.workers_busy(),
        })
    }

    pub fn queue_args(&self) -> &QueueArgs {
        &self.queue_args
    }

    pub fn metrics(&self) -> Arc<PoolMetrics> {
        self.metrics.clone()
    }
}
