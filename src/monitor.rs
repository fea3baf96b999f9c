//! Worker monitor: the sole owner of "the job currently leased to this
//! worker". Spawns a genuinely separate worker task, asks the queue for
//! one job at a time, and is the only place a worker crash is observed
//! (at the `JoinHandle` boundary) and turned into a failure-mode
//! callback plus a backend `reject(requeue=true)`.
//!
//! The monitor is never folded into the worker: the worker runs its own
//! `tokio::spawn`ed task with its own mailbox, and the monitor merely
//! hands it jobs and watches its `JoinHandle`. A panic inside
//! `WorkerModule::call` ends that task — the monitor sees it as a
//! `JoinError`, not as an `Ok(JobResult::Err)` — which is what lets a
//! genuine crash be told apart from an ordinary task error.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, instrument, warn};

use crate::failure_mode::{FailedJob, FailureMode};
use crate::metrics::PoolMetrics;
use crate::queue::QueueHandle;
use crate::registry::{Member, Participant, Scope, SharedPoolRegistry};
use crate::types::{Job, JobResult, PoolId, Role};
use crate::worker::{execute, WorkerModule};

/// Handle used by the submission API and the registry to look up
/// in-flight job state for a running monitor.
#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::UnboundedSender<MonitorCommand>,
}

enum MonitorCommand {
    CurrentLease(oneshot::Sender<Option<Job>>),
}

impl MonitorHandle {
    pub async fn current_lease(&self) -> Option<Job> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(MonitorCommand::CurrentLease(reply)).is_err() {
            return None;
        }
        rx.await.unwrap_or(None)
    }
}

/// Spawns a worker monitor: runs `WorkerModule::init` exactly once,
/// reporting the outcome on `init_result` so the caller's retry loop
/// doesn't need (and must not perform) a separate probe call. On a
/// successful init, joins the pool's `WorkerMonitors` and `Workers`
/// registry groups and starts pulling jobs one at a time; on worker
/// crash, runs the termination callback and exits — restarting the
/// monitor, if desired, is the caller's responsibility.
#[allow(clippy::too_many_arguments)]
pub fn spawn<M: WorkerModule>(
    module: Arc<M>,
    queue: QueueHandle,
    failure_mode: Arc<dyn FailureMode>,
    reply_tx: mpsc::UnboundedSender<(uuid::Uuid, JobResult)>,
    node_id: String,
    metrics: Arc<PoolMetrics>,
    registry: SharedPoolRegistry,
    pool: PoolId,
    init_result: oneshot::Sender<crate::error::Result<()>>,
) -> MonitorHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = MonitorHandle { tx };
    tokio::spawn(run(
        module,
        queue,
        failure_mode,
        reply_tx,
        node_id,
        rx,
        metrics,
        registry,
        pool,
        init_result,
        handle.clone(),
    ));
    handle
}

#[instrument(skip_all, fields(node_id = %node_id))]
#[allow(clippy::too_many_arguments)]
async fn run<M: WorkerModule>(
    module: Arc<M>,
    queue: QueueHandle,
    failure_mode: Arc<dyn FailureMode>,
    reply_tx: mpsc::UnboundedSender<(uuid::Uuid, JobResult)>,
    node_id: String,
    mut commands: mpsc::UnboundedReceiver<MonitorCommand>,
    metrics: Arc<PoolMetrics>,
    registry: SharedPoolRegistry,
    pool: PoolId,
    init_result: oneshot::Sender<crate::error::Result<()>>,
    self_handle: MonitorHandle,
) {
    let state = match module.init().await {
        Ok(state) => {
            let _ = init_result.send(Ok(()));
            Arc::new(state)
        }
        Err(err) => {
            let _ = init_result.send(Err(err));
            return;
        }
    };

    registry
        .join(
            pool.clone(),
            Role::WorkerMonitors,
            Member {
                id: node_id.clone(),
                scope: Scope::Local,
                handle: Participant::Monitor(self_handle),
            },
        )
        .await;
    registry
        .join(
            pool.clone(),
            Role::Workers,
            Member {
                id: format!("{node_id}-worker"),
                scope: Scope::Local,
                handle: Participant::Worker(node_id.clone()),
            },
        )
        .await;
    metrics.worker_started();

    let (exec_tx, exec_rx) = mpsc::channel(1);
    let worker_handle = tokio::spawn(worker_loop(module.clone(), state, exec_rx));
    tokio::pin!(worker_handle);

    let mut current_job: Option<Job> = None;
    let mut pending_reply: Option<oneshot::Receiver<JobResult>> = None;
    let mut worker_failed = false;
    let mut demand = queue.ask(1);

    loop {
        tokio::select! {
            job = demand.recv(), if pending_reply.is_none() && !worker_failed => {
                let Some(mut job) = job else { break };
                job.by = Some(node_id.clone());
                current_job = Some(job.clone());
                metrics.mark_busy();

                let (tx, rx) = oneshot::channel();
                if exec_tx.send((job, tx)).await.is_err() {
                    warn!("worker mailbox closed, treating as crash");
                    worker_failed = true;
                } else {
                    pending_reply = Some(rx);
                }
            }
            reply = recv_reply(&mut pending_reply), if pending_reply.is_some() => {
                pending_reply = None;
                match reply {
                    Ok(result) => {
                        let job = current_job.take().expect("job set while reply pending");
                        metrics.mark_idle();
                        settle_normal(&queue, &reply_tx, &metrics, job, result).await;
                        demand = queue.ask(1);
                    }
                    Err(_recv_err) => {
                        // The worker dropped its reply sender without
                        // answering — it crashed mid-call. `current_job`
                        // stays set; the `worker_handle` branch below
                        // runs the actual termination callback once the
                        // task finishes unwinding.
                        metrics.mark_idle();
                        worker_failed = true;
                    }
                }
            }
            Some(cmd) = commands.recv() => {
                match cmd {
                    MonitorCommand::CurrentLease(reply) => {
                        let _ = reply.send(current_job.clone());
                    }
                }
            }
            join = &mut worker_handle => {
                handle_worker_death(current_job.take(), join, &queue, &failure_mode, &metrics).await;
                break;
            }
        }
    }

    registry.leave(&pool, Role::WorkerMonitors, &node_id).await;
    registry.leave(&pool, Role::Workers, &format!("{node_id}-worker")).await;
}

/// Polls a possibly-absent oneshot receiver without consuming it across
/// loop iterations where a different `select!` branch wins instead.
fn recv_reply(
    pending_reply: &mut Option<oneshot::Receiver<JobResult>>,
) -> impl Future<Output = std::result::Result<JobResult, oneshot::error::RecvError>> + '_ {
    std::future::poll_fn(move |cx| match pending_reply {
        Some(rx) => Pin::new(rx).poll(cx),
        None => std::task::Poll::Pending,
    })
}

/// The worker's own task: a loop pulling one `(job, reply)` pair at a
/// time off its mailbox and executing it. A panic inside `execute` ends
/// this loop (and the task), which is exactly the signal the monitor's
/// `JoinHandle` is watching for.
async fn worker_loop<M: WorkerModule>(
    module: Arc<M>,
    state: Arc<M::State>,
    mut exec_rx: mpsc::Receiver<(Job, oneshot::Sender<JobResult>)>,
) {
    while let Some((job, reply)) = exec_rx.recv().await {
        let result = execute(module.as_ref(), state.as_ref(), &job).await;
        let _ = reply.send(result);
    }
}

/// A job whose worker call returned normally (`Ok` or `Err` — either way,
/// the task didn't panic) is settled as complete: acked at the backend
/// and, if a reply address was given, delivered to the submitter. Per
/// §4.F, `failure_mode` only fires on a worker crash, never here.
async fn settle_normal(
    queue: &QueueHandle,
    reply_tx: &mpsc::UnboundedSender<(uuid::Uuid, JobResult)>,
    metrics: &Arc<PoolMetrics>,
    job: Job,
    result: JobResult,
) {
    if let Some(token) = job.private.clone() {
        queue.ack(token);
        metrics.record_acked();
    }

    if let Some(from) = &job.from {
        info!(request_id = %from.request_id, "delivering reply");
        let _ = reply_tx.send((from.request_id, result));
    }
}

/// Runs when the worker's task itself ended — a panic, or (far less
/// likely) a clean return from `worker_loop`. The job it was holding, if
/// any, never completed: no reply is sent, the job is nacked with
/// `redeliver=true` so it's retried elsewhere, and the failure mode's
/// termination callback runs detached so it can't block this task's own
/// shutdown.
async fn handle_worker_death(
    current_job: Option<Job>,
    join: std::result::Result<(), tokio::task::JoinError>,
    queue: &QueueHandle,
    failure_mode: &Arc<dyn FailureMode>,
    metrics: &Arc<PoolMetrics>,
) {
    let reason = match join {
        Ok(()) => "worker task exited".to_string(),
        Err(err) if err.is_panic() => format!("worker panicked: {}", panic_message(err)),
        Err(err) => format!("worker task aborted: {err}"),
    };
    error!(reason = %reason, "worker died, monitor exiting");

    let Some(job) = current_job else {
        return;
    };

    if let Some(token) = job.private.clone() {
        queue.reject(token, true);
    }
    metrics.record_failed();

    let failure_mode = failure_mode.clone();
    tokio::spawn(async move {
        if let Err(err) = failure_mode.handle_failure(FailedJob::new(job, reason)).await {
            warn!(error = %err, "failure mode handler errored");
        }
    });
}

fn panic_message(err: tokio::task::JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => {
            if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "worker panicked with a non-string payload".to_string()
            }
        }
        Err(_) => "worker task cancelled".to_string(),
    }
}
