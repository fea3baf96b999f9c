//! Pool orchestration: wires `PoolConfig`'s queue and worker counts into a
//! running set of queue producers and worker monitors, registering each
//! in the shared registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::backend::QueueBackend;
use crate::error::Result;
use crate::failure_mode::FailureMode;
use crate::metrics::PoolMetrics;
use crate::monitor;
use crate::queue;
use crate::registry::{Member, Participant, Scope, SharedPoolRegistry};
use crate::submission::Pool as SubmissionPool;
use crate::types::{JobResult, PoolConfig, Role};
use crate::worker::WorkerModule;

/// Boots a pool: declares `config.num_queues` queue producers against
/// `backend`, registers them, spawns `config.num_workers` worker
/// monitors each pulling from one queue (round-robin), and returns the
/// submission-facing handle.
///
/// Monitor startup failures (e.g. `WorkerModule::init` erroring) are
/// retried every `config.init_retry_secs` rather than failing the whole
/// pool — a transient dependency outage at boot shouldn't be fatal.
#[instrument(skip(backend, module, failure_mode, registry), fields(pool = %config.pool))]
pub async fn start<M: WorkerModule>(
    config: PoolConfig,
    backend: Arc<dyn QueueBackend>,
    module: Arc<M>,
    failure_mode: Arc<dyn FailureMode>,
    registry: SharedPoolRegistry,
) -> Result<SubmissionPool> {
    registry.create(config.pool.clone(), Role::Queues).await;
    registry.create(config.pool.clone(), Role::WorkerMonitors).await;
    registry.create(config.pool.clone(), Role::Workers).await;

    let metrics = PoolMetrics::new();

    let mut queues = Vec::with_capacity(config.num_queues);
    for i in 0..config.num_queues {
        let handle = queue::spawn(backend.clone(), config.queue_args.clone(), metrics.clone()).await?;
        registry
            .join(
                config.pool.clone(),
                Role::Queues,
                Member {
                    id: format!("{}-queue-{i}", config.pool),
                    scope: Scope::Local,
                    handle: Participant::Queue(handle.clone()),
                },
            )
            .await;
        queues.push(handle);
    }

    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<(Uuid, JobResult)>();

    for i in 0..config.num_workers {
        let queue = queues[i % queues.len()].clone();
        spawn_monitor_with_retry(
            config.clone(),
            i,
            module.clone(),
            queue,
            failure_mode.clone(),
            reply_tx.clone(),
            metrics.clone(),
            registry.clone(),
        );
    }

    Ok(SubmissionPool::new(
        queues,
        config.queue_args.clone(),
        reply_rx,
        metrics,
    ))
}

/// Keeps (re)trying to start one worker monitor until `WorkerModule::init`
/// succeeds. `monitor::spawn` itself calls `init` exactly once per
/// attempt and reports the outcome back over `init_result` — this loop
/// never probes `init` on its own, so a side-effecting `init` (opening a
/// connection, say) never runs twice for one successful startup.
fn spawn_monitor_with_retry<M: WorkerModule>(
    config: PoolConfig,
    index: usize,
    module: Arc<M>,
    queue: queue::QueueHandle,
    failure_mode: Arc<dyn FailureMode>,
    reply_tx: mpsc::UnboundedSender<(Uuid, JobResult)>,
    metrics: Arc<PoolMetrics>,
    registry: SharedPoolRegistry,
) {
    let node_id = format!("{}-worker-{index}", config.pool);
    tokio::spawn(async move {
        loop {
            let (init_tx, init_rx) = oneshot::channel();
            monitor::spawn(
                module.clone(),
                queue.clone(),
                failure_mode.clone(),
                reply_tx.clone(),
                node_id.clone(),
                metrics.clone(),
                registry.clone(),
                config.pool.clone(),
                init_tx,
            );

            match init_rx.await {
                Ok(Ok(())) => {
                    info!(node_id = %node_id, "worker monitor started");
                    break;
                }
                Ok(Err(err)) => {
                    error!(node_id = %node_id, error = %err, "worker init failed, retrying");
                    tokio::time::sleep(Duration::from_secs(config.init_retry_secs)).await;
                }
                Err(_) => {
                    error!(node_id = %node_id, "monitor exited before reporting init result, retrying");
                    tokio::time::sleep(Duration::from_secs(config.init_retry_secs)).await;
                }
            }
        }
    });
}
