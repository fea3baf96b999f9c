//! Queue producer: the demand-driven actor standing between a backend and
//! the worker monitors pulling jobs from it.
//!
//! Tracks outstanding demand the way a GenStage producer does: monitors
//! ask for jobs (`ask(n)`), the producer fills what it can immediately
//! and remembers the rest as `outstanding` demand to satisfy as soon as
//! new jobs arrive. The demand side of the state machine has two modes:
//!
//! - `Idle` — no standing subscription; demand is filled by polling the
//!   backend directly. A poll that comes back empty while demand is
//!   still outstanding opens a subscription and moves to `Subscribed`.
//! - `Subscribed` — a push subscription is open; deliveries satisfy
//!   outstanding demand one at a time, and the subscription is cancelled
//!   the moment the last bit of demand is satisfied. A delivery that
//!   arrives with zero outstanding demand (a race between cancellation
//!   and an in-flight push) is nacked with `redeliver=true`.
//!
//! `Suspended` is orthogonal to both: administratively paused, so no
//! polling happens and any delivery that still arrives over an open
//! subscription is nacked rather than forwarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, warn};

use crate::backend::{Delivery, JobPredicate, QueueBackend};
use crate::error::{JobError, Result};
use crate::metrics::PoolMetrics;
use crate::types::{AckToken, Job, QueueArgs, QueueStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DemandState {
    Idle,
    Subscribed,
}

enum Command {
    Enqueue(Job, oneshot::Sender<Result<()>>),
    Ask { demand: u64, reply: mpsc::UnboundedSender<Job> },
    Ack(AckToken),
    Reject(AckToken, bool),
    Suspend,
    Resume,
    Status(oneshot::Sender<QueueStatus>),
    Filter(JobPredicate, oneshot::Sender<Result<Vec<Job>>>),
}

/// Cheap, cloneable handle callers use to talk to a running queue producer.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<Command>,
    depth_hint: Arc<AtomicU64>,
}

impl QueueHandle {
    pub async fn enqueue(&self, job: Job) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Enqueue(job, reply))
            .map_err(|_| JobError::Backend("queue producer stopped".into()))?;
        rx.await.map_err(|_| JobError::Backend("queue producer stopped".into()))?
    }

    /// Registers demand for up to `demand` jobs; fulfilled jobs stream
    /// back over the returned receiver as they become available.
    pub fn ask(&self, demand: u64) -> mpsc::UnboundedReceiver<Job> {
        let (reply, rx) = mpsc::unbounded_channel();
        let _ = self.tx.send(Command::Ask { demand, reply });
        rx
    }

    pub fn ack(&self, token: AckToken) {
        let _ = self.tx.send(Command::Ack(token));
    }

    pub fn reject(&self, token: AckToken, requeue: bool) {
        let _ = self.tx.send(Command::Reject(token, requeue));
    }

    pub fn suspend(&self) {
        let _ = self.tx.send(Command::Suspend);
    }

    pub fn resume(&self) {
        let _ = self.tx.send(Command::Resume);
    }

    pub async fn status(&self) -> Result<QueueStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Status(reply))
            .map_err(|_| JobError::Backend("queue producer stopped".into()))?;
        rx.await.map_err(|_| JobError::Backend("queue producer stopped".into()))
    }

    /// Best-effort snapshot of ready jobs matching `predicate`. See
    /// `QueueBackend::filter` for the exact guarantees (or lack of them).
    pub async fn filter(&self, predicate: JobPredicate) -> Result<Vec<Job>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Filter(predicate, reply))
            .map_err(|_| JobError::Backend("queue producer stopped".into()))?;
        rx.await.map_err(|_| JobError::Backend("queue producer stopped".into()))?
    }

    /// Best-effort depth last observed by the producer loop, for callers
    /// that want a cheap, non-authoritative read without round-tripping.
    pub fn depth_hint(&self) -> u64 {
        self.depth_hint.load(Ordering::Relaxed)
    }
}

/// Spawns a queue producer actor backed by `backend`, declaring `args`'s
/// queue on startup. Returns a handle callers use to enqueue, ask for
/// demand, and administer the queue.
#[instrument(skip(backend, args, metrics), fields(queue = %args.queue_name))]
pub async fn spawn(
    backend: Arc<dyn QueueBackend>,
    args: QueueArgs,
    metrics: Arc<PoolMetrics>,
) -> Result<QueueHandle> {
    backend.declare(&args).await?;

    let (tx, rx) = mpsc::unbounded_channel();
    let depth_hint = Arc::new(AtomicU64::new(0));
    let handle = QueueHandle {
        tx,
        depth_hint: depth_hint.clone(),
    };

    tokio::spawn(run(backend, args, rx, depth_hint, metrics));

    Ok(handle)
}

/// Everything the actor loop threads through its helper functions,
/// bundled so the `select!` arms stay short.
struct Producer {
    backend: Arc<dyn QueueBackend>,
    queue: String,
    prefetch: u16,
    depth_hint: Arc<AtomicU64>,
    metrics: Arc<PoolMetrics>,
    demand_state: DemandState,
    suspended: bool,
    outstanding: u64,
    waiters: Vec<mpsc::UnboundedSender<Job>>,
    subscription: Option<(String, mpsc::UnboundedReceiver<Delivery>)>,
}

impl Producer {
    fn emit(&mut self, job: Job) {
        self.metrics.record_dispatched();
        self.waiters.retain(|w| w.send(job.clone()).is_ok());
    }

    /// Idle-mode fill: poll the backend until demand is exhausted or a
    /// poll comes back empty. An empty poll with demand still
    /// outstanding opens a subscription for the remainder.
    async fn fill_from_idle(&mut self) {
        if self.suspended {
            return;
        }
        while self.demand_state == DemandState::Idle && self.outstanding > 0 {
            match self.backend.poll(&self.queue).await {
                Ok(Some(delivery)) => {
                    self.outstanding -= 1;
                    self.emit(delivery.job);
                }
                Ok(None) => {
                    self.start_subscription().await;
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "poll failed");
                    break;
                }
            }
        }
        self.refresh_depth_hint().await;
    }

    async fn start_subscription(&mut self) {
        match self.backend.subscribe(&self.queue, self.prefetch).await {
            Ok((tag, rx)) => {
                self.subscription = Some((tag, rx));
                self.demand_state = DemandState::Subscribed;
                debug!("subscription opened");
            }
            Err(err) => {
                warn!(error = %err, "subscribe failed, staying idle");
            }
        }
    }

    async fn cancel_subscription(&mut self) {
        if let Some((tag, _)) = self.subscription.take() {
            if let Err(err) = self.backend.cancel(&tag).await {
                warn!(error = %err, "cancel failed");
            }
        }
        self.demand_state = DemandState::Idle;
    }

    /// Handles one delivery arriving over the open subscription.
    async fn handle_delivery(&mut self, delivery: Delivery) {
        if self.suspended {
            self.nack_over_delivery(delivery).await;
            return;
        }
        match self.outstanding {
            0 => {
                self.nack_over_delivery(delivery).await;
            }
            1 => {
                self.outstanding = 0;
                self.cancel_subscription().await;
                self.emit(delivery.job);
            }
            _ => {
                self.outstanding -= 1;
                self.emit(delivery.job);
            }
        }
        self.refresh_depth_hint().await;
    }

    async fn nack_over_delivery(&mut self, delivery: Delivery) {
        warn!(job_id = %delivery.job.id, "delivery with no outstanding demand, nacking");
        if let Err(err) = self.backend.reject(&delivery.ack, true).await {
            warn!(error = %err, "reject failed");
        }
        self.metrics.record_nacked(true);
    }

    async fn refresh_depth_hint(&self) {
        if let Ok(status) = self.backend.status(&self.queue).await {
            self.depth_hint.store(status.depth, Ordering::Relaxed);
        }
    }
}

async fn run(
    backend: Arc<dyn QueueBackend>,
    args: QueueArgs,
    mut rx: mpsc::UnboundedReceiver<Command>,
    depth_hint: Arc<AtomicU64>,
    metrics: Arc<PoolMetrics>,
) {
    let mut producer = Producer {
        backend,
        queue: args.queue_name.clone(),
        prefetch: args.prefetch,
        depth_hint,
        metrics,
        demand_state: DemandState::Idle,
        suspended: false,
        outstanding: 0,
        waiters: Vec::new(),
        subscription: None,
    };

    loop {
        // Pull the subscription out of `producer` for the duration of
        // this `select!` so the two branches don't need overlapping
        // mutable borrows of the same struct; it's put back before
        // either branch body touches `producer` again.
        let mut sub = producer.subscription.take();
        let delivery_fut = async {
            match &mut sub {
                Some((_, rx)) => rx.recv().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            cmd = rx.recv() => {
                producer.subscription = sub;
                match cmd {
                    None => break,
                    Some(Command::Enqueue(job, reply)) => {
                        let result = producer.backend.publish(&producer.queue, &job).await;
                        if result.is_ok() {
                            producer.metrics.record_enqueued();
                        }
                        let _ = reply.send(result);
                    }
                    Some(Command::Ask { demand, reply }) => {
                        producer.outstanding += demand;
                        producer.waiters.push(reply);
                        if producer.demand_state == DemandState::Idle {
                            producer.fill_from_idle().await;
                        }
                    }
                    Some(Command::Ack(token)) => {
                        if let Err(err) = producer.backend.ack(&token).await {
                            warn!(error = %err, "ack failed");
                        } else {
                            producer.metrics.record_acked();
                        }
                    }
                    Some(Command::Reject(token, requeue)) => {
                        if let Err(err) = producer.backend.reject(&token, requeue).await {
                            warn!(error = %err, "reject failed");
                        } else {
                            producer.metrics.record_nacked(requeue);
                        }
                    }
                    Some(Command::Suspend) => {
                        producer.suspended = true;
                        debug!("queue suspended");
                    }
                    Some(Command::Resume) => {
                        producer.suspended = false;
                        debug!("queue resumed");
                        if producer.demand_state == DemandState::Idle {
                            producer.fill_from_idle().await;
                        }
                    }
                    Some(Command::Status(reply)) => {
                        let mut status = producer.backend.status(&producer.queue).await.unwrap_or(QueueStatus {
                            depth: producer.depth_hint.load(Ordering::Relaxed),
                            suspended: false,
                        });
                        status.suspended |= producer.suspended;
                        let _ = reply.send(status);
                    }
                    Some(Command::Filter(predicate, reply)) => {
                        let result = producer.backend.filter(&producer.queue, &predicate).await;
                        let _ = reply.send(result);
                    }
                }
            }
            Some(delivery) = delivery_fut => {
                producer.subscription = sub;
                producer.handle_delivery(delivery).await;
            }
        }
    }
}
