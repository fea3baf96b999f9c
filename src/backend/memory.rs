//! In-memory queue backend: a `Mutex`-guarded ring of jobs, used for tests
//! and for running a pool embedded in a single process with no external
//! broker.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::Mutex;

use crate::error::{JobError, Result};
use crate::types::{AckToken, Job, QueueArgs, QueueStatus};

use super::{BackendInfo, Delivery, JobPredicate, QueueBackend};

struct QueueState {
    ready: VecDeque<Job>,
    in_flight: HashMap<u64, Job>,
    suspended: bool,
    /// Active push subscriptions: a queue producer that has called
    /// `subscribe` gets jobs delivered here directly instead of through
    /// `ready`, mirroring how a broker prefers pushing to an open
    /// consumer over leaving messages for `basic_get`.
    subscribers: Vec<(String, UnboundedSender<Delivery>)>,
}

impl Default for QueueState {
    fn default() -> Self {
        Self {
            ready: VecDeque::new(),
            in_flight: HashMap::new(),
            suspended: false,
            subscribers: Vec::new(),
        }
    }
}

/// Default backend for embedded use and integration tests. Redelivers
/// rejected jobs to the back of the ready queue, mirroring how a real
/// broker requeues a nacked message.
#[derive(Clone)]
pub struct MemoryBackend {
    queues: Arc<Mutex<HashMap<String, QueueState>>>,
    next_tag: Arc<AtomicU64>,
    next_consumer: Arc<AtomicU64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            next_tag: Arc::new(AtomicU64::new(1)),
            next_consumer: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Test/diagnostic helper: marks a queue as suspended, so `status`
    /// reports it without needing a live subscription to drain.
    pub async fn set_suspended(&self, queue: &str, suspended: bool) {
        let mut queues = self.queues.lock().await;
        queues.entry(queue.to_string()).or_default().suspended = suspended;
    }

    fn to_delivery(&self, mut job: Job) -> (Delivery, u64) {
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
        job.private = Some(AckToken { delivery_tag: tag });
        let delivery = Delivery {
            job,
            ack: AckToken { delivery_tag: tag },
        };
        (delivery, tag)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn declare(&self, args: &QueueArgs) -> Result<()> {
        let mut queues = self.queues.lock().await;
        queues.entry(args.queue_name.clone()).or_default();
        Ok(())
    }

    async fn publish(&self, queue: &str, job: &Job) -> Result<()> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();

        // Prefer delivering directly to a standing subscriber, the same
        // way a broker favors pushing to an open consumer over leaving
        // the message for a later `basic_get`.
        while let Some((tag, sender)) = state.subscribers.first().cloned() {
            let (delivery, delivery_tag) = self.to_delivery(job.clone());
            if sender.send(delivery).is_ok() {
                state.in_flight.insert(delivery_tag, job.clone());
                return Ok(());
            }
            // Subscriber's receiver was dropped without calling cancel;
            // prune it and fall through to the next one (or to `ready`).
            state.subscribers.retain(|(t, _)| t != &tag);
        }

        state.ready.push_back(job.clone());
        Ok(())
    }

    async fn poll(&self, queue: &str) -> Result<Option<Delivery>> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        if state.suspended {
            return Ok(None);
        }
        let Some(job) = state.ready.pop_front() else {
            return Ok(None);
        };
        let (delivery, tag) = self.to_delivery(job);
        state.in_flight.insert(tag, delivery.job.clone());
        Ok(Some(delivery))
    }

    async fn subscribe(
        &self,
        queue: &str,
        _prefetch: u16,
    ) -> Result<(String, mpsc::UnboundedReceiver<Delivery>)> {
        let consumer_tag = format!(
            "{queue}-consumer-{}",
            self.next_consumer.fetch_add(1, Ordering::SeqCst)
        );
        let (tx, rx) = mpsc::unbounded_channel();

        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        state.subscribers.push((consumer_tag.clone(), tx));
        Ok((consumer_tag, rx))
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<()> {
        let mut queues = self.queues.lock().await;
        for state in queues.values_mut() {
            state.subscribers.retain(|(tag, _)| tag != consumer_tag);
        }
        Ok(())
    }

    async fn ack(&self, token: &AckToken) -> Result<()> {
        let mut queues = self.queues.lock().await;
        for state in queues.values_mut() {
            if state.in_flight.remove(&token.delivery_tag).is_some() {
                return Ok(());
            }
        }
        Err(JobError::Ack(format!(
            "unknown delivery tag {}",
            token.delivery_tag
        )))
    }

    async fn reject(&self, token: &AckToken, requeue: bool) -> Result<()> {
        let mut queues = self.queues.lock().await;
        for state in queues.values_mut() {
            if let Some(job) = state.in_flight.remove(&token.delivery_tag) {
                if requeue {
                    state.ready.push_back(job);
                }
                return Ok(());
            }
        }
        Err(JobError::Ack(format!(
            "unknown delivery tag {}",
            token.delivery_tag
        )))
    }

    async fn filter(&self, queue: &str, predicate: &JobPredicate) -> Result<Vec<Job>> {
        let queues = self.queues.lock().await;
        Ok(queues
            .get(queue)
            .map(|state| state.ready.iter().filter(|job| predicate(job)).cloned().collect())
            .unwrap_or_default())
    }

    async fn status(&self, queue: &str) -> Result<QueueStatus> {
        let queues = self.queues.lock().await;
        let state = queues.get(queue);
        Ok(QueueStatus {
            depth: state.map(|s| s.ready.len() as u64).unwrap_or(0),
            suspended: state.map(|s| s.suspended).unwrap_or(false),
        })
    }

    fn info(&self) -> BackendInfo {
        BackendInfo {
            kind: "memory",
            connected: true,
        }
    }
}
