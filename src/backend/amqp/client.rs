use std::sync::Arc;

use amqprs::channel::{
    BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, BasicGetArguments,
    BasicPublishArguments, BasicQosArguments, BasicRejectArguments, Channel, QueueDeclareArguments,
};
use amqprs::connection::{Connection, OpenConnectionArguments};
use amqprs::consumer::AsyncConsumer;
use amqprs::{BasicProperties, Deliver};
use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, error, info, instrument, warn};

use crate::backend::{BackendInfo, Delivery, JobPredicate, QueueBackend};
use crate::error::{JobError, Result};
use crate::types::{AckToken, Job, QueueArgs, QueueStatus};

/// Connection parameters for the AMQP backend.
#[derive(Debug, Clone)]
pub struct AmqpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub vhost: String,
}

impl Default for AmqpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            username: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
        }
    }
}

/// Decodes each delivery handed to it by `basic_consume` and forwards it
/// straight to the queue producer's own `mpsc` channel, so `subscribe`
/// hands back a live stream of `Delivery` rather than raw AMQP frames.
struct JobConsumer {
    tx: UnboundedSender<Delivery>,
}

#[async_trait]
impl AsyncConsumer for JobConsumer {
    async fn consume(
        &mut self,
        _channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        let mut job: Job = match serde_json::from_slice(&content) {
            Ok(job) => job,
            Err(err) => {
                error!(error = %err, "failed to decode pushed delivery, dropping");
                return;
            }
        };
        job.private = Some(AckToken { delivery_tag });
        let delivery = Delivery {
            job,
            ack: AckToken { delivery_tag },
        };
        if self.tx.send(delivery).is_err() {
            warn!("job consumer channel closed, dropping delivery");
        }
    }
}

/// Queue backend that talks to a real AMQP broker: `basic_get` for
/// one-shot polling, `basic_consume` for standing subscriptions,
/// `basic_ack`/`basic_reject` for settlement.
#[derive(Clone)]
pub struct AmqpBackend {
    channel: Arc<Channel>,
}

impl AmqpBackend {
    #[instrument(skip(config), fields(host = %config.host, port = config.port))]
    pub async fn connect(config: AmqpConfig) -> Result<Self> {
        let args = OpenConnectionArguments::new(
            &config.host,
            config.port,
            &config.username,
            &config.password,
        )
        .virtual_host(&config.vhost)
        .finish();

        let connection = Connection::open(&args)
            .await
            .map_err(|e| JobError::Connection(e.to_string()))?;

        let channel = connection
            .open_channel(None)
            .await
            .map_err(|e| JobError::Connection(e.to_string()))?;

        info!("amqp backend connected");

        Ok(Self {
            channel: Arc::new(channel),
        })
    }

    fn encode(job: &Job) -> Result<Vec<u8>> {
        serde_json::to_vec(job).map_err(JobError::from)
    }
}

#[async_trait]
impl QueueBackend for AmqpBackend {
    #[instrument(skip(self, args), fields(queue = %args.queue_name))]
    async fn declare(&self, args: &QueueArgs) -> Result<()> {
        let qargs = QueueDeclareArguments::new(&args.queue_name).durable(args.durable).finish();
        self.channel
            .queue_declare(qargs)
            .await
            .map_err(|e| JobError::Config(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self, job), fields(%queue, job_id = %job.id))]
    async fn publish(&self, queue: &str, job: &Job) -> Result<()> {
        let payload = Self::encode(job)?;
        let props = BasicProperties::default().with_persistence(true).finish();
        let args = BasicPublishArguments::new("", queue);
        self.channel
            .basic_publish(props, payload, args)
            .await
            .map_err(|e| JobError::Publish {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    #[instrument(skip(self), fields(%queue))]
    async fn poll(&self, queue: &str) -> Result<Option<Delivery>> {
        let args = BasicGetArguments::new(queue);
        let response = self
            .channel
            .basic_get(args)
            .await
            .map_err(|e| JobError::Backend(e.to_string()))?;

        let Some((get_ok, _props, content)) = response else {
            return Ok(None);
        };

        let mut job: Job = serde_json::from_slice(&content).map_err(JobError::from)?;
        let delivery_tag = get_ok.delivery_tag();
        job.private = Some(AckToken { delivery_tag });
        Ok(Some(Delivery {
            job,
            ack: AckToken { delivery_tag },
        }))
    }

    #[instrument(skip(self), fields(%queue, prefetch))]
    async fn subscribe(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> Result<(String, mpsc::UnboundedReceiver<Delivery>)> {
        self.channel
            .basic_qos(BasicQosArguments::new(0, prefetch, false))
            .await
            .map_err(|e| JobError::Subscribe {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let args = BasicConsumeArguments::new(queue, "");
        let consumer_tag = self
            .channel
            .basic_consume(JobConsumer { tx }, args)
            .await
            .map_err(|e| JobError::Subscribe {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;

        debug!(consumer_tag = %consumer_tag, "subscribed");
        Ok((consumer_tag, rx))
    }

    #[instrument(skip(self))]
    async fn cancel(&self, consumer_tag: &str) -> Result<()> {
        self.channel
            .basic_cancel(BasicCancelArguments::new(consumer_tag))
            .await
            .map_err(|e| JobError::Consumer(e.to_string()))?;
        Ok(())
    }

    async fn ack(&self, token: &AckToken) -> Result<()> {
        self.channel
            .basic_ack(BasicAckArguments::new(token.delivery_tag, false))
            .await
            .map_err(|e| JobError::Ack(e.to_string()))?;
        Ok(())
    }

    async fn reject(&self, token: &AckToken, requeue: bool) -> Result<()> {
        self.channel
            .basic_reject(BasicRejectArguments::new(token.delivery_tag, requeue))
            .await
            .map_err(|e| JobError::Ack(e.to_string()))?;
        Ok(())
    }

    async fn filter(&self, queue: &str, _predicate: &JobPredicate) -> Result<Vec<Job>> {
        // AMQP gives no way to inspect queued messages without consuming
        // them, so this is a best-effort empty snapshot rather than a
        // real query — callers relying on `filter` need a backend that
        // can actually answer it.
        debug!(%queue, "filter is a no-op on the amqp backend");
        Ok(Vec::new())
    }

    async fn status(&self, queue: &str) -> Result<QueueStatus> {
        let args = QueueDeclareArguments::new(queue).passive(true).finish();
        let (_name, depth, _consumers) = self
            .channel
            .queue_declare(args)
            .await
            .map_err(|e| JobError::Backend(e.to_string()))?
            .ok_or_else(|| JobError::NotFound(queue.to_string()))?;
        Ok(QueueStatus {
            depth: depth as u64,
            suspended: false,
        })
    }

    fn info(&self) -> BackendInfo {
        BackendInfo {
            kind: "amqp",
            connected: true,
        }
    }
}
